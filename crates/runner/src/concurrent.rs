//! Bounded-concurrency iteration with per-unit retry.
//!
//! The runner processes a collection with at most `concurrency` units of
//! work in flight, applying [`RetryPolicy`](crate::RetryPolicy) semantics
//! independently to each unit. Results are written into position-indexed
//! slots, so output order always matches input order regardless of
//! completion order.
//!
//! The chunked variants partition the input into contiguous chunks and
//! treat each whole chunk as the unit of work and of retry.

use crate::retry::{RetryPolicy, retry};
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Default number of units in flight when none is configured.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Options for a bounded-concurrency run.
#[derive(Debug)]
pub struct RunOptions<E> {
    /// Maximum number of units in flight. Values below 1 are coerced to 1.
    pub concurrency: usize,
    /// Retry policy applied independently to each unit.
    pub retry: Option<RetryPolicy<E>>,
    /// Cancellation token checked before each new unit starts. In-flight
    /// units are allowed to finish; canceled units are omitted from results.
    pub cancel: Option<CancellationToken>,
}

impl<E> Default for RunOptions<E> {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry: None,
            cancel: None,
        }
    }
}

impl<E> RunOptions<E> {
    /// Create options with the default concurrency and no retry policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the concurrency bound.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Apply a retry policy to each unit.
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy<E>) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Watch a cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Run one unit of work under the options' retry policy and cancellation
/// token. `Ok(None)` marks a unit skipped or abandoned by cancellation.
async fn run_unit<T, E, F, Fut>(options: &RunOptions<E>, mut unit: F) -> Result<Option<T>, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    if options
        .cancel
        .as_ref()
        .is_some_and(CancellationToken::is_cancelled)
    {
        return Ok(None);
    }
    match options.retry.as_ref() {
        Some(policy) => retry(policy, options.cancel.as_ref(), unit).await,
        None => unit().await.map(Some),
    }
}

/// Apply `handler` to every item with bounded concurrency.
///
/// Output order matches input order. A slot is `None` only when its unit
/// was skipped or abandoned due to cancellation.
///
/// # Errors
///
/// Fail-fast: the first unit to exhaust its retry budget aborts the whole
/// call and its error propagates.
pub async fn map_concurrent<I, T, E, F, Fut>(
    items: &[I],
    options: &RunOptions<E>,
    handler: F,
) -> Result<Vec<Option<T>>, E>
where
    E: std::fmt::Display,
    F: Fn(&I) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let concurrency = options.concurrency.max(1);
    let handler = &handler;
    let mut results: Vec<Option<T>> = (0..items.len()).map(|_| None).collect();

    let mut units = stream::iter(items.iter().enumerate().map(|(index, item)| async move {
        run_unit(options, || handler(item))
            .await
            .map(|out| (index, out))
    }))
    .buffer_unordered(concurrency);

    while let Some(unit) = units.next().await {
        let (index, out) = unit?;
        results[index] = out;
    }
    Ok(results)
}

/// Keep the items whose predicate resolves `true`, preserving original
/// relative order among kept items.
///
/// # Errors
///
/// A predicate error aborts the whole call (after the unit's retry budget).
pub async fn filter_concurrent<I, E, F, Fut>(
    items: Vec<I>,
    options: &RunOptions<E>,
    predicate: F,
) -> Result<Vec<I>, E>
where
    E: std::fmt::Display,
    F: Fn(&I) -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let verdicts = map_concurrent(&items, options, |item| predicate(item)).await?;
    Ok(collect_kept(items, verdicts))
}

/// Like [`filter_concurrent`], but a unit that still fails after its retry
/// budget is treated as "does not pass the filter" instead of aborting the
/// batch. For call sites where the filter is advisory.
pub async fn filter_concurrent_best_effort<I, E, F, Fut>(
    items: Vec<I>,
    options: &RunOptions<E>,
    predicate: F,
) -> Vec<I>
where
    E: std::fmt::Display,
    F: Fn(&I) -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let concurrency = options.concurrency.max(1);
    let predicate = &predicate;
    let mut keep = vec![false; items.len()];

    let mut units = stream::iter(items.iter().enumerate().map(|(index, item)| async move {
        match run_unit(options, || predicate(item)).await {
            Ok(verdict) => (index, verdict.unwrap_or(false)),
            Err(err) => {
                warn!(index, error = %err, "Filter unit failed, treating as not kept");
                (index, false)
            }
        }
    }))
    .buffer_unordered(concurrency);

    while let Some((index, verdict)) = units.next().await {
        keep[index] = verdict;
    }
    drop(units);
    collect_kept(items, keep.into_iter().map(Some).collect())
}

/// Apply `handler` to every item, partitioned into contiguous chunks of
/// `chunk_size` (`ceil(len / chunk_size)` chunks, the final chunk may be
/// shorter). The whole chunk is the unit of work: the concurrency bound
/// counts chunks, and a chunk that fails is retried as a whole.
///
/// # Errors
///
/// Fail-fast, as [`map_concurrent`].
pub async fn map_chunked<I, T, E, F, Fut>(
    items: &[I],
    options: &RunOptions<E>,
    chunk_size: usize,
    handler: F,
) -> Result<Vec<Option<T>>, E>
where
    E: std::fmt::Display,
    F: Fn(&I) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let chunk_size = chunk_size.max(1);
    let concurrency = options.concurrency.max(1);
    let handler = &handler;
    let mut results: Vec<Option<T>> = (0..items.len()).map(|_| None).collect();

    let mut units = stream::iter(items.chunks(chunk_size).enumerate().map(
        |(chunk_index, chunk)| async move {
            let out = run_unit(options, || async move {
                let mut values = Vec::with_capacity(chunk.len());
                for item in chunk {
                    values.push(handler(item).await?);
                }
                Ok(values)
            })
            .await?;
            Ok::<_, E>((chunk_index * chunk_size, out))
        },
    ))
    .buffer_unordered(concurrency);

    while let Some(unit) = units.next().await {
        let (start, out) = unit?;
        if let Some(values) = out {
            for (offset, value) in values.into_iter().enumerate() {
                results[start + offset] = Some(value);
            }
        }
    }
    Ok(results)
}

/// Chunked form of [`filter_concurrent`]: the predicate runs per item but
/// the chunk is the unit of work and of retry.
///
/// # Errors
///
/// Fail-fast, as [`filter_concurrent`].
pub async fn filter_chunked<I, E, F, Fut>(
    items: Vec<I>,
    options: &RunOptions<E>,
    chunk_size: usize,
    predicate: F,
) -> Result<Vec<I>, E>
where
    E: std::fmt::Display,
    F: Fn(&I) -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let verdicts = map_chunked(&items, options, chunk_size, |item| predicate(item)).await?;
    Ok(collect_kept(items, verdicts))
}

/// Zip items with their verdicts, keeping those marked `Some(true)`.
/// Canceled units (`None`) are treated as not kept.
fn collect_kept<I>(items: Vec<I>, verdicts: Vec<Option<bool>>) -> Vec<I> {
    items
        .into_iter()
        .zip(verdicts)
        .filter_map(|(item, verdict)| matches!(verdict, Some(true)).then_some(item))
        .collect()
}
