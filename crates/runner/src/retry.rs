//! Retry logic with exponential backoff

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// What the retry hook wants the executor to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDirective {
    /// Proceed with the computed delay.
    Continue,
    /// Replace the computed delay (clamped to the policy's `max_delay`).
    DelayFor(Duration),
    /// Stop retrying; the original error propagates. Honored only when the
    /// policy has `cancel_on_abort` set.
    Abort,
}

/// Hook invoked before each retry with `(retry_number, error, proposed_delay)`.
///
/// Returning `Err` models a hook that itself fails: the error replaces the
/// original one when the policy has `rethrow_hook_errors` set, and is
/// swallowed otherwise.
pub type OnRetry<E> =
    Box<dyn Fn(u32, &E, Duration) -> Result<RetryDirective, E> + Send + Sync>;

/// Configuration for retry behavior.
///
/// Resolved fresh per invocation; callers merge overrides onto
/// [`RetryPolicy::default`] with the builder methods.
pub struct RetryPolicy<E> {
    /// Number of retries after the first attempt (`retries + 1` total attempts).
    pub retries: u32,
    /// Delay before the first retry. Must be non-zero.
    pub base_delay: Duration,
    /// Upper bound for the computed delay.
    pub max_delay: Duration,
    /// Base for exponential backoff calculation. Values below 1 are treated as 1.
    pub backoff_factor: f64,
    /// Randomize each delay `d` to a uniform sample in `[d, 2d)`.
    pub jitter: bool,
    /// Propagate errors returned by the retry hook instead of swallowing them.
    pub rethrow_hook_errors: bool,
    /// Honor [`RetryDirective::Abort`] from the retry hook.
    pub cancel_on_abort: bool,
    on_retry: Option<OnRetry<E>>,
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("retries", &self.retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_factor", &self.backoff_factor)
            .field("jitter", &self.jitter)
            .field("rethrow_hook_errors", &self.rethrow_hook_errors)
            .field("cancel_on_abort", &self.cancel_on_abort)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl<E> Default for RetryPolicy<E> {
    fn default() -> Self {
        Self {
            retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            jitter: false,
            rethrow_hook_errors: false,
            cancel_on_abort: false,
            on_retry: None,
        }
    }
}

impl<E> RetryPolicy<E> {
    /// Create a policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of retries after the first attempt.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the delay before the first retry.
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the upper bound for computed delays.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the exponential backoff factor.
    #[must_use]
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Enable or disable delay jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Install a retry hook.
    #[must_use]
    pub fn with_on_retry(
        mut self,
        hook: impl Fn(u32, &E, Duration) -> Result<RetryDirective, E> + Send + Sync + 'static,
    ) -> Self {
        self.on_retry = Some(Box::new(hook));
        self
    }

    /// Propagate hook errors instead of swallowing them.
    #[must_use]
    pub fn with_rethrow_hook_errors(mut self, rethrow: bool) -> Self {
        self.rethrow_hook_errors = rethrow;
        self
    }

    /// Honor [`RetryDirective::Abort`] from the hook.
    #[must_use]
    pub fn with_cancel_on_abort(mut self, cancel: bool) -> Self {
        self.cancel_on_abort = cancel;
        self
    }

    /// Compute the delay for the given 1-indexed retry:
    /// `min(max_delay, base_delay * backoff_factor^(retry - 1))`, then
    /// jittered to `[d, 2d)` when jitter is enabled.
    #[must_use]
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0);
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled = self.base_delay.as_secs_f64() * factor.powi(exponent);
        let capped = if scaled.is_finite() {
            scaled.min(self.max_delay.as_secs_f64())
        } else {
            self.max_delay.as_secs_f64()
        };
        if self.jitter && capped > 0.0 {
            use rand::Rng;
            Duration::from_secs_f64(rand::thread_rng().gen_range(capped..capped * 2.0))
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

/// Execute an async operation under a retry policy.
///
/// The operation runs up to `retries + 1` times. Between attempts the
/// executor waits for the backoff delay (or the hook's override), watching
/// `cancel` if supplied.
///
/// Cancellation resolves to `Ok(None)`:
/// - a token canceled before the first attempt skips the operation entirely;
/// - a token canceled during the backoff wait abandons the wait;
/// - a token canceled while an attempt is in flight lets the attempt finish
///   but schedules no further retries.
///
/// # Errors
///
/// Returns the last attempt's error once the retry budget is exhausted, the
/// original error when the hook aborts, or the hook's own error when the
/// policy rethrows hook errors.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy<E>,
    cancel: Option<&CancellationToken>,
    mut operation: F,
) -> Result<Option<T>, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    if cancel.is_some_and(CancellationToken::is_cancelled) {
        debug!("Canceled before first attempt, skipping operation");
        return Ok(None);
    }

    let total_attempts = policy.retries.saturating_add(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retry");
                }
                return Ok(Some(value));
            }
            Err(err) => {
                if attempt >= total_attempts {
                    warn!(
                        attempt,
                        error = %err,
                        "Operation failed after maximum attempts"
                    );
                    return Err(err);
                }

                if cancel.is_some_and(CancellationToken::is_cancelled) {
                    debug!(attempt, "Canceled during attempt, not retrying");
                    return Ok(None);
                }

                // `attempt` failed attempts so far make this retry number `attempt`.
                let mut delay = policy.delay_for_retry(attempt);
                if let Some(hook) = policy.on_retry.as_ref() {
                    match hook(attempt, &err, delay) {
                        Ok(RetryDirective::Continue) => {}
                        Ok(RetryDirective::DelayFor(d)) => delay = d.min(policy.max_delay),
                        Ok(RetryDirective::Abort) if policy.cancel_on_abort => {
                            debug!(attempt, "Retry aborted by hook");
                            return Err(err);
                        }
                        Ok(RetryDirective::Abort) => {}
                        Err(hook_err) => {
                            if policy.rethrow_hook_errors {
                                return Err(hook_err);
                            }
                            warn!(
                                attempt,
                                error = %hook_err,
                                "Retry hook failed, continuing with original schedule"
                            );
                        }
                    }
                }

                warn!(
                    attempt,
                    error = %err,
                    retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Operation failed, retrying"
                );

                match cancel {
                    Some(token) => {
                        tokio::select! {
                            () = token.cancelled() => {
                                debug!(attempt, "Canceled while waiting to retry");
                                return Ok(None);
                            }
                            () = tokio::time::sleep(delay) => {}
                        }
                    }
                    None => tokio::time::sleep(delay).await,
                }
            }
        }
    }
}
