//! Convergence request builder.

use std::time::Duration;

use tokio::sync::watch;

use crate::engine::{wait_for_state, Converged};
use crate::{ConvergenceError, Refresh, DEFAULT_GRACE_PERIOD, DEFAULT_NOT_FOUND_CHECKS, DEFAULT_TIMEOUT};

/// Everything one wait needs.
///
/// ```ignore
/// let done = ConvergenceRequest::new(ServerRefresh::new(compute, id))
///     .pending(["BUILD"])
///     .target(["ACTIVE"])
///     .timeout(Duration::from_secs(600))
///     .delay(Duration::from_secs(10))
///     .cancel_on(cancel.clone())
///     .wait()
///     .await?;
/// ```
pub struct ConvergenceRequest<R> {
    pub(crate) refresh: R,
    pub(crate) pending: Vec<String>,
    pub(crate) target: Vec<String>,
    pub(crate) timeout: Duration,
    pub(crate) delay: Duration,
    pub(crate) min_interval: Duration,
    pub(crate) poll_interval: Option<Duration>,
    pub(crate) not_found_checks: u32,
    pub(crate) continuous_target_occurrence: u32,
    pub(crate) grace_period: Duration,
    pub(crate) cancel: Option<watch::Receiver<bool>>,
}

impl<R: Refresh> ConvergenceRequest<R> {
    pub fn new(refresh: R) -> Self {
        Self {
            refresh,
            pending: Vec::new(),
            target: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            delay: Duration::ZERO,
            min_interval: Duration::ZERO,
            poll_interval: None,
            not_found_checks: DEFAULT_NOT_FOUND_CHECKS,
            continuous_target_occurrence: 1,
            grace_period: DEFAULT_GRACE_PERIOD,
            cancel: None,
        }
    }

    /// Labels meaning "still in progress". Any label outside pending and
    /// target fails the wait, unless pending is empty.
    pub fn pending<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pending = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Labels meaning "done". Leave empty to wait for the resource to
    /// disappear.
    pub fn target<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Zero keeps the default.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.timeout = timeout;
        }
        self
    }

    /// Wait before the first poll.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Floor for the backoff between polls.
    pub fn min_interval(mut self, min: Duration) -> Self {
        self.min_interval = min;
        self
    }

    /// Fixed interval between polls. Ignored unless strictly between zero
    /// and three minutes.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Zero keeps the default.
    pub fn not_found_checks(mut self, checks: u32) -> Self {
        if checks > 0 {
            self.not_found_checks = checks;
        }
        self
    }

    /// Number of consecutive target observations required. Zero means one.
    pub fn continuous_target_occurrence(mut self, count: u32) -> Self {
        self.continuous_target_occurrence = count.max(1);
        self
    }

    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Stop waiting once the receiver reads `true`.
    pub fn cancel_on(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub async fn wait(self) -> Result<Converged<R::Output>, ConvergenceError> {
        wait_for_state(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{refresh_fn, Observation};

    fn noop() -> impl Refresh<Output = ()> {
        refresh_fn(|| async { Ok::<_, crate::RefreshError>(Observation::found((), "ACTIVE")) })
    }

    #[test]
    fn test_defaults() {
        let req = ConvergenceRequest::new(noop());
        assert_eq!(req.timeout, DEFAULT_TIMEOUT);
        assert_eq!(req.not_found_checks, DEFAULT_NOT_FOUND_CHECKS);
        assert_eq!(req.continuous_target_occurrence, 1);
        assert_eq!(req.grace_period, DEFAULT_GRACE_PERIOD);
    }

    #[test]
    fn test_zero_values_keep_defaults() {
        let req = ConvergenceRequest::new(noop())
            .timeout(Duration::ZERO)
            .not_found_checks(0)
            .continuous_target_occurrence(0);
        assert_eq!(req.timeout, DEFAULT_TIMEOUT);
        assert_eq!(req.not_found_checks, DEFAULT_NOT_FOUND_CHECKS);
        assert_eq!(req.continuous_target_occurrence, 1);
    }

    #[test]
    fn test_labels() {
        let req = ConvergenceRequest::new(noop())
            .pending(["BUILD", "REBUILD"])
            .target(vec![String::from("ACTIVE")]);
        assert_eq!(req.pending, vec!["BUILD", "REBUILD"]);
        assert_eq!(req.target, vec!["ACTIVE"]);
    }
}
