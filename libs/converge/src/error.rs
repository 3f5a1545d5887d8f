//! Wait outcomes other than success.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::RefreshError;

/// Why a wait ended without the resource converging.
#[derive(Debug, Error)]
pub enum ConvergenceError {
    /// The refresh function itself failed. Ends the wait immediately.
    #[error("{source}")]
    Refresh {
        /// Last state label known when the error happened, if any.
        state: Option<String>,
        #[source]
        source: RefreshError,
    },

    /// The resource reported a label that is neither pending nor target.
    #[error("unexpected state '{state}', wanted target '{}'", targets.join(", "))]
    UnexpectedState { state: String, targets: Vec<String> },

    /// The resource stayed absent for more consecutive polls than allowed.
    #[error("couldn't find resource ({retries} retries)")]
    NotFound { retries: u32 },

    /// The deadline passed before the target was reached.
    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    /// The caller's cancellation signal fired.
    #[error("wait cancelled")]
    Cancelled,
}

impl ConvergenceError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ConvergenceError::Timeout(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ConvergenceError::Cancelled)
    }

    /// Last state label observed before the wait ended, when known.
    pub fn last_state(&self) -> Option<&str> {
        match self {
            ConvergenceError::Refresh { state, .. } => state.as_deref(),
            ConvergenceError::UnexpectedState { state, .. } => Some(state),
            ConvergenceError::Timeout(err) => {
                (!err.last_state.is_empty()).then_some(err.last_state.as_str())
            }
            ConvergenceError::NotFound { .. } | ConvergenceError::Cancelled => None,
        }
    }
}

/// The deadline passed before the resource converged.
#[derive(Debug, Clone, Error)]
pub struct TimeoutError {
    /// Last state label observed, empty when nothing was observed.
    pub last_state: String,
    /// Last error raised by the poll loop after the deadline, if any.
    pub last_error: Option<String>,
    pub timeout: Duration,
    pub targets: Vec<String>,
}

impl fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.targets.is_empty() {
            f.write_str("timeout while waiting for resource to be gone")?;
        } else {
            write!(
                f,
                "timeout while waiting for state to become '{}'",
                self.targets.join(", ")
            )?;
        }

        let mut details = Vec::new();
        if !self.last_state.is_empty() {
            details.push(format!("last state: '{}'", self.last_state));
        }
        if !self.timeout.is_zero() {
            details.push(format!("timeout: {:?}", self.timeout));
        }
        if !details.is_empty() {
            write!(f, " ({})", details.join(", "))?;
        }

        if let Some(err) = &self.last_error {
            write!(f, ": {err}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = TimeoutError {
            last_state: "BUILD".into(),
            last_error: None,
            timeout: Duration::from_secs(300),
            targets: vec!["ACTIVE".into()],
        };
        assert_eq!(
            err.to_string(),
            "timeout while waiting for state to become 'ACTIVE' (last state: 'BUILD', timeout: 300s)"
        );
    }

    #[test]
    fn test_timeout_display_for_disappearance() {
        let err = TimeoutError {
            last_state: "ACTIVE".into(),
            last_error: None,
            timeout: Duration::from_secs(10),
            targets: Vec::new(),
        };
        assert_eq!(
            err.to_string(),
            "timeout while waiting for resource to be gone (last state: 'ACTIVE', timeout: 10s)"
        );
    }

    #[test]
    fn test_timeout_display_with_error() {
        let err = TimeoutError {
            last_state: String::new(),
            last_error: Some("connection reset".into()),
            timeout: Duration::ZERO,
            targets: vec!["SHUTOFF".into(), "STOPPED".into()],
        };
        assert_eq!(
            err.to_string(),
            "timeout while waiting for state to become 'SHUTOFF, STOPPED': connection reset"
        );
    }

    #[test]
    fn test_unexpected_state_display() {
        let err = ConvergenceError::UnexpectedState {
            state: "ERROR".into(),
            targets: vec!["ACTIVE".into()],
        };
        assert_eq!(
            err.to_string(),
            "unexpected state 'ERROR', wanted target 'ACTIVE'"
        );
        assert_eq!(err.last_state(), Some("ERROR"));
    }

    #[test]
    fn test_predicates() {
        assert!(ConvergenceError::Cancelled.is_cancelled());
        assert!(!ConvergenceError::NotFound { retries: 3 }.is_timeout());
        assert_eq!(
            ConvergenceError::NotFound { retries: 20 }.to_string(),
            "couldn't find resource (20 retries)"
        );
    }
}
