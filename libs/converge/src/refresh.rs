//! Observing a single remote resource.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

/// The result of one observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation<T> {
    /// The current representation, or `None` when the resource does not exist.
    pub resource: Option<T>,
    /// The provider's state label, e.g. `ACTIVE`, `BUILD`, `DELETED`.
    pub state: String,
}

impl<T> Observation<T> {
    /// The resource exists and reports `state`.
    pub fn found(resource: T, state: impl Into<String>) -> Self {
        Self {
            resource: Some(resource),
            state: state.into(),
        }
    }

    /// The resource does not exist. `state` is carried for diagnostics only.
    pub fn absent(state: impl Into<String>) -> Self {
        Self {
            resource: None,
            state: state.into(),
        }
    }

    pub fn is_absent(&self) -> bool {
        self.resource.is_none()
    }
}

/// A failed observation.
///
/// The optional state label lets a refresh report "the job is `FAIL`" while
/// still ending the wait.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RefreshError {
    state: Option<String>,
    message: String,
}

impl RefreshError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            state: None,
            message: message.into(),
        }
    }

    pub fn with_state(state: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            state: Some(state.into()),
            message: message.into(),
        }
    }

    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// One observation of a remote resource.
///
/// Implementations are polled strictly sequentially by one wait and are
/// moved into the polling task, so they must own everything they touch.
#[async_trait]
pub trait Refresh: Send + 'static {
    type Output: Send + 'static;

    async fn refresh(&mut self) -> Result<Observation<Self::Output>, RefreshError>;
}

/// Adapter turning an async closure into a [`Refresh`].
pub struct FnRefresh<F, T> {
    f: F,
    _output: PhantomData<fn() -> T>,
}

/// Wraps `f` so it can be handed to a [`crate::ConvergenceRequest`].
pub fn refresh_fn<F, Fut, T>(f: F) -> FnRefresh<F, T>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Observation<T>, RefreshError>> + Send,
    T: Send + 'static,
{
    FnRefresh {
        f,
        _output: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, T> Refresh for FnRefresh<F, T>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Observation<T>, RefreshError>> + Send,
    T: Send + 'static,
{
    type Output = T;

    async fn refresh(&mut self) -> Result<Observation<T>, RefreshError> {
        (self.f)().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observation_constructors() {
        let found = Observation::found(7u32, "ACTIVE");
        assert!(!found.is_absent());
        assert_eq!(found.state, "ACTIVE");

        let absent: Observation<u32> = Observation::absent("DELETED");
        assert!(absent.is_absent());
    }

    #[test]
    fn test_refresh_error_state() {
        let err = RefreshError::with_state("FAIL", "disk quota exceeded");
        assert_eq!(err.state(), Some("FAIL"));
        assert_eq!(err.to_string(), "disk quota exceeded");
        assert_eq!(RefreshError::new("boom").state(), None);
    }

    #[tokio::test]
    async fn test_refresh_fn_counts_calls() {
        let mut calls = 0u32;
        let mut refresh = refresh_fn(move || {
            calls += 1;
            let n = calls;
            async move { Ok::<_, RefreshError>(Observation::found(n, "BUILD")) }
        });

        assert_eq!(refresh.refresh().await.unwrap().resource, Some(1));
        assert_eq!(refresh.refresh().await.unwrap().resource, Some(2));
    }
}
