//! Test helpers for kiln crates.
//!
//! [`ScriptedRefresh`] replays a fixed sequence of observations so wait
//! behavior can be asserted without a cloud, and [`init_test_tracing`] wires
//! log output into the test harness.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kiln_converge::{Observation, Refresh, RefreshError};

/// One scripted refresh response.
#[derive(Debug, Clone)]
pub struct Scripted<T> {
    latency: Duration,
    result: Result<Observation<T>, RefreshError>,
}

impl<T> Scripted<T> {
    pub fn found(resource: T, state: &str) -> Self {
        Self {
            latency: Duration::ZERO,
            result: Ok(Observation::found(resource, state)),
        }
    }

    pub fn absent() -> Self {
        Self {
            latency: Duration::ZERO,
            result: Ok(Observation::absent("")),
        }
    }

    pub fn error(err: RefreshError) -> Self {
        Self {
            latency: Duration::ZERO,
            result: Err(err),
        }
    }

    /// Delay the response, simulating a slow API call.
    pub fn after(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

/// A refresh that replays a script. The last entry repeats forever.
pub struct ScriptedRefresh<T> {
    script: VecDeque<Scripted<T>>,
    calls: Arc<AtomicU32>,
}

impl<T: Clone> ScriptedRefresh<T> {
    pub fn new(script: impl IntoIterator<Item = Scripted<T>>) -> Self {
        Self {
            script: script.into_iter().collect(),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Shared counter of refresh calls, readable after the refresh has been
    /// moved into a wait.
    pub fn calls(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.calls)
    }

    /// Shorthand for a script of labels on a present resource.
    pub fn states(resource: T, states: &[&str]) -> Self {
        Self::new(
            states
                .iter()
                .map(|state| Scripted::found(resource.clone(), state)),
        )
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Refresh for ScriptedRefresh<T> {
    type Output = T;

    async fn refresh(&mut self) -> Result<Observation<T>, RefreshError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let step = if self.script.len() > 1 {
            self.script.pop_front()
        } else {
            self.script.front().cloned()
        };
        let Some(step) = step else {
            return Err(RefreshError::new("script exhausted"));
        };

        if !step.latency.is_zero() {
            tokio::time::sleep(step.latency).await;
        }
        step.result
    }
}

/// Installs a test-friendly subscriber once. Honours `RUST_LOG`.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}
