//! The polling state machine.
//!
//! The poll loop runs on its own task and reports every observation to the
//! caller over a channel. The caller owns the deadline; when it passes, the
//! loop is told to stop and given a grace period to deliver a late result.

use std::future;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, error, trace, warn};

use crate::{
    Backoff, ConvergenceError, ConvergenceRequest, Observation, Refresh, RefreshError,
    TimeoutError,
};

/// A successful wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Converged<T> {
    /// Final representation. `None` when the wait was for disappearance.
    pub resource: Option<T>,
    /// Final state label.
    pub state: String,
    /// Number of refresh calls made, including the converging one.
    pub polls: u32,
}

enum PollEvent<T> {
    Observed { state: String },
    Converged(Converged<T>),
    Failed(ConvergenceError),
}

/// Polls `request.refresh` until it reports a target state, fails, is
/// cancelled, or the timeout passes.
pub async fn wait_for_state<R: Refresh>(
    request: ConvergenceRequest<R>,
) -> Result<Converged<R::Output>, ConvergenceError> {
    let ConvergenceRequest {
        refresh,
        pending,
        target,
        timeout,
        delay,
        min_interval,
        poll_interval,
        not_found_checks,
        continuous_target_occurrence,
        grace_period,
        cancel,
    } = request;

    debug!(
        ?pending,
        ?target,
        ?timeout,
        ?delay,
        "waiting for state"
    );

    let deadline = Instant::now() + timeout;
    let (stop_tx, stop_rx) = watch::channel(false);
    let (events_tx, mut events_rx) = mpsc::channel(1);

    let cancel = cancel.unwrap_or_else(|| watch::channel(false).1);
    let mut cancelled = cancel.clone();
    let poller = Poller {
        refresh,
        pending,
        target: target.clone(),
        delay,
        backoff: Backoff::new(min_interval, poll_interval),
        not_found_checks,
        continuous_target_occurrence,
    };
    tokio::spawn(poller.run(events_tx, stop_rx, cancel));

    let mut last_state = String::new();
    loop {
        tokio::select! {
            event = events_rx.recv() => match event {
                Some(PollEvent::Observed { state }) => last_state = state,
                Some(PollEvent::Converged(done)) => return Ok(done),
                Some(PollEvent::Failed(err)) => return Err(err),
                None => {
                    return Err(ConvergenceError::Refresh {
                        state: non_empty(last_state),
                        source: RefreshError::new("polling task ended before reaching a result"),
                    });
                }
            },
            _ = sleep_until(deadline) => break,
        }
    }

    warn!(
        last_state = %last_state,
        ?timeout,
        ?grace_period,
        "wait timed out, allowing in-flight poll to finish"
    );
    let _ = stop_tx.send(true);

    let mut last_error = None;
    let grace = sleep(grace_period);
    tokio::pin!(grace);
    loop {
        tokio::select! {
            biased;
            _ = signalled(&mut cancelled) => {
                debug!("wait cancelled during grace period");
                return Err(ConvergenceError::Cancelled);
            }
            event = events_rx.recv() => match event {
                Some(PollEvent::Observed { state }) => last_state = state,
                Some(PollEvent::Converged(done)) => {
                    debug!(state = %done.state, "converged during grace period");
                    return Ok(done);
                }
                Some(PollEvent::Failed(err)) if err.is_cancelled() => return Err(err),
                Some(PollEvent::Failed(err)) => {
                    if let Some(state) = err.last_state() {
                        last_state = state.to_string();
                    }
                    last_error = Some(err.to_string());
                }
                None => break,
            },
            _ = &mut grace => break,
        }
    }

    if *cancelled.borrow() {
        return Err(ConvergenceError::Cancelled);
    }
    error!(
        last_state = %last_state,
        last_error = last_error.as_deref().unwrap_or(""),
        ?timeout,
        "grace period exhausted without convergence"
    );
    Err(TimeoutError {
        last_state,
        last_error,
        timeout,
        targets: target,
    }
    .into())
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

/// Resolves once `true` is published, or never if the sender is gone.
async fn signalled(rx: &mut watch::Receiver<bool>) {
    let fired = rx.wait_for(|set| *set).await.map(|_| ());
    if fired.is_err() {
        future::pending::<()>().await;
    }
}

/// Resolves once `true` is published or the sender is dropped.
async fn stopped(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|set| *set).await.map(|_| ());
}

// =============================================================================
// Poll loop
// =============================================================================

struct Poller<R> {
    refresh: R,
    pending: Vec<String>,
    target: Vec<String>,
    delay: Duration,
    backoff: Backoff,
    not_found_checks: u32,
    continuous_target_occurrence: u32,
}

impl<R: Refresh> Poller<R> {
    async fn run(
        mut self,
        events: mpsc::Sender<PollEvent<R::Output>>,
        mut stop: watch::Receiver<bool>,
        mut cancel: watch::Receiver<bool>,
    ) {
        if !self.delay.is_zero() {
            tokio::select! {
                biased;
                _ = signalled(&mut cancel) => {
                    let _ = events.send(PollEvent::Failed(ConvergenceError::Cancelled)).await;
                    return;
                }
                _ = stopped(&mut stop) => return,
                _ = sleep(self.delay) => {}
            }
        }

        let mut polls = 0u32;
        let mut not_found = 0u32;
        let mut occurrences = 0u32;
        let mut last_state = String::new();

        loop {
            if *cancel.borrow() {
                debug!(polls, "wait cancelled");
                let _ = events.send(PollEvent::Failed(ConvergenceError::Cancelled)).await;
                return;
            }
            if *stop.borrow() {
                return;
            }

            polls += 1;
            let observation = match self.refresh.refresh().await {
                Ok(observation) => observation,
                Err(source) => {
                    let state = source
                        .state()
                        .map(str::to_string)
                        .or_else(|| non_empty(last_state.clone()));
                    let _ = events
                        .send(PollEvent::Failed(ConvergenceError::Refresh { state, source }))
                        .await;
                    return;
                }
            };
            debug!(state = %observation.state, polls, "observed");
            last_state = observation.state.clone();

            match self.classify(observation, polls, &mut not_found, &mut occurrences) {
                Some(event) => {
                    let _ = events.send(event).await;
                    return;
                }
                None => {
                    let observed = PollEvent::Observed {
                        state: last_state.clone(),
                    };
                    if events.send(observed).await.is_err() {
                        return;
                    }
                }
            }

            let wait = self.backoff.next(occurrences == 0);
            trace!(?wait, "next poll");
            tokio::select! {
                biased;
                _ = signalled(&mut cancel) => {
                    let _ = events.send(PollEvent::Failed(ConvergenceError::Cancelled)).await;
                    return;
                }
                _ = stopped(&mut stop) => return,
                _ = sleep(wait) => {}
            }
        }
    }

    /// Decides whether one observation ends the wait.
    fn classify(
        &self,
        observation: Observation<R::Output>,
        polls: u32,
        not_found: &mut u32,
        occurrences: &mut u32,
    ) -> Option<PollEvent<R::Output>> {
        let Observation { resource, state } = observation;

        if resource.is_none() {
            if self.target.is_empty() {
                *occurrences += 1;
                if *occurrences >= self.continuous_target_occurrence {
                    return Some(PollEvent::Converged(Converged {
                        resource: None,
                        state,
                        polls,
                    }));
                }
                return None;
            }

            *not_found += 1;
            if *not_found > self.not_found_checks {
                return Some(PollEvent::Failed(ConvergenceError::NotFound {
                    retries: *not_found,
                }));
            }
            return None;
        }

        *not_found = 0;
        if self.target.contains(&state) {
            *occurrences += 1;
            if *occurrences >= self.continuous_target_occurrence {
                return Some(PollEvent::Converged(Converged {
                    resource,
                    state,
                    polls,
                }));
            }
            return None;
        }

        if self.pending.contains(&state) {
            *occurrences = 0;
            return None;
        }

        if !self.pending.is_empty() {
            return Some(PollEvent::Failed(ConvergenceError::UnexpectedState {
                state,
                targets: self.target.clone(),
            }));
        }

        None
    }
}
