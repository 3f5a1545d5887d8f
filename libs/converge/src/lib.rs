//! State-convergence primitives.
//!
//! Cloud APIs are eventually consistent: a resource that was just created
//! reports `BUILD` or `CREATING` for a while, a delete takes seconds to show up
//! as "not found", and long-running operations are modelled as jobs that must
//! be polled separately. This crate provides the one primitive every
//! provisioning step uses to cope with that: [`wait_for_state`].
//!
//! Key concepts:
//!
//! - **Refresh function** ([`Refresh`]): performs one observation of one
//!   remote resource and reports its state label.
//! - **Convergence request** ([`ConvergenceRequest`]): pending and target
//!   labels, timeout, initial delay, poll cadence, not-found tolerance. Built
//!   fresh for every wait.
//! - **Outcome**: exactly one of success ([`Converged`]), timeout
//!   ([`TimeoutError`]), or a hard error/cancellation ([`ConvergenceError`]).
//!
//! # Invariants
//!
//! - Polls of one wait are strictly sequential.
//! - Cancellation is observed between polls, never mid-poll.
//! - On timeout the poll loop is signalled to stop, not aborted; one in-flight
//!   observation may still land within the grace period and win.

mod backoff;
mod engine;
mod error;
mod refresh;
mod request;

use std::time::Duration;

pub use backoff::Backoff;
pub use engine::{wait_for_state, Converged};
pub use error::{ConvergenceError, TimeoutError};
pub use refresh::{refresh_fn, FnRefresh, Observation, Refresh, RefreshError};
pub use request::ConvergenceRequest;

/// Default number of consecutive "not found" observations tolerated.
pub const DEFAULT_NOT_FOUND_CHECKS: u32 = 20;

/// Default overall timeout for a wait.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// How long an in-flight poll may still land after the timeout fires.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// First backoff step.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Ceiling for the exponential backoff.
pub const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Explicit poll intervals at or above this are ignored in favour of backoff.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(180);
