//! Sequential step runner with reverse-order rollback.

use tracing::{debug, error, info, warn};

use crate::error::{BuildError, StepError};
use crate::state::BuildState;
use crate::step::{Step, StepPolicy};

/// What to do with created resources when a build fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OnError {
    /// Roll back every step that ran.
    #[default]
    Cleanup,
    /// Leave everything in place for inspection.
    Abort,
}

/// Runs steps in order against one [`BuildState`].
///
/// When a required step fails, that step and every step before it are
/// cleaned up in reverse order; later steps are never run. A successful build
/// also runs every cleanup in reverse so temporary resources go away once the
/// image exists.
pub struct Pipeline {
    steps: Vec<Box<dyn Step>>,
    on_error: OnError,
}

impl Pipeline {
    pub fn new(steps: Vec<Box<dyn Step>>) -> Self {
        Self {
            steps,
            on_error: OnError::default(),
        }
    }

    pub fn on_error(mut self, on_error: OnError) -> Self {
        self.on_error = on_error;
        self
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&mut self, state: &mut BuildState) -> Result<(), BuildError> {
        let mut executed = 0;
        let mut failure = None;

        for step in self.steps.iter_mut() {
            let name = step.name();
            if state.is_cancelled() {
                warn!(step = name, "build cancelled, not starting step");
                failure = Some(BuildError::Cancelled);
                break;
            }

            executed += 1;
            debug!(step = name, "running step");
            let Err(err) = step.run(state).await else {
                continue;
            };

            if step.policy() == StepPolicy::BestEffort && !err.is_cancelled() {
                warn!(step = name, error = %err, "best-effort step failed, continuing");
                state.ui.message(&format!("WARN: {err}"));
                continue;
            }

            error!(step = name, error = %err, "step failed, halting build");
            failure = Some(halt(name, err));
            break;
        }

        let ran = &mut self.steps[..executed];
        if failure.is_some() && self.on_error == OnError::Abort {
            let left: Vec<_> = ran
                .iter()
                .rev()
                .flat_map(|s| s.owned())
                .filter(|h| h.is_live())
                .collect();
            for handle in &left {
                state
                    .ui
                    .error(&format!("Leaving {handle} in place (on-error = abort)"));
            }
            info!(resources = left.len(), "skipping cleanup");
        } else {
            for step in ran.iter_mut().rev() {
                debug!(step = step.name(), "cleaning up step");
                step.cleanup(state).await;
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn halt(step: &'static str, err: StepError) -> BuildError {
    if err.is_cancelled() {
        BuildError::Cancelled
    } else {
        BuildError::Step { step, source: err }
    }
}
