//! The provisioning step contract.

use async_trait::async_trait;
use kiln_id::ResourceHandle;

use crate::error::StepError;
use crate::state::BuildState;

/// How the pipeline treats a failed `run`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StepPolicy {
    /// A failure halts the build and rolls back.
    #[default]
    Required,
    /// A failure is reported as a warning and the build carries on.
    BestEffort,
}

/// One unit of provisioning work with its compensating cleanup.
///
/// `cleanup` runs during rollback even when `run` never got far enough to
/// create anything, so it must treat unset handles as a no-op, and it must be
/// safe to call more than once. Remote "not found" on delete counts as done.
#[async_trait]
pub trait Step: Send {
    /// Stable name used in logs and errors.
    fn name(&self) -> &'static str;

    fn policy(&self) -> StepPolicy {
        StepPolicy::Required
    }

    async fn run(&mut self, state: &mut BuildState) -> Result<(), StepError>;

    /// Undo what `run` created. Failures are reported through the UI, never
    /// returned.
    async fn cleanup(&mut self, _state: &mut BuildState) {}

    /// Remote resources this step created that still exist.
    fn owned(&self) -> Vec<ResourceHandle> {
        Vec::new()
    }
}
