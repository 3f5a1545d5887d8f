use std::time::Duration;

use async_trait::async_trait;
use kiln_converge::ConvergenceRequest;
use tracing::warn;

use crate::error::StepError;
use crate::refresh::ServerRefresh;
use crate::state::BuildState;
use crate::step::Step;

/// Stops the server before capture.
///
/// An image can be taken from a running server, so neither a rejected stop
/// nor a slow one halts the build.
#[derive(Debug, Default)]
pub struct StopInstance;

#[async_trait]
impl Step for StopInstance {
    fn name(&self) -> &'static str {
        "stop-instance"
    }

    async fn run(&mut self, state: &mut BuildState) -> Result<(), StepError> {
        let server_id = state.require_server()?.to_string();
        let compute = state.cloud.compute.clone();

        state.ui.say(&format!("Stopping server: {server_id} ..."));
        if let Err(e) = compute.stop_server(&server_id).await {
            warn!(server_id = %server_id, error = %e, "failed to stop server");
            state
                .ui
                .message(&format!("WARN: failed to stop server: {e}"));
            return Ok(());
        }

        state
            .ui
            .message(&format!("Waiting for server to stop: {server_id} ..."));
        let stopped = ConvergenceRequest::new(ServerRefresh::new(compute, &server_id))
            .pending(["ACTIVE"])
            .target(["SHUTOFF", "STOPPED"])
            .timeout(Duration::from_secs(180))
            .delay(Duration::from_secs(5))
            .poll_interval(Duration::from_secs(5))
            .cancel_on(state.cancel_signal())
            .wait()
            .await;
        match stopped {
            Ok(_) => Ok(()),
            Err(e) if e.is_cancelled() => Err(StepError::wait("Error stopping server", e)),
            Err(e) => {
                warn!(server_id = %server_id, error = %e, "error waiting for server to stop");
                state.ui.message(&format!(
                    "WARN: error waiting for server ({server_id}) to stop: {e}"
                ));
                Ok(())
            }
        }
    }
}
