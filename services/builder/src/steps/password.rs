use std::time::Duration;

use async_trait::async_trait;
use kiln_converge::ConvergenceRequest;
use tracing::debug;

use crate::error::StepError;
use crate::refresh::PasswordRefresh;
use crate::state::BuildState;
use crate::step::Step;
use crate::template::CommunicatorKind;

/// Retrieves the generated administrator password of a WinRM instance.
#[derive(Debug, Default)]
pub struct GetPassword;

#[async_trait]
impl Step for GetPassword {
    fn name(&self) -> &'static str {
        "get-password"
    }

    async fn run(&mut self, state: &mut BuildState) -> Result<(), StepError> {
        let comm = &state.config.run.communicator;
        if comm.kind != CommunicatorKind::Winrm {
            debug!("not using winrm communicator, skipping get password");
            return Ok(());
        }
        if let Some(password) = comm.password.clone().filter(|p| !p.is_empty()) {
            state
                .ui
                .say("Skipping waiting for password since WinRM password set...");
            state.admin_password = Some(password);
            return Ok(());
        }

        state
            .ui
            .say("Waiting for password since WinRM password is not set...");
        let private_key = state
            .keypair
            .as_ref()
            .and_then(|k| k.private_key.clone())
            .ok_or_else(|| {
                StepError::failed("Error getting the encrypted password: no private key available")
            })?;
        let server_id = state.require_server()?.to_string();

        let done = ConvergenceRequest::new(PasswordRefresh::new(
            state.cloud.compute.clone(),
            &server_id,
        ))
        .pending(["PENDING"])
        .target(["SUCCESS"])
        .timeout(Duration::from_secs(10 * 60))
        .delay(Duration::from_secs(30))
        .poll_interval(Duration::from_secs(10))
        .cancel_on(state.cancel_signal())
        .wait()
        .await
        .map_err(|e| StepError::wait("Error getting the encrypted password", e))?;
        let encrypted = done.resource.unwrap_or_default();

        let password = state
            .decryptor
            .decrypt(&encrypted, &private_key)
            .map_err(|e| StepError::cloud("Error decrypting the password", e))?;
        state.ui.message("Password retrieved!");
        state.admin_password = Some(password);
        Ok(())
    }
}
