use std::path::Path;

use async_trait::async_trait;
use kiln_id::{ResourceHandle, ResourceKind};
use tracing::{debug, warn};

use crate::error::StepError;
use crate::state::{BuildState, KeypairInfo};
use crate::step::Step;
use crate::template::CommunicatorKind;

/// Sets up the keypair the instance is launched with.
///
/// - With `ssh_private_key_file`, registers its public half as a temporary
///   keypair.
/// - With `ssh_keypair_name`, uses that keypair as is.
/// - Otherwise, unless a password is used, has the cloud generate a
///   temporary keypair and keeps the private key.
///
/// Only temporary keypairs are deleted on cleanup.
#[derive(Debug, Default)]
pub struct SetupKeypair {
    temporary: Option<ResourceHandle>,
}

impl SetupKeypair {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Step for SetupKeypair {
    fn name(&self) -> &'static str {
        "keypair"
    }

    async fn run(&mut self, state: &mut BuildState) -> Result<(), StepError> {
        let comm = state.config.run.communicator.clone();
        if comm.kind == CommunicatorKind::None {
            state.ui.say("Not using temporary keypair");
            return Ok(());
        }

        let temp_name = comm
            .temporary_key_pair_name
            .clone()
            .unwrap_or_else(|| state.build_id.keypair_name());

        if let Some(private_path) = &comm.ssh_private_key_file {
            state.ui.say("Using existing SSH private key");
            let private_key = read_key(private_path, "ssh_private_key_file").await?;

            if let Some(existing) = &comm.ssh_keypair_name {
                state
                    .ui
                    .message(&format!("Using existing keypair {existing}"));
                state.keypair = Some(KeypairInfo {
                    name: existing.clone(),
                    private_key: Some(private_key),
                    temporary: false,
                });
                return Ok(());
            }

            let public_path = comm
                .public_key_path()
                .ok_or(StepError::MissingState("ssh_public_key_file"))?;
            let public_key = read_key(&public_path, "ssh_public_key_file").await?;

            state.ui.say(&format!(
                "Creating temporary keypair using provided private key: {temp_name}..."
            ));
            let keypair = state
                .cloud
                .compute
                .create_keypair(&temp_name, Some(public_key.trim()))
                .await
                .map_err(|e| StepError::cloud("Error creating temporary keypair", e))?;
            self.temporary = Some(ResourceHandle::new(ResourceKind::Keypair, &keypair.name));
            state
                .ui
                .say(&format!("Created temporary keypair: {}", keypair.name));

            state.keypair = Some(KeypairInfo {
                name: keypair.name,
                private_key: Some(private_key),
                temporary: true,
            });
            return Ok(());
        }

        if let Some(existing) = &comm.ssh_keypair_name {
            state
                .ui
                .say(&format!("Using existing keypair {existing}"));
            state.keypair = Some(KeypairInfo {
                name: existing.clone(),
                private_key: None,
                temporary: false,
            });
            return Ok(());
        }

        if !comm.wants_temporary_keypair() {
            state.ui.say("Not using temporary keypair");
            return Ok(());
        }

        state
            .ui
            .say(&format!("Creating temporary keypair: {temp_name}..."));
        let keypair = state
            .cloud
            .compute
            .create_keypair(&temp_name, None)
            .await
            .map_err(|e| StepError::cloud("Error creating temporary keypair", e))?;
        self.temporary = Some(ResourceHandle::new(ResourceKind::Keypair, &keypair.name));

        let private_key = keypair
            .private_key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| StepError::failed("The temporary keypair returned was blank"))?;
        state
            .ui
            .say(&format!("Created temporary keypair: {}", keypair.name));

        if let Some(path) = &comm.debug_key_path {
            state
                .ui
                .message(&format!("Saving key for debug purposes: {}", path.display()));
            write_private_key(path, &private_key).await?;
        }

        state.keypair = Some(KeypairInfo {
            name: keypair.name,
            private_key: Some(private_key),
            temporary: true,
        });
        Ok(())
    }

    async fn cleanup(&mut self, state: &mut BuildState) {
        let Some(handle) = self.temporary.take() else {
            return;
        };
        let Some(keypair) = handle.live_id() else {
            return;
        };

        state.ui.say("Deleting temporary keypair...");
        match state.cloud.compute.delete_keypair(keypair).await {
            Ok(()) => debug!(keypair, "temporary keypair deleted"),
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                warn!(keypair, error = %e, "failed to delete keypair");
                state.ui.error(&format!(
                    "Error cleaning up keypair. Please delete the key manually: {keypair}"
                ));
            }
        }
    }

    fn owned(&self) -> Vec<ResourceHandle> {
        self.temporary.iter().cloned().collect()
    }
}

async fn read_key(path: &Path, field: &str) -> Result<String, StepError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| StepError::failed(format!("Error reading '{field}' {}: {e}", path.display())))
}

async fn write_private_key(path: &Path, key: &str) -> Result<(), StepError> {
    let save_err = |e: std::io::Error| StepError::failed(format!("Error saving debug key: {e}"));
    tokio::fs::write(path, key).await.map_err(save_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|e| {
                StepError::failed(format!("Error setting permissions of debug key: {e}"))
            })?;
    }
    Ok(())
}
