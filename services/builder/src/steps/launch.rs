use std::time::Duration;

use async_trait::async_trait;
use kiln_cloud::models::{BootSource, RootVolume, ServerSpec};
use kiln_converge::ConvergenceRequest;
use kiln_id::{ResourceHandle, ResourceKind};
use tracing::{info, warn};

use crate::error::StepError;
use crate::refresh::ServerRefresh;
use crate::state::BuildState;
use crate::step::Step;
use crate::template::RunConfig;

const LAUNCH_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// States a server may be in while a delete is under way.
const DELETING_STATES: [&str; 7] = [
    "ACTIVE",
    "BUILD",
    "REBUILD",
    "SUSPENDED",
    "SHUTOFF",
    "STOPPED",
    "ERROR",
];

/// Launches the temporary server and waits for it to become `ACTIVE`.
#[derive(Debug, Default)]
pub struct LaunchInstance {
    server: Option<ResourceHandle>,
}

impl LaunchInstance {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Step for LaunchInstance {
    fn name(&self) -> &'static str {
        "launch-instance"
    }

    async fn run(&mut self, state: &mut BuildState) -> Result<(), StepError> {
        let run = state.config.run.clone();
        let spec = ServerSpec {
            name: run.instance_name.clone(),
            boot: match &state.boot_volume_id {
                Some(volume_id) => BootSource::Volume {
                    volume_id: volume_id.clone(),
                },
                None => BootSource::Image {
                    image_id: state.require_source_image()?.id.clone(),
                },
            },
            flavor_id: state.require_flavor()?.to_string(),
            availability_zone: state.require_zone()?.to_string(),
            vpc_id: state.require_vpc()?.to_string(),
            subnet_ids: state.subnet_ids.clone(),
            security_groups: run.security_groups.clone(),
            key_name: state.keypair.as_ref().map(|k| k.name.clone()),
            admin_password: run.communicator.password.clone(),
            user_data: user_data(&run).await?,
            config_drive: run.config_drive,
            metadata: run.instance_metadata.clone(),
            root_volume: root_volume(&run, state.boot_volume_id.is_some()),
        };

        state
            .ui
            .say(&format!("Launching server in az:{} ...", spec.availability_zone));
        let compute = state.cloud.compute.clone();
        let server = compute
            .create_server(&spec)
            .await
            .map_err(|e| StepError::cloud("Error launching source server", e))?;
        self.server = Some(ResourceHandle::new(ResourceKind::Server, &server.id));
        state.server_id = Some(server.id.clone());
        state.ui.message(&format!("Server ID: {}", server.id));

        state.ui.say("Waiting for server to become ready...");
        let ready = ConvergenceRequest::new(ServerRefresh::new(compute, &server.id))
            .pending(["BUILD"])
            .target(["ACTIVE"])
            .timeout(LAUNCH_TIMEOUT)
            .min_interval(Duration::from_secs(2))
            .cancel_on(state.cancel_signal())
            .wait()
            .await
            .map_err(|e| {
                StepError::wait(
                    format!("Error waiting for server ({}) to become ready", server.id),
                    e,
                )
            })?;
        info!(server_id = %server.id, polls = ready.polls, "server active");
        Ok(())
    }

    async fn cleanup(&mut self, state: &mut BuildState) {
        let Some(handle) = self.server.take() else {
            return;
        };
        let Some(server_id) = handle.live_id() else {
            return;
        };
        let compute = state.cloud.compute.clone();

        state
            .ui
            .say(&format!("Terminating the source server: {server_id} ..."));
        match compute.delete_server(server_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return,
            Err(e) => {
                warn!(server_id, error = %e, "failed to delete server");
                state
                    .ui
                    .error(&format!("Error terminating server, may still be around: {e}"));
                return;
            }
        }

        let gone = ConvergenceRequest::new(ServerRefresh::new(compute, server_id).tolerate_error())
            .pending(DELETING_STATES)
            .target(Vec::<String>::new())
            .timeout(LAUNCH_TIMEOUT)
            .min_interval(Duration::from_secs(2))
            .wait()
            .await;
        if let Err(e) = gone {
            warn!(server_id, error = %e, "server delete not confirmed");
            state.ui.error(&format!(
                "Error waiting for server {server_id} to be deleted, may still be around: {e}"
            ));
        }
    }

    fn owned(&self) -> Vec<ResourceHandle> {
        self.server.iter().cloned().collect()
    }
}

async fn user_data(run: &RunConfig) -> Result<Option<String>, StepError> {
    match &run.user_data_file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .map(Some)
            .map_err(|e| StepError::failed(format!("Error reading user data file: {e}"))),
        None => Ok(run.user_data.clone().filter(|s| !s.is_empty())),
    }
}

/// Root disk settings for an image-booted server. A volume-booted server
/// takes its root disk from the volume.
fn root_volume(run: &RunConfig, boots_from_volume: bool) -> Option<RootVolume> {
    if boots_from_volume {
        return None;
    }
    let volume_type = run.volume_type.clone().filter(|t| !t.is_empty());
    if volume_type.is_none() && run.volume_size == 0 {
        return None;
    }
    Some(RootVolume {
        volume_type: volume_type.unwrap_or_else(|| "SSD".to_string()),
        size_gb: (run.volume_size > 0).then_some(run.volume_size),
    })
}
