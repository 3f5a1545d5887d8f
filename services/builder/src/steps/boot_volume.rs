use std::time::Duration;

use async_trait::async_trait;
use kiln_cloud::models::{VolumeSource, VolumeSpec};
use kiln_converge::{ConvergenceError, ConvergenceRequest};
use kiln_id::{ResourceHandle, ResourceKind};
use tracing::{info, warn};

use crate::error::StepError;
use crate::refresh::{job_volume, JobRefresh, JobService, VolumeRefresh};
use crate::state::BuildState;
use crate::step::Step;

const VOLUME_WAIT: Duration = Duration::from_secs(10 * 60);

/// Creates the root volume from the source image when the instance boots
/// from block storage.
#[derive(Debug, Default)]
pub struct CreateBootVolume {
    /// The creation job until it names its volume, the volume after.
    volume: Option<ResourceHandle>,
}

impl CreateBootVolume {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Step for CreateBootVolume {
    fn name(&self) -> &'static str {
        "create-boot-volume"
    }

    async fn run(&mut self, state: &mut BuildState) -> Result<(), StepError> {
        let run = state.config.run.clone();
        if !run.use_blockstorage_volume {
            return Ok(());
        }

        let image = state.require_source_image()?.clone();
        let zone = state.require_zone()?.to_string();
        let size_gb = match run.volume_size {
            0 => image.min_disk_gb,
            size => size,
        };
        let name = run
            .volume_name
            .clone()
            .unwrap_or_else(|| state.build_id.temp_name("root"));

        state.ui.say("Creating volume...");
        let api = state.cloud.volume.clone();
        let job_id = api
            .create_volume(&VolumeSpec {
                name: name.clone(),
                size_gb,
                volume_type: run.volume_type.clone().unwrap_or_default(),
                availability_zone: zone,
                source: VolumeSource::Image {
                    image_id: image.id.clone(),
                },
                server_id: None,
            })
            .await
            .map_err(|e| StepError::cloud("Error creating volume", e))?;
        self.volume = Some(ResourceHandle::new(ResourceKind::Job, &job_id));

        let job = ConvergenceRequest::new(JobRefresh::new(JobService::Volume(api.clone()), &job_id))
            .pending(["INIT", "RUNNING"])
            .target(["SUCCESS"])
            .timeout(VOLUME_WAIT)
            .delay(Duration::from_secs(5))
            .min_interval(Duration::from_secs(3))
            .cancel_on(state.cancel_signal())
            .wait()
            .await
            .map_err(|e| StepError::wait("Error creating volume", e))?;
        let volume_id = job
            .resource
            .and_then(|j| j.entities.volume_id)
            .ok_or_else(|| StepError::failed(format!("volume job {job_id} reported no volume")))?;
        self.volume = Some(ResourceHandle::new(ResourceKind::Volume, &volume_id));

        state.ui.say(&format!(
            "Waiting for volume {name} (volume id: {volume_id}) to become available..."
        ));
        wait_available(state, &volume_id, true)
            .await
            .map_err(|e| StepError::wait("Error waiting for volume", e))?;

        info!(volume_id = %volume_id, size_gb, "boot volume ready");
        state.ui.message(&format!("Volume ID: {volume_id}"));
        state.boot_volume_id = Some(volume_id);
        Ok(())
    }

    async fn cleanup(&mut self, state: &mut BuildState) {
        let Some(handle) = self.volume.take() else {
            return;
        };
        let Some(id) = handle.live_id() else {
            return;
        };
        let volume_id = match handle.kind() {
            ResourceKind::Job => {
                let service = JobService::Volume(state.cloud.volume.clone());
                match job_volume(service, id, VOLUME_WAIT).await {
                    Ok(Some(volume_id)) => volume_id,
                    Ok(None) => return,
                    Err(e) => {
                        warn!(job_id = id, error = %e, "volume job lookup failed");
                        state.ui.error(&format!(
                            "Error getting the volume information. Please delete the volume created by job {id} manually"
                        ));
                        return;
                    }
                }
            }
            _ => id.to_string(),
        };
        let volume_id = volume_id.as_str();

        match wait_available(state, volume_id, false).await {
            Ok(()) => {}
            Err(ConvergenceError::NotFound { .. }) => return,
            Err(e) => {
                warn!(volume_id, error = %e, "boot volume never became available");
                state.ui.error(&format!(
                    "Error getting the volume information. Please delete the volume manually: {volume_id}"
                ));
                return;
            }
        }

        state.ui.say(&format!("Deleting volume: {volume_id} ..."));
        match state.cloud.volume.delete_volume(volume_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                warn!(volume_id, error = %e, "failed to delete boot volume");
                state.ui.error(&format!(
                    "Error cleaning up volume. Please delete the volume manually: {volume_id}"
                ));
            }
        }
    }

    fn owned(&self) -> Vec<ResourceHandle> {
        self.volume.iter().cloned().collect()
    }
}

async fn wait_available(
    state: &BuildState,
    volume_id: &str,
    cancellable: bool,
) -> Result<(), ConvergenceError> {
    let mut request = ConvergenceRequest::new(VolumeRefresh::new(
        state.cloud.volume.clone(),
        volume_id,
    ))
    .pending(["creating", "downloading", "in-use", "detaching"])
    .target(["available"])
    .timeout(VOLUME_WAIT)
    .min_interval(Duration::from_secs(2))
    .not_found_checks(1);
    if cancellable {
        request = request.cancel_on(state.cancel_signal());
    }
    request.wait().await.map(|_| ())
}
