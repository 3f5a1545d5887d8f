use std::time::Duration;

use async_trait::async_trait;
use kiln_cloud::models::{Job, VolumeSource, VolumeSpec};
use kiln_converge::{ConvergenceError, ConvergenceRequest};
use kiln_id::{ResourceHandle, ResourceKind};
use tracing::{debug, warn};

use crate::error::StepError;
use crate::refresh::{job_volume, JobRefresh, JobService};
use crate::state::{BuildState, VolumePlan};
use crate::step::Step;
use crate::template::DataDiskSource;

const JOB_WAIT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone)]
struct Attached {
    /// The creation job until it names its volume, the volume after.
    handle: ResourceHandle,
    /// Created by this step, as opposed to supplied by the user.
    created: bool,
}

/// Attaches the planned data volumes to the server, creating those that do
/// not exist yet.
///
/// Cleanup detaches every volume; only the ones created here are deleted.
#[derive(Debug, Default)]
pub struct AttachVolumes {
    attached: Vec<Attached>,
}

impl AttachVolumes {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Step for AttachVolumes {
    fn name(&self) -> &'static str {
        "attach-volumes"
    }

    async fn run(&mut self, state: &mut BuildState) -> Result<(), StepError> {
        let plans = state.data_volume_plans.clone();
        if plans.is_empty() {
            return Ok(());
        }
        let server_id = state.require_server()?.to_string();

        for plan in &plans {
            match &plan.source {
                DataDiskSource::Volume(volume_id) => {
                    self.attach_existing(state, &server_id, volume_id).await?
                }
                _ => self.create_attached(state, &server_id, plan).await?,
            }
        }
        Ok(())
    }

    async fn cleanup(&mut self, state: &mut BuildState) {
        let server_id = state.server_id.clone();

        while let Some(Attached { handle, created }) = self.attached.pop() {
            let Some(id) = handle.live_id() else {
                continue;
            };
            let volume_id = match handle.kind() {
                ResourceKind::Job => {
                    let service = JobService::Volume(state.cloud.volume.clone());
                    match job_volume(service, id, JOB_WAIT).await {
                        Ok(Some(volume_id)) => volume_id,
                        Ok(None) => continue,
                        Err(e) => {
                            warn!(job_id = id, error = %e, "volume job lookup failed");
                            state.ui.error(&format!(
                                "Error getting the volume information. Please delete the volume created by job {id} manually"
                            ));
                            continue;
                        }
                    }
                }
                _ => id.to_string(),
            };
            let volume_id = volume_id.as_str();

            if let Some(server_id) = &server_id {
                state
                    .ui
                    .say(&format!("Detaching volume {volume_id} ..."));
                if let Err(e) = detach(state, server_id, volume_id).await {
                    warn!(volume_id, error = %e, "failed to detach volume");
                    state.ui.error(&format!(
                        "Error detaching volume {volume_id}. Please detach it manually: {e}"
                    ));
                    continue;
                }
            }
            if !created {
                continue;
            }

            state.ui.say(&format!("Deleting volume: {volume_id} ..."));
            match state.cloud.volume.delete_volume(volume_id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(volume_id, error = %e, "failed to delete volume");
                    state.ui.error(&format!(
                        "Error cleaning up volume. Please delete the volume manually: {volume_id}"
                    ));
                }
            }
        }
    }

    fn owned(&self) -> Vec<ResourceHandle> {
        self.attached
            .iter()
            .filter(|a| a.created)
            .map(|a| a.handle.clone())
            .collect()
    }
}

impl AttachVolumes {
    async fn attach_existing(
        &mut self,
        state: &BuildState,
        server_id: &str,
        volume_id: &str,
    ) -> Result<(), StepError> {
        state.ui.say("Attaching volume to ECS...");
        let compute = state.cloud.compute.clone();
        let job_id = compute
            .attach_volume(server_id, volume_id)
            .await
            .map_err(|e| StepError::cloud(format!("error attaching volume {volume_id}"), e))?;
        self.attached.push(Attached {
            handle: ResourceHandle::new(ResourceKind::Volume, volume_id),
            created: false,
        });

        state.ui.message("Waiting for attach volume to ECS success...");
        wait_job(state, JobService::Compute(compute), &job_id, true)
            .await
            .map_err(|e| {
                StepError::wait(
                    format!("error waiting for volume ({job_id}) to become ready"),
                    e,
                )
            })?;
        debug!(volume_id, "volume attached");
        Ok(())
    }

    async fn create_attached(
        &mut self,
        state: &BuildState,
        server_id: &str,
        plan: &VolumePlan,
    ) -> Result<(), StepError> {
        state.ui.say("Creating volume...");
        let source = match &plan.source {
            DataDiskSource::Snapshot(snapshot_id) => VolumeSource::Snapshot {
                snapshot_id: snapshot_id.clone(),
            },
            DataDiskSource::DataImage(image_id) => VolumeSource::Image {
                image_id: image_id.clone(),
            },
            DataDiskSource::Size(_) | DataDiskSource::Volume(_) => VolumeSource::Blank,
        };
        let api = state.cloud.volume.clone();
        let job_id = api
            .create_volume(&VolumeSpec {
                name: state.build_id.temp_name("data"),
                size_gb: plan.size_gb,
                volume_type: plan.volume_type.clone(),
                availability_zone: state.require_zone()?.to_string(),
                source,
                server_id: Some(server_id.to_string()),
            })
            .await
            .map_err(|e| StepError::cloud("error creating volume", e))?;
        self.attached.push(Attached {
            handle: ResourceHandle::new(ResourceKind::Job, &job_id),
            created: true,
        });

        state.ui.message("Waiting for volume to be created...");
        let job = wait_job(state, JobService::Volume(api), &job_id, true)
            .await
            .map_err(|e| {
                StepError::wait(
                    format!("error waiting for volume ({job_id}) to become ready"),
                    e,
                )
            })?;
        let volume_id = job
            .and_then(|j| j.entities.volume_id)
            .ok_or_else(|| StepError::failed(format!("volume job {job_id} reported no volume")))?;
        state.ui.message(&format!("Volume ID: {volume_id}"));
        debug!(volume_id = %volume_id, "volume created and attached");
        if let Some(entry) = self.attached.last_mut() {
            entry.handle = ResourceHandle::new(ResourceKind::Volume, volume_id);
        }
        Ok(())
    }
}

async fn detach(state: &BuildState, server_id: &str, volume_id: &str) -> Result<(), StepError> {
    let compute = state.cloud.compute.clone();
    let job_id = match compute.detach_volume(server_id, volume_id).await {
        Ok(job_id) => job_id,
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(StepError::cloud("error detaching volume", e)),
    };
    wait_job(state, JobService::Compute(compute), &job_id, false)
        .await
        .map(|_| ())
        .map_err(|e| StepError::wait(format!("error waiting for detach job ({job_id})"), e))
}

async fn wait_job(
    state: &BuildState,
    service: JobService,
    job_id: &str,
    cancellable: bool,
) -> Result<Option<Job>, ConvergenceError> {
    let mut request = ConvergenceRequest::new(JobRefresh::new(service, job_id))
        .pending(["INIT", "RUNNING"])
        .target(["SUCCESS"])
        .timeout(JOB_WAIT)
        .delay(Duration::from_secs(10))
        .poll_interval(Duration::from_secs(10));
    if cancellable {
        request = request.cancel_on(state.cancel_signal());
    }
    request.wait().await.map(|done| done.resource)
}
