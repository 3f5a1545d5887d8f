use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kiln_cloud::models::{BlockDevice, ImageMeta, ImageRequest};
use kiln_cloud::ImageApi;
use kiln_converge::ConvergenceRequest;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::StepError;
use crate::refresh::{JobRefresh, JobService};
use crate::state::BuildState;
use crate::step::{Step, StepPolicy};
use crate::template::ImageType;

const IMAGE_JOB_DELAY: Duration = Duration::from_secs(60);
const IMAGE_JOB_POLL: Duration = Duration::from_secs(10);

/// Captures the image (or images) from the server.
///
/// The captured images are the build's deliverable and are never removed on
/// cleanup.
#[derive(Debug, Default)]
pub struct CreateImage;

#[async_trait]
impl Step for CreateImage {
    fn name(&self) -> &'static str {
        "create-image"
    }

    async fn run(&mut self, state: &mut BuildState) -> Result<(), StepError> {
        let image = state.config.image.clone();
        let image_type = image.image_type();
        let server_id = state.require_server()?.to_string();

        state.ui.say(&format!(
            "Creating the {image_type} image: {} ...",
            image.name
        ));
        let (timeout, parse_warning) = image.wait_timeout();
        if let Some(warning) = parse_warning {
            warn!("{warning}");
            state.ui.message(&format!("WARN: {warning}"));
        }

        let meta = ImageMeta {
            name: image.name.clone(),
            description: image.description.clone(),
            tags: image.tags.clone(),
        };
        let waiter = ImageJobWaiter {
            api: state.cloud.image.clone(),
            timeout,
            cancel: state.cancel_signal(),
        };

        let image_ids = match image_type {
            ImageType::System => {
                let request = ImageRequest::System { server_id, meta };
                vec![waiter.capture(&request).await?]
            }
            ImageType::SystemData => {
                let request = ImageRequest::SystemWithData { server_id, meta };
                vec![waiter.capture(&request).await?]
            }
            ImageType::FullEcs => {
                let request = ImageRequest::WholeServer {
                    server_id,
                    vault_id: image.vault_id.clone().unwrap_or_default(),
                    meta,
                };
                vec![waiter.capture(&request).await?]
            }
            ImageType::DataDisk => {
                let devices = state
                    .cloud
                    .compute
                    .list_block_devices(&server_id)
                    .await
                    .map_err(|e| StepError::cloud("Error creating image", e))?;
                capture_data_disks(state, &waiter, &server_id, &meta, devices).await?
            }
        };

        info!(image_ids = ?image_ids, "image captured");
        state
            .ui
            .message(&format!("Image: {}", image_ids.join(";")));
        state.image_ids = image_ids;
        Ok(())
    }
}

struct ImageJobWaiter {
    api: Arc<dyn ImageApi>,
    timeout: Duration,
    cancel: watch::Receiver<bool>,
}

impl ImageJobWaiter {
    /// Submits the request and waits for the job. Returns the image id.
    async fn capture(&self, request: &ImageRequest) -> Result<String, StepError> {
        debug!(?request, "create image options");
        let job_id = self
            .api
            .create_image(request)
            .await
            .map_err(|e| StepError::cloud("Error creating image", e))?;

        let done = ConvergenceRequest::new(
            JobRefresh::new(JobService::Image(self.api.clone()), &job_id).query_errors_as_absent(),
        )
        .pending(["INIT", "RUNNING"])
        .target(["SUCCESS"])
        .timeout(self.timeout)
        .delay(IMAGE_JOB_DELAY)
        .poll_interval(IMAGE_JOB_POLL)
        .cancel_on(self.cancel.clone())
        .wait()
        .await
        .map_err(|e| StepError::wait("Error creating image", e))?;

        done.resource
            .as_ref()
            .and_then(|job| job.image_id())
            .map(str::to_string)
            .ok_or_else(|| {
                StepError::failed("Error creating image: Error extracting the image id from API response")
            })
    }
}

/// One image per non-boot device. A disk that fails is reported and
/// skipped; the step fails only when every disk does.
async fn capture_data_disks(
    state: &BuildState,
    waiter: &ImageJobWaiter,
    server_id: &str,
    meta: &ImageMeta,
    devices: Vec<BlockDevice>,
) -> Result<Vec<String>, StepError> {
    let disks: Vec<_> = devices.into_iter().filter(|d| !d.is_boot()).collect();
    if disks.is_empty() {
        return Err(StepError::failed(format!(
            "Error creating image: no data disks attached to the server {server_id}"
        )));
    }

    let mut image_ids = Vec::new();
    for disk in &disks {
        let device = disk.device_name();
        state
            .ui
            .message(&format!("creating data disk image for /dev/{device} ..."));
        let request = ImageRequest::DataDisk {
            volume_id: disk.volume_id.clone(),
            meta: ImageMeta {
                name: format!("{}-{device}", meta.name),
                ..meta.clone()
            },
        };
        match waiter.capture(&request).await {
            Ok(image_id) => {
                state
                    .ui
                    .message(&format!("data disk image for /dev/{device}: {image_id}"));
                image_ids.push(image_id);
            }
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(device, error = %e, "data disk image failed");
                state.ui.message(&format!(
                    "failed to create data disk image for /dev/{device}: {e}"
                ));
            }
        }
    }

    if image_ids.is_empty() {
        return Err(StepError::failed(
            "Error creating image: all jobs are failed to create data disk image",
        ));
    }
    Ok(image_ids)
}

/// Raises the minimum disk size of every captured image.
#[derive(Debug, Default)]
pub struct UpdateImageMinDisk;

#[async_trait]
impl Step for UpdateImageMinDisk {
    fn name(&self) -> &'static str {
        "update-image-min-disk"
    }

    async fn run(&mut self, state: &mut BuildState) -> Result<(), StepError> {
        let min_disk = state.config.image.min_disk;
        if min_disk == 0 {
            return Ok(());
        }

        for image_id in state.image_ids.clone() {
            state.ui.say(&format!(
                "Updating the minimum disk size of image {image_id} to {min_disk}GB ..."
            ));
            state
                .cloud
                .image
                .update_min_disk(&image_id, min_disk)
                .await
                .map_err(|e| StepError::cloud("Error updating image min disk", e))?;
        }
        Ok(())
    }
}

/// Shares every captured image with the configured projects.
#[derive(Debug, Default)]
pub struct ShareImage;

#[async_trait]
impl Step for ShareImage {
    fn name(&self) -> &'static str {
        "share-image"
    }

    fn policy(&self) -> StepPolicy {
        StepPolicy::BestEffort
    }

    async fn run(&mut self, state: &mut BuildState) -> Result<(), StepError> {
        let members = state.config.image.members.clone();
        if members.is_empty() {
            return Ok(());
        }

        for image_id in state.image_ids.clone() {
            state.ui.say(&format!(
                "Adding members {} to image {image_id} ...",
                members.join(",")
            ));
            state
                .cloud
                .image
                .add_members(&image_id, &members)
                .await
                .map_err(|e| StepError::cloud(format!("Error adding members to image {image_id}"), e))?;
        }
        Ok(())
    }
}
