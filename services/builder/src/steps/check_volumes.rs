use async_trait::async_trait;
use kiln_cloud::CloudError;
use tracing::debug;

use crate::error::StepError;
use crate::state::{BuildState, VolumePlan};
use crate::step::Step;
use crate::template::DataDiskSource;

/// Validates the data disk entries and resolves each one's size in the
/// selected zone.
#[derive(Debug, Default)]
pub struct CheckVolumes;

#[async_trait]
impl Step for CheckVolumes {
    fn name(&self) -> &'static str {
        "check-volumes"
    }

    async fn run(&mut self, state: &mut BuildState) -> Result<(), StepError> {
        let disks = state.config.run.data_disks.clone();
        if disks.is_empty() {
            return Ok(());
        }
        let zone = state.require_zone()?.to_string();

        let sources: Vec<_> = disks.iter().enumerate().map(|(i, d)| d.source(i)).collect();
        let malformed: Vec<_> = sources
            .iter()
            .filter_map(|s| s.as_ref().err().cloned())
            .collect();
        if !malformed.is_empty() {
            return Err(StepError::failed(malformed.join("; ")));
        }

        let mut plans = Vec::with_capacity(disks.len());
        let mut errs = Vec::new();
        for (i, (disk, source)) in disks.iter().zip(sources).enumerate() {
            let Ok(source) = source else { continue };
            match resolve_size(state, &source, &zone).await {
                Ok(size_gb) => {
                    debug!(index = i, ?source, size_gb, "data disk resolved");
                    plans.push(VolumePlan {
                        source,
                        size_gb,
                        volume_type: disk.volume_type().to_string(),
                    });
                }
                Err(e) => errs.push(format!("data_disks[{i}]: {e}")),
            }
        }
        if !errs.is_empty() {
            return Err(StepError::failed(errs.join("; ")));
        }

        state.data_volume_plans = plans;
        Ok(())
    }
}

async fn resolve_size(
    state: &BuildState,
    source: &DataDiskSource,
    zone: &str,
) -> Result<u32, String> {
    let missing = |what: &str, id: &str, e: CloudError| {
        if e.is_not_found() || matches!(e, CloudError::Api { status: 404, .. }) {
            format!("can not find the {what} {id} in {zone}")
        } else {
            e.to_string()
        }
    };

    match source {
        DataDiskSource::Size(size) => Ok(*size),
        DataDiskSource::Volume(id) => {
            let volume = state
                .cloud
                .volume
                .show_volume(id)
                .await
                .map_err(|e| missing("volume", id, e))?;
            if volume.availability_zone != zone {
                return Err(format!("can not find the volume {id} in {zone}"));
            }
            Ok(volume.size_gb)
        }
        DataDiskSource::Snapshot(id) => {
            let snapshot = state
                .cloud
                .volume
                .show_snapshot(id)
                .await
                .map_err(|e| missing("snapshot", id, e))?;
            if snapshot.availability_zone != zone {
                return Err(format!("can not find the snapshot {id} in {zone}"));
            }
            Ok(snapshot.size_gb)
        }
        DataDiskSource::DataImage(id) => {
            let image = state
                .cloud
                .image
                .show_image(id)
                .await
                .map_err(|e| match e {
                    e if e.is_not_found() => format!("can not find the image {id}"),
                    e => e.to_string(),
                })?;
            Ok(image.min_disk_gb)
        }
    }
}
