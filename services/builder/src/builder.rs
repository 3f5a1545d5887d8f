//! Wires the provisioning steps into a pipeline and runs one build.

use std::sync::Arc;

use kiln_cloud::{Cloud, PasswordDecryptor};
use tokio::sync::watch;
use tracing::info;

use crate::artifact::Artifact;
use crate::error::BuildError;
use crate::pipeline::{OnError, Pipeline};
use crate::state::BuildState;
use crate::step::Step;
use crate::steps::*;
use crate::template::BuildConfig;
use crate::ui::Ui;

/// One image build: a prepared template plus the collaborators it runs
/// against.
pub struct Builder {
    config: Arc<BuildConfig>,
    cloud: Cloud,
    decryptor: Arc<dyn PasswordDecryptor>,
    ui: Arc<dyn Ui>,
    probe: Arc<dyn Reachability>,
    on_error: OnError,
}

impl Builder {
    /// `config` must already have been through [`BuildConfig::prepare`].
    pub fn new(
        config: BuildConfig,
        cloud: Cloud,
        decryptor: Arc<dyn PasswordDecryptor>,
        ui: Arc<dyn Ui>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            cloud,
            decryptor,
            ui,
            probe: Arc::new(TcpProbe),
            on_error: OnError::default(),
        }
    }

    /// How the `connect` step decides the instance is reachable.
    pub fn probe(mut self, probe: Arc<dyn Reachability>) -> Self {
        self.probe = probe;
        self
    }

    pub fn on_error(mut self, on_error: OnError) -> Self {
        self.on_error = on_error;
        self
    }

    /// The full step sequence, in run order.
    pub fn steps(&self) -> Vec<Box<dyn Step>> {
        vec![
            Box::new(LoadAvailabilityZone),
            Box::new(LoadFlavor),
            Box::new(SetupKeypair::new()),
            Box::new(ResolveSourceImage),
            Box::new(CheckVolumes),
            Box::new(CreateNetwork::new()),
            Box::new(AllocateAddress::new()),
            Box::new(CreateBootVolume::new()),
            Box::new(LaunchInstance::new()),
            Box::new(AttachVolumes::new()),
            Box::new(AssociateAddress),
            Box::new(GetPassword),
            Box::new(Connect::new(self.probe.clone())),
            Box::new(Provision),
            Box::new(StopInstance),
            Box::new(CreateImage),
            Box::new(UpdateImageMinDisk),
            Box::new(ShareImage),
        ]
    }

    /// Runs the build to completion. Setting `cancel` to `true` halts it
    /// before the next step or poll and rolls back.
    pub async fn run(&self, cancel: watch::Receiver<bool>) -> Result<Artifact, BuildError> {
        let mut state = BuildState::new(
            self.config.clone(),
            self.cloud.clone(),
            self.decryptor.clone(),
            self.ui.clone(),
            cancel,
        );
        info!(build_id = %state.build_id, name = %self.config.name, "starting build");

        let mut pipeline = Pipeline::new(self.steps()).on_error(self.on_error);
        pipeline.run(&mut state).await?;

        let artifact = Artifact::new(
            std::mem::take(&mut state.image_ids),
            self.config.access.region.clone(),
        );
        info!(build_id = %state.build_id, image_ids = %artifact.id(), "build finished");
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::MemoryUi;
    use kiln_cloud::{SimulatedCloud, SimulatedDecryptor, SimulationSettings};

    #[test]
    fn test_step_order() {
        let config = BuildConfig::from_toml_str(
            r#"
            [run]
            flavor = "s6.large.2"
            source_image = "img-base"

            [image]
            name = "golden"
            "#,
        )
        .unwrap();
        let cloud = Cloud::from_single(Arc::new(SimulatedCloud::new(SimulationSettings::default())));
        let builder = Builder::new(
            config,
            cloud,
            Arc::new(SimulatedDecryptor),
            Arc::new(MemoryUi::new()),
        );

        let names: Vec<_> = builder.steps().iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "load-availability-zone",
                "load-flavor",
                "keypair",
                "source-image",
                "check-volumes",
                "create-network",
                "allocate-address",
                "create-boot-volume",
                "launch-instance",
                "attach-volumes",
                "associate-address",
                "get-password",
                "connect",
                "provision",
                "stop-instance",
                "create-image",
                "update-image-min-disk",
                "share-image",
            ]
        );
    }
}
