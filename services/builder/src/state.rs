//! Per-run build state shared by the steps.
//!
//! Each field is written by exactly one step and read by later ones. Readers
//! must not assume a field is set; the `require_*` accessors turn a missing
//! value into [`StepError::MissingState`].

use std::sync::Arc;

use kiln_cloud::models::{Address, Image};
use kiln_cloud::{Cloud, PasswordDecryptor};
use kiln_id::BuildId;
use tokio::sync::watch;

use crate::error::StepError;
use crate::template::{BuildConfig, DataDiskSource};
use crate::ui::Ui;

/// The keypair the instance is launched with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeypairInfo {
    pub name: String,
    /// Private key material, when the build knows it.
    pub private_key: Option<String>,
    /// Registered by this build and deleted when it ends.
    pub temporary: bool,
}

/// A data volume resolved against the cloud, ready to attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumePlan {
    pub source: DataDiskSource,
    pub size_gb: u32,
    pub volume_type: String,
}

/// Everything one build run reads and writes.
pub struct BuildState {
    pub build_id: BuildId,
    pub config: Arc<BuildConfig>,
    pub cloud: Cloud,
    pub decryptor: Arc<dyn PasswordDecryptor>,
    pub ui: Arc<dyn Ui>,
    cancel: watch::Receiver<bool>,

    /// Written by `load-availability-zone`.
    pub availability_zone: Option<String>,
    /// Written by `load-flavor`.
    pub flavor_id: Option<String>,
    /// Written by `keypair`.
    pub keypair: Option<KeypairInfo>,
    /// Written by `source-image`.
    pub source_image: Option<Image>,
    /// Written by `check-volumes`.
    pub data_volume_plans: Vec<VolumePlan>,
    /// Written by `create-network`.
    pub vpc_id: Option<String>,
    pub subnet_ids: Vec<String>,
    /// Written by `allocate-address`.
    pub address: Option<Address>,
    /// Written by `create-boot-volume`.
    pub boot_volume_id: Option<String>,
    /// Written by `launch-instance` as soon as the create call returns.
    pub server_id: Option<String>,
    /// Written by `associate-address`.
    pub ssh_host: Option<String>,
    /// Written by `get-password`.
    pub admin_password: Option<String>,
    /// Written by `create-image`.
    pub image_ids: Vec<String>,
}

impl BuildState {
    pub fn new(
        config: Arc<BuildConfig>,
        cloud: Cloud,
        decryptor: Arc<dyn PasswordDecryptor>,
        ui: Arc<dyn Ui>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            build_id: BuildId::new(),
            config,
            cloud,
            decryptor,
            ui,
            cancel,
            availability_zone: None,
            flavor_id: None,
            keypair: None,
            source_image: None,
            data_volume_plans: Vec::new(),
            vpc_id: None,
            subnet_ids: Vec::new(),
            address: None,
            boot_volume_id: None,
            server_id: None,
            ssh_host: None,
            admin_password: None,
            image_ids: Vec::new(),
        }
    }

    /// Cancellation signal for waits started from `run`.
    ///
    /// Cleanup waits must not use it: an interrupted build still tears down.
    pub fn cancel_signal(&self) -> watch::Receiver<bool> {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    pub fn require_zone(&self) -> Result<&str, StepError> {
        self.availability_zone
            .as_deref()
            .ok_or(StepError::MissingState("availability_zone"))
    }

    pub fn require_flavor(&self) -> Result<&str, StepError> {
        self.flavor_id
            .as_deref()
            .ok_or(StepError::MissingState("flavor_id"))
    }

    pub fn require_source_image(&self) -> Result<&Image, StepError> {
        self.source_image
            .as_ref()
            .ok_or(StepError::MissingState("source_image"))
    }

    pub fn require_vpc(&self) -> Result<&str, StepError> {
        self.vpc_id.as_deref().ok_or(StepError::MissingState("vpc_id"))
    }

    pub fn require_server(&self) -> Result<&str, StepError> {
        self.server_id
            .as_deref()
            .ok_or(StepError::MissingState("server_id"))
    }
}

impl std::fmt::Debug for BuildState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildState")
            .field("build_id", &self.build_id)
            .field("availability_zone", &self.availability_zone)
            .field("vpc_id", &self.vpc_id)
            .field("server_id", &self.server_id)
            .field("image_ids", &self.image_ids)
            .finish_non_exhaustive()
    }
}
