//! Collaborator interfaces, one per resource family.
//!
//! Every creation call returns either the created resource or the id of a job
//! to wait on. Deletes of resources that are already gone return
//! [`CloudError::NotFound`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::models::*;
use crate::CloudError;

pub type CloudResult<T> = Result<T, CloudError>;

#[async_trait]
pub trait ComputeApi: Send + Sync {
    async fn list_availability_zones(&self) -> CloudResult<Vec<AvailabilityZone>>;

    async fn show_flavor(&self, flavor_id: &str) -> CloudResult<Flavor>;

    /// Registers `public_key`, or lets the cloud generate a key pair when it
    /// is `None`.
    async fn create_keypair(&self, name: &str, public_key: Option<&str>) -> CloudResult<Keypair>;

    async fn delete_keypair(&self, name: &str) -> CloudResult<()>;

    /// Starts creating a server. The returned server is typically in `BUILD`.
    async fn create_server(&self, spec: &ServerSpec) -> CloudResult<Server>;

    async fn show_server(&self, server_id: &str) -> CloudResult<Server>;

    async fn delete_server(&self, server_id: &str) -> CloudResult<()>;

    async fn stop_server(&self, server_id: &str) -> CloudResult<()>;

    async fn list_interfaces(&self, server_id: &str) -> CloudResult<Vec<ServerInterface>>;

    async fn list_block_devices(&self, server_id: &str) -> CloudResult<Vec<BlockDevice>>;

    /// Returns a job id.
    async fn attach_volume(&self, server_id: &str, volume_id: &str) -> CloudResult<String>;

    /// Returns a job id.
    async fn detach_volume(&self, server_id: &str, volume_id: &str) -> CloudResult<String>;

    /// Encrypted administrator password. Empty until the guest has posted it.
    async fn show_password(&self, server_id: &str) -> CloudResult<String>;

    async fn show_job(&self, job_id: &str) -> CloudResult<Job>;
}

#[async_trait]
pub trait NetworkApi: Send + Sync {
    async fn create_vpc(&self, spec: &VpcSpec) -> CloudResult<Vpc>;

    async fn show_vpc(&self, vpc_id: &str) -> CloudResult<Vpc>;

    /// Fails with [`CloudError::Conflict`] while subnets remain.
    async fn delete_vpc(&self, vpc_id: &str) -> CloudResult<()>;

    async fn create_subnet(&self, spec: &SubnetSpec) -> CloudResult<Subnet>;

    async fn show_subnet(&self, subnet_id: &str) -> CloudResult<Subnet>;

    /// Fails with [`CloudError::Conflict`] while servers use the subnet.
    async fn delete_subnet(&self, vpc_id: &str, subnet_id: &str) -> CloudResult<()>;
}

#[async_trait]
pub trait AddressApi: Send + Sync {
    async fn create_address(&self, spec: &AddressSpec) -> CloudResult<Address>;

    async fn show_address(&self, address_id: &str) -> CloudResult<Address>;

    /// Lists addresses in pages of at most `limit`, starting after `marker`.
    async fn list_addresses(&self, marker: Option<&str>, limit: u32) -> CloudResult<AddressPage>;

    async fn associate_address(&self, address_id: &str, port_id: &str) -> CloudResult<()>;

    async fn delete_address(&self, address_id: &str) -> CloudResult<()>;
}

#[async_trait]
pub trait VolumeApi: Send + Sync {
    /// Returns a job id. The job's entities carry the new volume id.
    async fn create_volume(&self, spec: &VolumeSpec) -> CloudResult<String>;

    async fn show_volume(&self, volume_id: &str) -> CloudResult<Volume>;

    async fn delete_volume(&self, volume_id: &str) -> CloudResult<()>;

    async fn show_snapshot(&self, snapshot_id: &str) -> CloudResult<Snapshot>;

    async fn show_job(&self, job_id: &str) -> CloudResult<Job>;
}

#[async_trait]
pub trait ImageApi: Send + Sync {
    async fn list_images(&self, filter: &ImageFilter) -> CloudResult<Vec<Image>>;

    async fn show_image(&self, image_id: &str) -> CloudResult<Image>;

    /// Returns a job id.
    async fn create_image(&self, request: &ImageRequest) -> CloudResult<String>;

    async fn show_job(&self, job_id: &str) -> CloudResult<Job>;

    async fn add_members(&self, image_id: &str, projects: &[String]) -> CloudResult<()>;

    async fn update_min_disk(&self, image_id: &str, min_disk_gb: u32) -> CloudResult<()>;

    async fn delete_image(&self, image_id: &str) -> CloudResult<()>;
}

/// Handles to every collaborator a build needs.
#[derive(Clone)]
pub struct Cloud {
    pub compute: Arc<dyn ComputeApi>,
    pub network: Arc<dyn NetworkApi>,
    pub address: Arc<dyn AddressApi>,
    pub volume: Arc<dyn VolumeApi>,
    pub image: Arc<dyn ImageApi>,
}

impl Cloud {
    /// Uses one implementation for every resource family.
    pub fn from_single<C>(cloud: Arc<C>) -> Self
    where
        C: ComputeApi + NetworkApi + AddressApi + VolumeApi + ImageApi + 'static,
    {
        Self {
            compute: cloud.clone(),
            network: cloud.clone(),
            address: cloud.clone(),
            volume: cloud.clone(),
            image: cloud,
        }
    }
}

impl std::fmt::Debug for Cloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cloud").finish_non_exhaustive()
    }
}

/// Turns the encrypted administrator password into plain text using the
/// build's private key.
pub trait PasswordDecryptor: Send + Sync {
    fn decrypt(&self, encrypted: &str, private_key: &str) -> Result<String, CloudError>;
}
