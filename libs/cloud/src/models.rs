//! Resource representations exchanged with the cloud.
//!
//! Only the fields the builder reads or writes are modelled. Status fields
//! are kept as the provider's raw labels since they feed straight into
//! convergence waits.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Compute
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityZone {
    pub name: String,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flavor {
    pub id: String,
    pub vcpus: u32,
    pub ram_mb: u32,
}

/// A registered keypair. `private_key` is only set when the cloud generated
/// the key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keypair {
    pub name: String,
    pub public_key: String,
    pub private_key: Option<String>,
}

/// Boot source for a new server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootSource {
    Image { image_id: String },
    Volume { volume_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootVolume {
    pub volume_type: String,
    pub size_gb: Option<u32>,
}

/// Parameters for launching a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSpec {
    pub name: String,
    pub boot: BootSource,
    pub flavor_id: String,
    pub availability_zone: String,
    pub vpc_id: String,
    pub subnet_ids: Vec<String>,
    pub security_groups: Vec<String>,
    pub key_name: Option<String>,
    pub admin_password: Option<String>,
    pub user_data: Option<String>,
    pub config_drive: bool,
    pub metadata: BTreeMap<String, String>,
    pub root_volume: Option<RootVolume>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub id: String,
    pub name: String,
    pub status: String,
    /// Provider-supplied reason when `status` is `ERROR`.
    pub fault: Option<String>,
    pub subnet_ids: Vec<String>,
    /// Set when the server boots from a volume rather than an image.
    pub boot_volume_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInterface {
    pub port_id: String,
    pub subnet_id: String,
    pub fixed_ip: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDevice {
    pub volume_id: String,
    /// Device path, e.g. `/dev/vdb`.
    pub device: String,
    /// Zero for the boot disk.
    pub boot_index: Option<u32>,
}

impl BlockDevice {
    /// Last path component of the device, e.g. `vdb`.
    pub fn device_name(&self) -> &str {
        self.device.rsplit('/').next().unwrap_or(&self.device)
    }

    pub fn is_boot(&self) -> bool {
        self.boot_index == Some(0)
    }
}

// =============================================================================
// Jobs
// =============================================================================

/// Status labels of an asynchronous job.
pub mod job_status {
    pub const INIT: &str = "INIT";
    pub const RUNNING: &str = "RUNNING";
    pub const SUCCESS: &str = "SUCCESS";
    pub const FAIL: &str = "FAIL";
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEntities {
    pub image_id: Option<String>,
    pub volume_id: Option<String>,
    pub server_id: Option<String>,
    #[serde(default)]
    pub sub_jobs: Vec<Job>,
}

/// A long-running operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: String,
    pub fail_reason: Option<String>,
    #[serde(default)]
    pub entities: JobEntities,
}

impl Job {
    /// Image produced by the job, looking into the first sub-job for
    /// data-disk image jobs.
    pub fn image_id(&self) -> Option<&str> {
        self.entities.image_id.as_deref().or_else(|| {
            self.entities
                .sub_jobs
                .first()
                .and_then(|sub| sub.entities.image_id.as_deref())
        })
    }
}

// =============================================================================
// Networking
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpcSpec {
    pub name: String,
    pub cidr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vpc {
    pub id: String,
    pub name: String,
    pub cidr: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetSpec {
    pub name: String,
    pub vpc_id: String,
    pub cidr: String,
    pub gateway_ip: String,
    pub dns_servers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub vpc_id: String,
    pub name: String,
    pub cidr: String,
    pub gateway_ip: String,
    pub dns_servers: Vec<String>,
    pub status: String,
}

// =============================================================================
// Elastic IPs
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSpec {
    pub ip_type: String,
    pub bandwidth_size: u32,
    pub bandwidth_share_type: String,
    pub bandwidth_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub id: String,
    pub public_ip: String,
    pub status: String,
    /// Port the address is bound to, if any.
    pub port_id: Option<String>,
}

impl Address {
    pub fn is_associated(&self) -> bool {
        self.port_id.is_some()
    }
}

/// One page of an address listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressPage {
    pub addresses: Vec<Address>,
    /// Marker for the next page, `None` on the last page.
    pub next_marker: Option<String>,
}

// =============================================================================
// Block storage
// =============================================================================

/// Where a new volume's content comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeSource {
    Blank,
    Image { image_id: String },
    Snapshot { snapshot_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub name: String,
    pub size_gb: u32,
    pub volume_type: String,
    pub availability_zone: String,
    pub source: VolumeSource,
    /// Attach to this server as part of creation.
    pub server_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,
    pub name: String,
    pub size_gb: u32,
    pub availability_zone: String,
    pub status: String,
    pub attached_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub size_gb: u32,
    pub availability_zone: String,
    pub status: String,
}

// =============================================================================
// Images
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub name: String,
    pub status: String,
    pub visibility: String,
    pub owner: String,
    pub min_disk_gb: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Filters for image lookup. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFilter {
    pub name: Option<String>,
    pub visibility: Option<String>,
    pub owner: Option<String>,
    pub tag: Option<String>,
}

impl ImageFilter {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.visibility.is_none() && self.owner.is_none() && self.tag.is_none()
    }

    pub fn matches(&self, image: &Image) -> bool {
        let eq = |want: &Option<String>, have: &str| want.as_deref().is_none_or(|w| w == have);
        eq(&self.name, &image.name)
            && eq(&self.visibility, &image.visibility)
            && eq(&self.owner, &image.owner)
            && self
                .tag
                .as_deref()
                .is_none_or(|t| image.tags.iter().any(|have| have == t))
    }
}

/// Common naming for captured images.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMeta {
    pub name: String,
    pub description: String,
    pub tags: BTreeMap<String, String>,
}

/// What to capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageRequest {
    /// System disk of a server.
    System { server_id: String, meta: ImageMeta },
    /// System disk plus all attached data disks.
    SystemWithData { server_id: String, meta: ImageMeta },
    /// Whole server via a backup vault.
    WholeServer {
        server_id: String,
        vault_id: String,
        meta: ImageMeta,
    },
    /// A single data volume.
    DataDisk { volume_id: String, meta: ImageMeta },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(name: &str, tags: &[&str]) -> Image {
        Image {
            id: format!("img-{name}"),
            name: name.to_string(),
            status: "active".into(),
            visibility: "public".into(),
            owner: "cloud".into(),
            min_disk_gb: 40,
            created_at: Utc::now(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn test_filter_matches() {
        let img = image("ubuntu-22.04", &["os=linux"]);
        assert!(ImageFilter::default().matches(&img));
        assert!(ImageFilter {
            name: Some("ubuntu-22.04".into()),
            tag: Some("os=linux".into()),
            ..Default::default()
        }
        .matches(&img));
        assert!(!ImageFilter {
            visibility: Some("private".into()),
            ..Default::default()
        }
        .matches(&img));
    }

    #[test]
    fn test_job_image_id_from_sub_job() {
        let sub = Job {
            id: "job-2".into(),
            status: job_status::SUCCESS.into(),
            fail_reason: None,
            entities: JobEntities {
                image_id: Some("img-9".into()),
                ..Default::default()
            },
        };
        let job = Job {
            id: "job-1".into(),
            status: job_status::SUCCESS.into(),
            fail_reason: None,
            entities: JobEntities {
                sub_jobs: vec![sub],
                ..Default::default()
            },
        };
        assert_eq!(job.image_id(), Some("img-9"));
    }

    #[test]
    fn test_block_device_name() {
        let dev = BlockDevice {
            volume_id: "vol-1".into(),
            device: "/dev/vdb".into(),
            boot_index: None,
        };
        assert_eq!(dev.device_name(), "vdb");
        assert!(!dev.is_boot());
    }

    #[test]
    fn test_image_request_json_tag() {
        let req = ImageRequest::DataDisk {
            volume_id: "vol-1".into(),
            meta: ImageMeta::default(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["kind"], "data_disk");
    }
}
