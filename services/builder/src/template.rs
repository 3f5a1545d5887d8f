//! Build template: the TOML file describing one image build.
//!
//! ```toml
//! name = "web-base"
//!
//! [access]
//! region = "cn-north-4"
//!
//! [run]
//! flavor = "s6.large.2"
//! source_image_name = "Ubuntu 22.04 server 64bit"
//! eip_bandwidth_size = 5
//!
//! [run.communicator]
//! type = "ssh"
//! username = "root"
//!
//! [image]
//! name = "web-base-2024"
//!
//! [[provisioner]]
//! command = ["ansible-playbook", "site.yml"]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kiln_cloud::models::ImageFilter;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::ConfigError;

/// Default time to wait for an image job.
pub const DEFAULT_IMAGE_WAIT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default time to wait for the communicator port.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const MAX_METADATA_BYTES: usize = 255;

/// A complete build template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Shown as the prefix of every progress line.
    #[serde(default = "default_build_name")]
    pub name: String,

    #[serde(default)]
    pub access: AccessConfig,

    pub run: RunConfig,

    pub image: ImageConfig,

    /// Local commands run against the instance once it is reachable.
    #[serde(default, rename = "provisioner")]
    pub provisioners: Vec<HookConfig>,
}

fn default_build_name() -> String {
    "kiln".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessConfig {
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub enterprise_project_id: String,
}

// =============================================================================
// Run
// =============================================================================

/// Where and how the temporary instance runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Picked at random from the available zones when unset.
    pub availability_zone: Option<String>,
    pub flavor: String,

    pub source_image: Option<String>,
    pub source_image_name: Option<String>,
    pub source_image_filter: SourceImageFilter,

    /// Existing VPC to launch into. A temporary one is created when unset.
    pub vpc_id: Option<String>,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,

    /// Existing elastic IP to use.
    pub floating_ip: Option<String>,
    /// Reuse any unassociated elastic IP before creating one.
    pub reuse_ips: bool,
    pub eip_type: Option<String>,
    /// Bandwidth of a newly created elastic IP, in Mbit/s. Zero creates none.
    pub eip_bandwidth_size: u32,

    /// Defaults to the image name.
    pub instance_name: String,
    pub instance_metadata: BTreeMap<String, String>,
    pub user_data: Option<String>,
    pub user_data_file: Option<PathBuf>,
    pub config_drive: bool,

    /// Boot from a separately created volume instead of the image.
    pub use_blockstorage_volume: bool,
    pub volume_name: Option<String>,
    pub volume_type: Option<String>,
    /// Root volume size in GB. Zero uses the source image's minimum.
    pub volume_size: u32,

    pub data_disks: Vec<DataDisk>,

    pub communicator: CommunicatorConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceImageFilter {
    pub filters: ImageFilterOptions,
    /// Pick the newest image when several match.
    pub most_recent: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageFilterOptions {
    pub name: Option<String>,
    pub owner: Option<String>,
    pub visibility: Option<String>,
    pub tag: Option<String>,
}

impl ImageFilterOptions {
    pub fn is_empty(&self) -> bool {
        self.to_filter().is_empty()
    }

    pub fn to_filter(&self) -> ImageFilter {
        ImageFilter {
            name: self.name.clone(),
            visibility: self.visibility.clone(),
            owner: self.owner.clone(),
            tag: self.tag.clone(),
        }
    }
}

/// A data volume to attach to the instance. Exactly one source must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DataDisk {
    pub volume_size: u32,
    pub volume_id: Option<String>,
    pub snapshot_id: Option<String>,
    pub data_image_id: Option<String>,
    pub volume_type: Option<String>,
}

/// Where a data volume comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataDiskSource {
    /// A new blank volume of this size.
    Size(u32),
    /// An existing volume.
    Volume(String),
    Snapshot(String),
    DataImage(String),
}

impl DataDisk {
    /// Default volume type for new data volumes.
    pub const DEFAULT_VOLUME_TYPE: &'static str = "SSD";

    pub fn volume_type(&self) -> &str {
        self.volume_type
            .as_deref()
            .unwrap_or(Self::DEFAULT_VOLUME_TYPE)
    }

    /// The single source this entry names. `index` is only used in messages.
    pub fn source(&self, index: usize) -> Result<DataDiskSource, String> {
        let mut specified = Vec::new();
        if self.volume_size > 0 {
            specified.push(("volume_size", DataDiskSource::Size(self.volume_size)));
        }
        if let Some(id) = non_empty(&self.volume_id) {
            specified.push(("volume_id", DataDiskSource::Volume(id.to_string())));
        }
        if let Some(id) = non_empty(&self.snapshot_id) {
            specified.push(("snapshot_id", DataDiskSource::Snapshot(id.to_string())));
        }
        if let Some(id) = non_empty(&self.data_image_id) {
            specified.push(("data_image_id", DataDiskSource::DataImage(id.to_string())));
        }

        match specified.len() {
            0 => Err(format!(
                "data_disks[{index}]: one of `volume_size,volume_id,snapshot_id,data_image_id` must be specified"
            )),
            1 => Ok(specified.remove(0).1),
            _ => {
                let names: Vec<_> = specified.iter().map(|(name, _)| *name).collect();
                Err(format!(
                    "data_disks[{index}]: only one of `volume_size,volume_id,snapshot_id,data_image_id` can be specified, but `{}` were specified",
                    names.join(",")
                ))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommunicatorKind {
    #[default]
    Ssh,
    Winrm,
    None,
}

impl CommunicatorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommunicatorKind::Ssh => "ssh",
            CommunicatorKind::Winrm => "winrm",
            CommunicatorKind::None => "none",
        }
    }
}

/// How provisioning reaches the instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunicatorConfig {
    #[serde(rename = "type")]
    pub kind: CommunicatorKind,
    /// Overrides the address the builder connects to.
    pub host: Option<String>,
    /// Defaults to 22 for SSH and 5985 for WinRM.
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Existing keypair to launch with.
    pub ssh_keypair_name: Option<String>,
    pub ssh_private_key_file: Option<PathBuf>,
    /// Defaults to `<ssh_private_key_file>.pub`.
    pub ssh_public_key_file: Option<PathBuf>,
    /// Name for the keypair the build registers.
    pub temporary_key_pair_name: Option<String>,
    /// Where to save a cloud-generated private key.
    pub debug_key_path: Option<PathBuf>,
    /// How long to wait for the port, e.g. `5m`.
    pub timeout: Option<String>,
}

impl CommunicatorConfig {
    pub fn port(&self) -> u16 {
        match (self.port, self.kind) {
            (Some(port), _) => port,
            (None, CommunicatorKind::Winrm) => 5985,
            (None, _) => 22,
        }
    }

    pub fn username(&self) -> &str {
        match (&self.username, self.kind) {
            (Some(name), _) => name,
            (None, CommunicatorKind::Winrm) => "Administrator",
            (None, _) => "root",
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
            .as_deref()
            .and_then(|s| parse_duration(s).ok())
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT)
    }

    /// True when the build should register a keypair of its own.
    pub fn wants_temporary_keypair(&self) -> bool {
        if self.kind == CommunicatorKind::None {
            return false;
        }
        self.temporary_key_pair_name.is_some()
            || self.ssh_private_key_file.is_some()
            || (self.ssh_keypair_name.is_none() && self.password.is_none())
    }

    pub fn public_key_path(&self) -> Option<PathBuf> {
        self.ssh_public_key_file.clone().or_else(|| {
            self.ssh_private_key_file.as_ref().map(|p| {
                let mut os = p.clone().into_os_string();
                os.push(".pub");
                PathBuf::from(os)
            })
        })
    }
}

// =============================================================================
// Image
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageType {
    /// System disk only.
    System,
    /// One image per data disk.
    DataDisk,
    /// System disk together with the data disks.
    SystemData,
    /// Whole server through a backup vault.
    FullEcs,
}

impl ImageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageType::System => "system",
            ImageType::DataDisk => "data-disk",
            ImageType::SystemData => "system-data",
            ImageType::FullEcs => "full-ecs",
        }
    }
}

impl std::fmt::Display for ImageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What gets captured at the end of the build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub name: String,
    /// Inferred from the data disks and vault when unset.
    #[serde(rename = "type")]
    pub image_type: Option<ImageType>,
    pub description: String,
    pub tags: BTreeMap<String, String>,
    /// Projects to share the captured image with.
    pub members: Vec<String>,
    /// Minimum disk size to record on the image, in GB.
    pub min_disk: u32,
    /// Such as `30m` or `1h30m`.
    pub wait_timeout: Option<String>,
    /// Backup vault for `full-ecs` images.
    pub vault_id: Option<String>,
}

impl ImageConfig {
    pub fn image_type(&self) -> ImageType {
        self.image_type.unwrap_or(ImageType::System)
    }

    /// Timeout for image jobs. An unparsable value falls back to the default
    /// and the parse error is returned alongside it.
    pub fn wait_timeout(&self) -> (Duration, Option<String>) {
        match self.wait_timeout.as_deref().filter(|s| !s.is_empty()) {
            None => (DEFAULT_IMAGE_WAIT_TIMEOUT, None),
            Some(raw) => match parse_duration(raw) {
                Ok(timeout) => (timeout, None),
                Err(e) => (
                    DEFAULT_IMAGE_WAIT_TIMEOUT,
                    Some(format!("failed to parse `wait_image_ready_timeout` {raw}: {e}")),
                ),
            },
        }
    }
}

/// A local command run during provisioning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookConfig {
    /// Program and arguments.
    pub command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

// =============================================================================
// Loading and validation
// =============================================================================

impl BuildConfig {
    /// Reads and parses a template without validating it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Fills blanks from the runtime configuration.
    pub fn apply_env(&mut self, config: &Config) {
        if self.access.region.is_empty() {
            if let Some(region) = &config.region {
                self.access.region = region.clone();
            }
        }
        if self.access.project_id.is_empty() {
            if let Some(project) = &config.project_id {
                self.access.project_id = project.clone();
            }
        }
    }

    /// Validates the template and fills in derived defaults.
    ///
    /// Collects every problem instead of stopping at the first.
    pub fn prepare(&mut self) -> Result<(), ConfigError> {
        let mut errs = Vec::new();

        if self.image.name.is_empty() {
            errs.push("image_name must be specified".to_string());
        }
        if self.run.instance_name.is_empty() {
            self.run.instance_name = self.image.name.clone();
        }

        let run = &self.run;
        let image = non_empty(&run.source_image);
        let image_name = non_empty(&run.source_image_name);
        if image.is_none() && image_name.is_none() && run.source_image_filter.filters.is_empty() {
            errs.push(
                "Either a source_image, a source_image_name, or source_image_filter must be specified"
                    .to_string(),
            );
        } else if image.is_some() && image_name.is_some() {
            errs.push(
                "Only a source_image or a source_image_name can be specified, not both."
                    .to_string(),
            );
        }

        if run.flavor.is_empty() {
            errs.push("A flavor must be specified".to_string());
        }

        for (key, value) in &run.instance_metadata {
            if key.len() > MAX_METADATA_BYTES {
                errs.push(format!(
                    "Instance metadata key too long (max 255 bytes): {key}"
                ));
            }
            if value.len() > MAX_METADATA_BYTES {
                errs.push(format!(
                    "Instance metadata value too long (max 255 bytes): {value}"
                ));
            }
        }

        match (non_empty(&run.vpc_id), run.subnets.is_empty()) {
            (Some(_), true) => errs.push("subnets must be specified when vpc_id is set".to_string()),
            (None, false) => errs.push("vpc_id must be specified when subnets are set".to_string()),
            _ => {}
        }

        for (i, disk) in run.data_disks.iter().enumerate() {
            if let Err(e) = disk.source(i) {
                errs.push(e);
            }
        }

        let comm = &run.communicator;
        if comm.ssh_keypair_name.is_some() && comm.ssh_private_key_file.is_none() {
            match comm.kind {
                CommunicatorKind::Winrm if comm.password.is_none() => errs.push(
                    "A ssh_private_key_file must be provided to retrieve the winrm password when using ssh_keypair_name."
                        .to_string(),
                ),
                CommunicatorKind::Ssh => errs.push(
                    "A ssh_private_key_file must be provided when ssh_keypair_name is specified."
                        .to_string(),
                ),
                _ => {}
            }
        }
        if let Some(raw) = &comm.timeout {
            if let Err(e) = parse_duration(raw) {
                errs.push(format!("invalid communicator timeout {raw}: {e}"));
            }
        }

        for (i, hook) in self.provisioners.iter().enumerate() {
            if hook.command.is_empty() {
                errs.push(format!("provisioner[{i}]: command must not be empty"));
            }
        }

        match self.resolve_image_type() {
            Ok(image_type) => self.image.image_type = Some(image_type),
            Err(e) => errs.push(e),
        }

        if errs.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errs))
        }
    }

    fn resolve_image_type(&self) -> Result<ImageType, String> {
        let has_vault = non_empty(&self.image.vault_id).is_some();
        match self.image.image_type {
            None if self.run.data_disks.is_empty() => Ok(ImageType::System),
            None if has_vault => Ok(ImageType::FullEcs),
            None => Ok(ImageType::DataDisk),
            Some(ImageType::FullEcs) if !has_vault => {
                Err("vault_id is missing for Full-ECS image".to_string())
            }
            Some(image_type) => Ok(image_type),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// Parses durations such as `90s`, `30m`, `1h30m` or `500ms`.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty duration".to_string());
    }
    if raw == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = raw;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("missing unit in duration {raw:?}"))?;
        if digits == 0 {
            return Err(format!("invalid duration {raw:?}"));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| format!("invalid duration {raw:?}"))?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit = match &rest[..unit_len] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            other => return Err(format!("unknown unit {other:?} in duration {raw:?}")),
        };
        total += unit;
        rest = &rest[unit_len..];
    }
    Ok(total)
}
