//! Refresh functions for each kind of remote resource.
//!
//! Each one performs a single "show" call and maps the provider's answer onto
//! an [`Observation`]. Provider-reported failures (a server in `ERROR`, a job
//! in `FAIL`) become a [`RefreshError`] carrying that label and the provider's
//! reason, so the wait ends with the remote explanation rather than a generic
//! "unexpected state".

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kiln_cloud::models::{job_status, Address, Job, Server, Volume};
use kiln_cloud::{AddressApi, CloudError, ComputeApi, ImageApi, NetworkApi, VolumeApi};
use kiln_converge::{ConvergenceRequest, Observation, Refresh, RefreshError};
use tracing::{debug, warn};

/// Label used when a deleted resource is confirmed gone.
pub const DELETED: &str = "DELETED";

fn query_error(err: CloudError) -> RefreshError {
    RefreshError::new(err.to_string())
}

// =============================================================================
// Servers
// =============================================================================

pub struct ServerRefresh {
    compute: Arc<dyn ComputeApi>,
    server_id: String,
    error_is_terminal: bool,
}

impl ServerRefresh {
    pub fn new(compute: Arc<dyn ComputeApi>, server_id: impl Into<String>) -> Self {
        Self {
            compute,
            server_id: server_id.into(),
            error_is_terminal: true,
        }
    }

    /// Report `ERROR` as an ordinary label. Used while deleting a server,
    /// which may pass through `ERROR` on its way out.
    pub fn tolerate_error(mut self) -> Self {
        self.error_is_terminal = false;
        self
    }
}

#[async_trait]
impl Refresh for ServerRefresh {
    type Output = Server;

    async fn refresh(&mut self) -> Result<Observation<Server>, RefreshError> {
        match self.compute.show_server(&self.server_id).await {
            Ok(server) if self.error_is_terminal && server.status == "ERROR" => {
                let reason = server
                    .fault
                    .unwrap_or_else(|| "server entered ERROR state".to_string());
                Err(RefreshError::with_state("ERROR", reason))
            }
            Ok(server) => {
                let status = server.status.clone();
                Ok(Observation::found(server, status))
            }
            Err(e) if e.is_not_found() => Ok(Observation::absent(DELETED)),
            Err(e) => Err(query_error(e)),
        }
    }
}

// =============================================================================
// Jobs
// =============================================================================

/// The service a job belongs to.
#[derive(Clone)]
pub enum JobService {
    Compute(Arc<dyn ComputeApi>),
    Volume(Arc<dyn VolumeApi>),
    Image(Arc<dyn ImageApi>),
}

impl JobService {
    async fn show_job(&self, job_id: &str) -> Result<Job, CloudError> {
        match self {
            JobService::Compute(api) => api.show_job(job_id).await,
            JobService::Volume(api) => api.show_job(job_id).await,
            JobService::Image(api) => api.show_job(job_id).await,
        }
    }
}

/// Polls an asynchronous job. `INIT` and `RUNNING` are pending, `SUCCESS` is
/// the target, and `FAIL` ends the wait with the job's failure reason.
pub struct JobRefresh {
    service: JobService,
    job_id: String,
    errors_as_absent: bool,
}

impl JobRefresh {
    pub fn new(service: JobService, job_id: impl Into<String>) -> Self {
        Self {
            service,
            job_id: job_id.into(),
            errors_as_absent: false,
        }
    }

    /// Treat a failed query as "not visible yet". The image service answers
    /// with errors for a while after a job is submitted.
    pub fn query_errors_as_absent(mut self) -> Self {
        self.errors_as_absent = true;
        self
    }
}

#[async_trait]
impl Refresh for JobRefresh {
    type Output = Job;

    async fn refresh(&mut self) -> Result<Observation<Job>, RefreshError> {
        let job = match self.service.show_job(&self.job_id).await {
            Ok(job) => job,
            Err(e) if e.is_not_found() || self.errors_as_absent => {
                debug!(job_id = %self.job_id, error = %e, "job not visible yet");
                return Ok(Observation::absent(""));
            }
            Err(e) => return Err(query_error(e)),
        };

        if job.status == job_status::FAIL {
            let reason = job
                .fail_reason
                .clone()
                .unwrap_or_else(|| format!("job {} failed", job.id));
            return Err(RefreshError::with_state(job_status::FAIL, reason));
        }

        let status = job.status.clone();
        Ok(Observation::found(job, status))
    }
}

/// Volume made by a volume-creation job, for cleaning up after a wait on that
/// job was cut short.
///
/// A job that has not named its volume yet is waited on (without honouring
/// cancellation) and asked again. `None` means the job made no volume.
pub async fn job_volume(
    service: JobService,
    job_id: &str,
    timeout: Duration,
) -> Result<Option<String>, CloudError> {
    let job = match service.show_job(job_id).await {
        Ok(job) => job,
        Err(e) if e.is_not_found() => return Ok(None),
        Err(e) => return Err(e),
    };
    let running = [job_status::INIT, job_status::RUNNING].contains(&job.status.as_str());
    if job.entities.volume_id.is_some() || !running {
        return Ok(job.entities.volume_id);
    }

    let settled = ConvergenceRequest::new(JobRefresh::new(service.clone(), job_id))
        .pending([job_status::INIT, job_status::RUNNING])
        .target([job_status::SUCCESS])
        .timeout(timeout)
        .min_interval(Duration::from_secs(2))
        .wait()
        .await;
    if let Err(e) = settled {
        warn!(job_id, error = %e, "volume job did not finish");
    }

    match service.show_job(job_id).await {
        Ok(job) => Ok(job.entities.volume_id),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

// =============================================================================
// Networking
// =============================================================================

/// What a delete-and-confirm refresh removes.
#[derive(Debug, Clone)]
pub enum NetworkTarget {
    Vpc { vpc_id: String },
    Subnet { vpc_id: String, subnet_id: String },
}

/// Repeats a delete until it goes through.
///
/// A conflict means dependants still exist and reads as `ACTIVE`; success or
/// not-found reads as [`DELETED`].
pub struct DeleteNetworkRefresh {
    network: Arc<dyn NetworkApi>,
    target: NetworkTarget,
}

impl DeleteNetworkRefresh {
    pub fn new(network: Arc<dyn NetworkApi>, target: NetworkTarget) -> Self {
        Self { network, target }
    }
}

#[async_trait]
impl Refresh for DeleteNetworkRefresh {
    type Output = ();

    async fn refresh(&mut self) -> Result<Observation<()>, RefreshError> {
        let result = match &self.target {
            NetworkTarget::Vpc { vpc_id } => self.network.delete_vpc(vpc_id).await,
            NetworkTarget::Subnet { vpc_id, subnet_id } => {
                self.network.delete_subnet(vpc_id, subnet_id).await
            }
        };
        match result {
            Ok(()) => Ok(Observation::found((), DELETED)),
            Err(e) if e.is_not_found() => Ok(Observation::found((), DELETED)),
            Err(e) if e.is_conflict() => Ok(Observation::found((), "ACTIVE")),
            Err(e) => Err(query_error(e)),
        }
    }
}

/// Polls a VPC by id.
pub struct VpcRefresh {
    network: Arc<dyn NetworkApi>,
    vpc_id: String,
}

impl VpcRefresh {
    pub fn new(network: Arc<dyn NetworkApi>, vpc_id: impl Into<String>) -> Self {
        Self {
            network,
            vpc_id: vpc_id.into(),
        }
    }
}

#[async_trait]
impl Refresh for VpcRefresh {
    type Output = ();

    async fn refresh(&mut self) -> Result<Observation<()>, RefreshError> {
        match self.network.show_vpc(&self.vpc_id).await {
            Ok(vpc) => Ok(Observation::found((), vpc.status)),
            Err(e) if e.is_not_found() => Ok(Observation::absent("")),
            Err(e) => Err(query_error(e)),
        }
    }
}

/// Polls a subnet by id.
pub struct SubnetRefresh {
    network: Arc<dyn NetworkApi>,
    subnet_id: String,
}

impl SubnetRefresh {
    pub fn new(network: Arc<dyn NetworkApi>, subnet_id: impl Into<String>) -> Self {
        Self {
            network,
            subnet_id: subnet_id.into(),
        }
    }
}

#[async_trait]
impl Refresh for SubnetRefresh {
    type Output = ();

    async fn refresh(&mut self) -> Result<Observation<()>, RefreshError> {
        match self.network.show_subnet(&self.subnet_id).await {
            Ok(subnet) => Ok(Observation::found((), subnet.status)),
            Err(e) if e.is_not_found() => Ok(Observation::absent("")),
            Err(e) => Err(query_error(e)),
        }
    }
}

// =============================================================================
// Elastic IPs, volumes, passwords
// =============================================================================

/// Polls an elastic IP. An unbound address reports `DOWN`, which counts as
/// ready.
pub struct AddressRefresh {
    api: Arc<dyn AddressApi>,
    address_id: String,
}

impl AddressRefresh {
    pub fn new(api: Arc<dyn AddressApi>, address_id: impl Into<String>) -> Self {
        Self {
            api,
            address_id: address_id.into(),
        }
    }
}

#[async_trait]
impl Refresh for AddressRefresh {
    type Output = Address;

    async fn refresh(&mut self) -> Result<Observation<Address>, RefreshError> {
        match self.api.show_address(&self.address_id).await {
            Ok(address) => {
                let state = match address.status.as_str() {
                    "DOWN" | "ACTIVE" => "ACTIVE".to_string(),
                    other => other.to_string(),
                };
                Ok(Observation::found(address, state))
            }
            Err(e) if e.is_not_found() => Ok(Observation::absent("")),
            Err(e) => Err(query_error(e)),
        }
    }
}

pub struct VolumeRefresh {
    api: Arc<dyn VolumeApi>,
    volume_id: String,
}

impl VolumeRefresh {
    pub fn new(api: Arc<dyn VolumeApi>, volume_id: impl Into<String>) -> Self {
        Self {
            api,
            volume_id: volume_id.into(),
        }
    }
}

#[async_trait]
impl Refresh for VolumeRefresh {
    type Output = Volume;

    async fn refresh(&mut self) -> Result<Observation<Volume>, RefreshError> {
        match self.api.show_volume(&self.volume_id).await {
            Ok(volume) if volume.status == "error" => Err(RefreshError::with_state(
                "error",
                format!("volume {} entered error state", volume.id),
            )),
            Ok(volume) => {
                let status = volume.status.clone();
                Ok(Observation::found(volume, status))
            }
            Err(e) if e.is_not_found() => Ok(Observation::absent(DELETED)),
            Err(e) => Err(query_error(e)),
        }
    }
}

/// Polls for the encrypted administrator password. Empty means `PENDING`.
pub struct PasswordRefresh {
    compute: Arc<dyn ComputeApi>,
    server_id: String,
}

impl PasswordRefresh {
    pub fn new(compute: Arc<dyn ComputeApi>, server_id: impl Into<String>) -> Self {
        Self {
            compute,
            server_id: server_id.into(),
        }
    }
}

#[async_trait]
impl Refresh for PasswordRefresh {
    type Output = String;

    async fn refresh(&mut self) -> Result<Observation<String>, RefreshError> {
        match self.compute.show_password(&self.server_id).await {
            Ok(blob) if blob.is_empty() => Ok(Observation::found(blob, "PENDING")),
            Ok(blob) => Ok(Observation::found(blob, "SUCCESS")),
            Err(e) => Err(query_error(e)),
        }
    }
}
