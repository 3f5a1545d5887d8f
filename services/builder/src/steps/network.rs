use std::time::Duration;

use async_trait::async_trait;
use kiln_cloud::models::{SubnetSpec, VpcSpec};
use kiln_converge::ConvergenceRequest;
use kiln_id::{ResourceHandle, ResourceKind};
use tracing::{info, warn};

use crate::error::StepError;
use crate::refresh::{DeleteNetworkRefresh, NetworkTarget, SubnetRefresh, VpcRefresh, DELETED};
use crate::state::BuildState;
use crate::step::Step;

const VPC_CIDR: &str = "172.16.0.0/16";
const SUBNET_CIDR: &str = "172.16.0.0/24";
const SUBNET_GATEWAY: &str = "172.16.0.1";

/// Private DNS servers per region. Regions not listed get public resolvers.
const PRIVATE_DNS: &[(&str, &[&str])] = &[
    ("cn-north-1", &["100.125.1.250", "100.125.21.250"]),
    ("cn-north-4", &["100.125.1.250", "100.125.129.250"]),
    ("cn-north-9", &["100.125.1.250", "100.125.107.250"]),
    ("cn-east-2", &["100.125.17.29", "100.125.135.29"]),
    ("cn-east-3", &["100.125.1.250", "100.125.64.250"]),
    ("cn-south-1", &["100.125.1.250", "100.125.136.29"]),
    ("cn-south-4", &["100.125.0.167"]),
    ("cn-southwest-2", &["100.125.1.250", "100.125.129.250"]),
    ("ap-southeast-1", &["100.125.1.250", "100.125.3.250"]),
    ("ap-southeast-2", &["100.125.1.250", "100.125.1.251"]),
    ("ap-southeast-3", &["100.125.1.250", "100.125.128.250"]),
    ("af-south-1", &["100.125.1.250", "100.125.1.14"]),
    ("tr-west-1", &["100.125.2.250", "100.125.2.251"]),
    ("sa-brazil-1", &["100.125.1.22", "100.125.1.90"]),
    ("na-mexico-1", &["100.125.1.22", "100.125.1.90"]),
    ("la-north-2", &["100.125.1.250", "100.125.1.242"]),
    ("la-south-2", &["100.125.1.250", "100.125.0.250"]),
    ("sa-chile-1", &["100.125.1.250", "100.125.0.250"]),
];

const PUBLIC_DNS: &[&str] = &["8.8.8.8", "114.114.114.114"];

pub fn dns_servers(region: &str) -> Vec<String> {
    PRIVATE_DNS
        .iter()
        .find(|(name, _)| *name == region)
        .map_or(PUBLIC_DNS, |(_, servers)| *servers)
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Uses the configured VPC and subnets, or creates a temporary VPC with one
/// subnet.
#[derive(Debug, Default)]
pub struct CreateNetwork {
    vpc: Option<ResourceHandle>,
    subnet: Option<ResourceHandle>,
}

impl CreateNetwork {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Step for CreateNetwork {
    fn name(&self) -> &'static str {
        "create-network"
    }

    async fn run(&mut self, state: &mut BuildState) -> Result<(), StepError> {
        let run = state.config.run.clone();

        if let Some(vpc_id) = run.vpc_id.as_deref().filter(|s| !s.is_empty()) {
            state
                .cloud
                .network
                .show_vpc(vpc_id)
                .await
                .map_err(|e| StepError::cloud(format!("Error loading VPC {vpc_id}"), e))?;
            state.vpc_id = Some(vpc_id.to_string());
            state.subnet_ids = run.subnets.clone();
        } else {
            self.create_temporary(state).await?;
        }

        if run.security_groups.is_empty() {
            state
                .ui
                .message("the [default] security groups will be used ...");
        } else {
            state.ui.message(&format!(
                "the {:?} security groups will be used ...",
                run.security_groups
            ));
        }
        Ok(())
    }

    async fn cleanup(&mut self, state: &mut BuildState) {
        let subnet = self.subnet.take();
        let vpc = self.vpc.take();
        let vpc_id = vpc.as_ref().and_then(|h| h.live_id()).map(str::to_string);

        if let (Some(subnet_id), Some(vpc_id)) =
            (subnet.as_ref().and_then(|h| h.live_id()), vpc_id.clone())
        {
            state
                .ui
                .say(&format!("Deleting temporary subnet: {subnet_id}..."));
            let target = NetworkTarget::Subnet {
                vpc_id,
                subnet_id: subnet_id.to_string(),
            };
            if let Err(e) = confirm_delete(state, target).await {
                warn!(subnet_id, error = %e, "subnet cleanup failed");
                state.ui.error(&format!(
                    "Error cleaning up subnet {subnet_id}. Please delete it manually: {e}"
                ));
            }
        }

        if let Some(vpc_id) = vpc_id {
            state
                .ui
                .say(&format!("Deleting temporary VPC: {vpc_id}..."));
            let target = NetworkTarget::Vpc {
                vpc_id: vpc_id.clone(),
            };
            if let Err(e) = confirm_delete(state, target).await {
                warn!(vpc_id = %vpc_id, error = %e, "vpc cleanup failed");
                state.ui.error(&format!(
                    "Error cleaning up VPC {vpc_id}. Please delete it manually: {e}"
                ));
            }
        }
    }

    fn owned(&self) -> Vec<ResourceHandle> {
        self.subnet.iter().chain(self.vpc.iter()).cloned().collect()
    }
}

impl CreateNetwork {
    async fn create_temporary(&mut self, state: &mut BuildState) -> Result<(), StepError> {
        let network = state.cloud.network.clone();

        state.ui.say("Creating temporary VPC...");
        let vpc_name = state.build_id.temp_name("vpc");
        let vpc = network
            .create_vpc(&VpcSpec {
                name: vpc_name.clone(),
                cidr: VPC_CIDR.to_string(),
            })
            .await
            .map_err(|e| StepError::cloud("Error creating VPC", e))?;
        self.vpc = Some(ResourceHandle::new(ResourceKind::Network, &vpc.id));
        state.vpc_id = Some(vpc.id.clone());

        ConvergenceRequest::new(VpcRefresh::new(network.clone(), &vpc.id))
            .pending(["CREATING"])
            .target(["OK"])
            .timeout(Duration::from_secs(180))
            .delay(Duration::from_secs(5))
            .min_interval(Duration::from_secs(3))
            .cancel_on(state.cancel_signal())
            .wait()
            .await
            .map_err(|e| {
                StepError::wait(format!("Error waiting for VPC {vpc_name}({})", vpc.id), e)
            })?;
        info!(vpc_id = %vpc.id, "temporary vpc ready");
        state
            .ui
            .message(&format!("temporary VPC ID: {}", vpc.id));

        state.ui.say("Creating temporary subnet...");
        let region = state.config.access.region.clone();
        let subnet_name = state.build_id.temp_name("subnet");
        let subnet = network
            .create_subnet(&SubnetSpec {
                name: subnet_name.clone(),
                vpc_id: vpc.id.clone(),
                cidr: SUBNET_CIDR.to_string(),
                gateway_ip: SUBNET_GATEWAY.to_string(),
                dns_servers: dns_servers(&region),
            })
            .await
            .map_err(|e| StepError::cloud("Error creating subnet", e))?;
        self.subnet = Some(ResourceHandle::new(ResourceKind::Subnet, &subnet.id));
        state.subnet_ids = vec![subnet.id.clone()];

        ConvergenceRequest::new(SubnetRefresh::new(network, &subnet.id))
            .pending(["UNKNOWN"])
            .target(["ACTIVE"])
            .timeout(Duration::from_secs(180))
            .delay(Duration::from_secs(5))
            .min_interval(Duration::from_secs(3))
            .cancel_on(state.cancel_signal())
            .wait()
            .await
            .map_err(|e| {
                StepError::wait(
                    format!("Error waiting for subnet {subnet_name}({})", subnet.id),
                    e,
                )
            })?;
        info!(subnet_id = %subnet.id, "temporary subnet ready");
        state
            .ui
            .message(&format!("temporary subnet ID: {}", subnet.id));
        Ok(())
    }
}

async fn confirm_delete(
    state: &BuildState,
    target: NetworkTarget,
) -> Result<(), kiln_converge::ConvergenceError> {
    ConvergenceRequest::new(DeleteNetworkRefresh::new(
        state.cloud.network.clone(),
        target,
    ))
    .pending(["ACTIVE"])
    .target([DELETED])
    .timeout(Duration::from_secs(180))
    .delay(Duration::from_secs(3))
    .min_interval(Duration::from_secs(5))
    .wait()
    .await
    .map(|_| ())
}
