use std::time::Duration;

use async_trait::async_trait;
use kiln_cloud::models::{Address, AddressSpec};
use kiln_cloud::{AddressApi, CloudError};
use kiln_converge::ConvergenceRequest;
use kiln_id::{ResourceHandle, ResourceKind};
use tracing::{debug, warn};

use crate::error::StepError;
use crate::refresh::AddressRefresh;
use crate::state::BuildState;
use crate::step::Step;

const PAGE_LIMIT: u32 = 50;
const DEFAULT_EIP_TYPE: &str = "5_bgp";

/// Picks the elastic IP the instance is reached through.
///
/// In order of preference: the configured `floating_ip`, any unassociated
/// address when `reuse_ips` is set, or a new address when a bandwidth size
/// is configured. Only a new address is deleted on cleanup.
#[derive(Debug, Default)]
pub struct AllocateAddress {
    created: Option<ResourceHandle>,
}

impl AllocateAddress {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Step for AllocateAddress {
    fn name(&self) -> &'static str {
        "allocate-address"
    }

    async fn run(&mut self, state: &mut BuildState) -> Result<(), StepError> {
        let run = state.config.run.clone();
        let api = state.cloud.address.clone();

        let address = if let Some(id) = run.floating_ip.as_deref().filter(|s| !s.is_empty()) {
            state
                .ui
                .say(&format!("Checking the provided public IP {id} ..."));
            let address = api
                .show_address(id)
                .await
                .map_err(|e| StepError::cloud(format!("Error using provided public IP '{id}'"), e))?;
            if let Some(port) = address.port_id.as_deref().filter(|p| !p.is_empty()) {
                return Err(StepError::failed(format!(
                    "Error using provided public IP '{id}': the provided public IP '{id}' is already associated with port '{port}'"
                )));
            }
            address
        } else if run.reuse_ips {
            state.ui.say("Searching for unassociated public IP ...");
            find_free_address(api.as_ref())
                .await
                .map_err(|e| StepError::cloud("Error searching for public IP", e))?
                .ok_or_else(|| {
                    StepError::failed("Error searching for public IP: no free public IPs found")
                })?
        } else if run.eip_bandwidth_size != 0 {
            self.create(state, &run.eip_type, run.eip_bandwidth_size)
                .await?
        } else {
            return Ok(());
        };

        state.ui.message(&format!(
            "Selected public IP: '{}' ({})",
            address.id, address.public_ip
        ));
        state.address = Some(address);
        Ok(())
    }

    async fn cleanup(&mut self, state: &mut BuildState) {
        let Some(handle) = self.created.take() else {
            return;
        };
        let Some(address_id) = handle.live_id() else {
            return;
        };

        match state.cloud.address.delete_address(address_id).await {
            Ok(()) => state
                .ui
                .say(&format!("Deleted temporary public IP '{address_id}'")),
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                warn!(address_id, error = %e, "failed to delete address");
                state.ui.error(&format!(
                    "Error deleting temporary public IP '{address_id}': {e}"
                ));
            }
        }
    }

    fn owned(&self) -> Vec<ResourceHandle> {
        self.created.iter().cloned().collect()
    }
}

impl AllocateAddress {
    async fn create(
        &mut self,
        state: &BuildState,
        eip_type: &Option<String>,
        bandwidth: u32,
    ) -> Result<Address, StepError> {
        state.ui.say("Creating EIP ...");
        let api = state.cloud.address.clone();
        let spec = AddressSpec {
            ip_type: eip_type
                .clone()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_EIP_TYPE.to_string()),
            bandwidth_size: bandwidth,
            bandwidth_share_type: "PER".to_string(),
            bandwidth_name: state.build_id.temp_name("bandwidth"),
        };
        let address = api
            .create_address(&spec)
            .await
            .map_err(|e| StepError::cloud("Error creating EIP", e))?;
        self.created = Some(ResourceHandle::new(ResourceKind::Address, &address.id));
        state.ui.message(&format!(
            "Created EIP: '{}' ({})",
            address.id, address.public_ip
        ));

        let ready = ConvergenceRequest::new(AddressRefresh::new(api, &address.id))
            .pending(["PENDING"])
            .target(["ACTIVE"])
            .timeout(Duration::from_secs(300))
            .delay(Duration::from_secs(5))
            .min_interval(Duration::from_secs(3))
            .cancel_on(state.cancel_signal())
            .wait()
            .await
            .map_err(|e| StepError::wait("Error waiting eip to be active", e))?;
        Ok(ready.resource.unwrap_or(address))
    }
}

/// First address not bound to a port, walking every page.
async fn find_free_address(api: &dyn AddressApi) -> Result<Option<Address>, CloudError> {
    let mut marker: Option<String> = None;
    loop {
        let page = api.list_addresses(marker.as_deref(), PAGE_LIMIT).await?;
        debug!(count = page.addresses.len(), ?marker, "listed addresses");
        if let Some(free) = page.addresses.iter().find(|a| !a.is_associated()) {
            return Ok(Some(free.clone()));
        }
        match page.next_marker {
            Some(next) if !page.addresses.is_empty() => marker = Some(next),
            _ => return Ok(None),
        }
    }
}

/// Binds the elastic IP to the instance's first network interface.
#[derive(Debug, Default)]
pub struct AssociateAddress;

#[async_trait]
impl Step for AssociateAddress {
    fn name(&self) -> &'static str {
        "associate-address"
    }

    async fn run(&mut self, state: &mut BuildState) -> Result<(), StepError> {
        let Some(address) = state.address.clone() else {
            return Ok(());
        };
        let server_id = state.require_server()?.to_string();

        let interfaces = state
            .cloud
            .compute
            .list_interfaces(&server_id)
            .await
            .map_err(|e| StepError::cloud("Error getting interfaces of the instance", e))?;
        let port_id = interfaces
            .first()
            .map(|i| i.port_id.clone())
            .ok_or_else(|| {
                StepError::failed("Error getting interfaces of the instance: no interfaces attached")
            })?;

        state.ui.say(&format!(
            "Associating public IP '{}' ({}) with instance port {port_id} ...",
            address.id, address.public_ip
        ));
        state
            .cloud
            .address
            .associate_address(&address.id, &port_id)
            .await
            .map_err(|e| {
                StepError::cloud(
                    format!(
                        "Error associating public IP '{}' ({}) with instance port '{port_id}'",
                        address.id, address.public_ip
                    ),
                    e,
                )
            })?;

        state.ui.message(&format!(
            "Added public IP '{}' ({}) to instance!",
            address.id, address.public_ip
        ));
        state.ssh_host = Some(address.public_ip);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_cloud::{SimulatedCloud, SimulationSettings};

    fn address(id: &str, port: Option<&str>) -> Address {
        Address {
            id: id.into(),
            public_ip: format!("198.51.100.{}", id.len()),
            status: if port.is_some() { "ACTIVE" } else { "DOWN" }.into(),
            port_id: port.map(Into::into),
        }
    }

    #[tokio::test]
    async fn test_find_free_address_walks_pages() {
        let mut addresses: Vec<_> = (0..60)
            .map(|i| address(&format!("eip-{i:03}"), Some("port-x")))
            .collect();
        addresses.push(address("eip-free", None));
        let cloud = SimulatedCloud::new(SimulationSettings {
            addresses,
            ..Default::default()
        });

        let free = find_free_address(&cloud).await.unwrap().unwrap();
        assert_eq!(free.id, "eip-free");
    }

    #[tokio::test]
    async fn test_find_free_address_none_left() {
        let cloud = SimulatedCloud::new(SimulationSettings {
            addresses: vec![address("eip-1", Some("port-a"))],
            ..Default::default()
        });
        assert!(find_free_address(&cloud).await.unwrap().is_none());
    }
}
