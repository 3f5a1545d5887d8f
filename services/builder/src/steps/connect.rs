use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kiln_converge::{
    refresh_fn, Converged, ConvergenceError, ConvergenceRequest, Observation, RefreshError,
};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::error::StepError;
use crate::state::BuildState;
use crate::step::Step;
use crate::template::CommunicatorKind;

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether something accepts connections on `host:port`.
#[async_trait]
pub trait Reachability: Send + Sync {
    async fn reachable(&self, host: &str, port: u16) -> bool;
}

/// Dials the port over TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

#[async_trait]
impl Reachability for TcpProbe {
    async fn reachable(&self, host: &str, port: u16) -> bool {
        match timeout(DIAL_TIMEOUT, TcpStream::connect((host, port))).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                debug!(host, port, error = %e, "connection refused");
                false
            }
            Err(_) => {
                debug!(host, port, "connection timed out");
                false
            }
        }
    }
}

/// Reports every address as reachable. Used for simulated instances, which
/// have no network presence.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeReachable;

#[async_trait]
impl Reachability for AssumeReachable {
    async fn reachable(&self, _host: &str, _port: u16) -> bool {
        true
    }
}

/// Waits until the communicator port on the instance accepts connections.
pub struct Connect {
    probe: Arc<dyn Reachability>,
}

impl Connect {
    pub fn new(probe: Arc<dyn Reachability>) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl Step for Connect {
    fn name(&self) -> &'static str {
        "connect"
    }

    async fn run(&mut self, state: &mut BuildState) -> Result<(), StepError> {
        let comm = state.config.run.communicator.clone();
        if comm.kind == CommunicatorKind::None {
            return Ok(());
        }

        let host = match (&comm.host, &state.ssh_host) {
            (Some(host), _) if !host.is_empty() => host.clone(),
            (_, Some(host)) => host.clone(),
            _ => fixed_ip(state).await?,
        };
        let port = comm.port();
        state
            .ui
            .say(&format!("Waiting for {host}:{port} to accept connections..."));

        let probe = self.probe.clone();
        let target = host.clone();
        let refresh = refresh_fn(move || {
            let probe = probe.clone();
            let host = target.clone();
            async move {
                let label = if probe.reachable(&host, port).await {
                    "CONNECTED"
                } else {
                    "CONNECTING"
                };
                Ok::<_, RefreshError>(Observation::found((), label))
            }
        });

        let wait: Pin<Box<dyn Future<Output = Result<Converged<()>, ConvergenceError>> + Send>> =
            Box::pin(
                ConvergenceRequest::new(refresh)
                    .pending(["CONNECTING"])
                    .target(["CONNECTED"])
                    .timeout(comm.timeout())
                    .poll_interval(POLL_INTERVAL)
                    .cancel_on(state.cancel_signal())
                    .wait(),
            );
        wait.await
            .map_err(|e| StepError::wait(format!("Error connecting to {host}:{port}"), e))?;

        info!(host = %host, port, "communicator reachable");
        state.ui.message("Connected!");
        state.ssh_host = Some(host);
        Ok(())
    }
}

/// First private address of the server.
async fn fixed_ip(state: &BuildState) -> Result<String, StepError> {
    let server_id = state.require_server()?;
    state
        .cloud
        .compute
        .list_interfaces(server_id)
        .await
        .map_err(|e| StepError::cloud("Error getting interfaces of the instance", e))?
        .into_iter()
        .map(|i| i.fixed_ip)
        .find(|ip| !ip.is_empty())
        .ok_or_else(|| StepError::failed("the instance has no reachable address"))
}
