//! Local provisioning hooks.
//!
//! A hook is a command run on the build host once the instance is reachable.
//! It learns about the instance through `KILN_*` environment variables.

use std::collections::BTreeMap;
use std::process::Stdio;

use anyhow::{bail, Context};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::template::HookConfig;

/// What a hook is told about the instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookContext {
    pub build_id: String,
    pub server_id: String,
    pub host: String,
    pub port: u16,
    pub communicator: String,
    pub username: String,
    pub keypair_name: Option<String>,
    pub password: Option<String>,
    pub image_name: String,
}

impl HookContext {
    pub fn env(&self) -> BTreeMap<&'static str, String> {
        let mut env = BTreeMap::from([
            ("KILN_BUILD_ID", self.build_id.clone()),
            ("KILN_SERVER_ID", self.server_id.clone()),
            ("KILN_HOST", self.host.clone()),
            ("KILN_PORT", self.port.to_string()),
            ("KILN_COMMUNICATOR", self.communicator.clone()),
            ("KILN_USERNAME", self.username.clone()),
            ("KILN_IMAGE_NAME", self.image_name.clone()),
        ]);
        if let Some(name) = &self.keypair_name {
            env.insert("KILN_KEYPAIR_NAME", name.clone());
        }
        if let Some(password) = &self.password {
            env.insert("KILN_PASSWORD", password.clone());
        }
        env
    }
}

/// Runs one hook to completion. A non-zero exit is an error carrying the
/// tail of stderr. Firing `cancel` kills the child.
pub async fn run_hook(
    hook: &HookConfig,
    ctx: &HookContext,
    mut cancel: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let (program, args) = hook
        .command
        .split_first()
        .context("provisioner command is empty")?;

    let mut command = Command::new(program);
    command
        .args(args)
        .envs(ctx.env())
        .envs(&hook.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &hook.working_dir {
        command.current_dir(dir);
    }

    debug!(program = %program, ?args, "starting hook");
    let child = command
        .spawn()
        .with_context(|| format!("failed to start {program}"))?;

    let output = tokio::select! {
        output = child.wait_with_output() => output.context("failed to wait for hook")?,
        _ = cancelled(&mut cancel) => bail!("interrupted"),
    };

    for line in String::from_utf8_lossy(&output.stdout).lines() {
        info!(hook = %program, "{line}");
    }
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: Vec<_> = stderr.lines().rev().take(5).collect();
        let tail: Vec<_> = tail.into_iter().rev().collect();
        bail!("exited with {}: {}", output.status, tail.join("\n"));
    }
    Ok(())
}

/// Resolves once `true` is published; never if the sender is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|set| *set).await.is_err() {
        std::future::pending::<()>().await;
    }
}
