use async_trait::async_trait;
use tracing::info;

use crate::error::StepError;
use crate::hook::{run_hook, HookContext};
use crate::state::BuildState;
use crate::step::Step;

/// Runs the template's provisioners, in order, against the instance.
#[derive(Debug, Default)]
pub struct Provision;

#[async_trait]
impl Step for Provision {
    fn name(&self) -> &'static str {
        "provision"
    }

    async fn run(&mut self, state: &mut BuildState) -> Result<(), StepError> {
        let hooks = state.config.provisioners.clone();
        if hooks.is_empty() {
            return Ok(());
        }

        let ctx = hook_context(state)?;
        for (i, hook) in hooks.iter().enumerate() {
            let command = hook.command.join(" ");
            state
                .ui
                .say(&format!("Running provisioner {}: {command}", i + 1));
            if state.is_cancelled() {
                return Err(StepError::Cancelled);
            }
            if let Err(e) = run_hook(hook, &ctx, state.cancel_signal()).await {
                if state.is_cancelled() {
                    return Err(StepError::Cancelled);
                }
                return Err(StepError::Hook {
                    command,
                    reason: format!("{e:#}"),
                });
            }
            info!(index = i, command = %command, "provisioner finished");
        }
        Ok(())
    }
}

fn hook_context(state: &BuildState) -> Result<HookContext, StepError> {
    let comm = &state.config.run.communicator;
    Ok(HookContext {
        build_id: state.build_id.to_string(),
        server_id: state.require_server()?.to_string(),
        host: state.ssh_host.clone().unwrap_or_default(),
        port: comm.port(),
        communicator: comm.kind.as_str().to_string(),
        username: comm.username().to_string(),
        keypair_name: state.keypair.as_ref().map(|k| k.name.clone()),
        password: state.admin_password.clone(),
        image_name: state.config.image.name.clone(),
    })
}
