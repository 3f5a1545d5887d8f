use async_trait::async_trait;
use tracing::debug;

use crate::error::StepError;
use crate::state::BuildState;
use crate::step::Step;

/// Confirms the configured flavor exists.
#[derive(Debug, Default)]
pub struct LoadFlavor;

#[async_trait]
impl Step for LoadFlavor {
    fn name(&self) -> &'static str {
        "load-flavor"
    }

    async fn run(&mut self, state: &mut BuildState) -> Result<(), StepError> {
        let wanted = state.config.run.flavor.clone();
        state.ui.say(&format!("Loading flavor: {wanted}"));

        let flavor = state
            .cloud
            .compute
            .show_flavor(&wanted)
            .await
            .map_err(|e| StepError::cloud(format!("Error querying flavor {wanted}"), e))?;
        debug!(flavor = %flavor.id, vcpus = flavor.vcpus, ram_mb = flavor.ram_mb, "flavor verified");

        state
            .ui
            .message(&format!("Verified flavor ID: {}", flavor.id));
        state.flavor_id = Some(flavor.id);
        Ok(())
    }
}
