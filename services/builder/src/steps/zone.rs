use async_trait::async_trait;
use rand::seq::IndexedRandom;
use tracing::info;

use crate::error::StepError;
use crate::state::BuildState;
use crate::step::Step;

/// Validates the configured availability zone or picks an available one at
/// random.
#[derive(Debug, Default)]
pub struct LoadAvailabilityZone;

#[async_trait]
impl Step for LoadAvailabilityZone {
    fn name(&self) -> &'static str {
        "load-availability-zone"
    }

    async fn run(&mut self, state: &mut BuildState) -> Result<(), StepError> {
        state.ui.say("Loading available zones ...");
        let zones: Vec<String> = state
            .cloud
            .compute
            .list_availability_zones()
            .await
            .map_err(|e| StepError::cloud("Error getting zones", e))?
            .into_iter()
            .filter(|z| z.available)
            .map(|z| z.name)
            .collect();

        let zone = match state.config.run.availability_zone.as_deref() {
            Some(wanted) if !wanted.is_empty() => {
                if !zones.iter().any(|z| z == wanted) {
                    return Err(StepError::failed(format!(
                        "the specified availability_zone {wanted} is not exist or available"
                    )));
                }
                state.ui.message(&format!(
                    "the specified availability_zone {wanted} is available"
                ));
                wanted.to_string()
            }
            _ => {
                state
                    .ui
                    .message(&format!("Available zones: {}", zones.join(" ")));
                let picked = zones
                    .choose(&mut rand::rng())
                    .cloned()
                    .ok_or_else(|| StepError::failed("No available zones"))?;
                state
                    .ui
                    .message(&format!("Select {picked} as the available zone"));
                picked
            }
        };

        info!(zone = %zone, "availability zone selected");
        state.availability_zone = Some(zone);
        Ok(())
    }
}
