//! The result of a successful build.

use chrono::{DateTime, Utc};
use kiln_cloud::{CloudError, ImageApi};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub const BUILDER_ID: &str = "kiln.image";

/// Images captured by one build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub builder_id: String,
    pub image_ids: Vec<String>,
    pub region: String,
    pub created_at: DateTime<Utc>,
}

/// Images that could not be deleted.
#[derive(Debug, Error)]
#[error("failed to destroy {}", .failures.iter().map(|(id, e)| format!("{id}: {e}")).collect::<Vec<_>>().join("; "))]
pub struct DestroyError {
    pub failures: Vec<(String, CloudError)>,
}

impl Artifact {
    pub fn new(image_ids: Vec<String>, region: impl Into<String>) -> Self {
        Self {
            builder_id: BUILDER_ID.to_string(),
            image_ids,
            region: region.into(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> String {
        self.image_ids.join(";")
    }

    /// Deletes every image, continuing past failures.
    pub async fn destroy(&self, images: &dyn ImageApi) -> Result<(), DestroyError> {
        let mut failures = Vec::new();
        for image_id in &self.image_ids {
            info!(image_id = %image_id, "destroying image");
            if let Err(e) = images.delete_image(image_id).await {
                failures.push((image_id.clone(), e));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(DestroyError { failures })
        }
    }
}

impl std::fmt::Display for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "An image was created: {}", self.id())
    }
}
