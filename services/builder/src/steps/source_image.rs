use async_trait::async_trait;
use kiln_cloud::models::{Image, ImageFilter};
use tracing::debug;

use crate::error::StepError;
use crate::state::BuildState;
use crate::step::Step;

/// Resolves the image the instance boots from.
#[derive(Debug, Default)]
pub struct ResolveSourceImage;

#[async_trait]
impl Step for ResolveSourceImage {
    fn name(&self) -> &'static str {
        "source-image"
    }

    async fn run(&mut self, state: &mut BuildState) -> Result<(), StepError> {
        let run = &state.config.run;

        if let Some(id) = run.source_image.as_deref().filter(|s| !s.is_empty()) {
            let image = state
                .cloud
                .image
                .show_image(id)
                .await
                .map_err(|e| StepError::cloud("Error querying image", e))?;
            state.source_image = Some(image);
            return Ok(());
        }

        let mut filter = run.source_image_filter.filters.to_filter();
        if let Some(name) = run.source_image_name.as_deref().filter(|s| !s.is_empty()) {
            filter.name = Some(name.to_string());
        }
        let most_recent = run.source_image_filter.most_recent;

        debug!(?filter, "using image filters");
        let images = state
            .cloud
            .image
            .list_images(&filter)
            .await
            .map_err(|e| StepError::cloud("Error querying image", e))?;

        let image = pick_image(images, &filter, most_recent)?;
        state
            .ui
            .message(&format!("Found Image ID: {}", image.id));
        state.source_image = Some(image);
        Ok(())
    }
}

fn pick_image(
    mut images: Vec<Image>,
    filter: &ImageFilter,
    most_recent: bool,
) -> Result<Image, StepError> {
    if images.is_empty() {
        return Err(StepError::failed(format!(
            "No image was found matching filters: {filter:?}"
        )));
    }
    if images.len() > 1 && !most_recent {
        return Err(StepError::failed(format!(
            "Your query returned more than one result. Please try a more specific search, or set most_recent to true. Search filters: {filter:?}"
        )));
    }

    images.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(images.swap_remove(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn image(id: &str, age_days: i64) -> Image {
        Image {
            id: id.into(),
            name: "ubuntu".into(),
            status: "active".into(),
            visibility: "public".into(),
            owner: "cloud".into(),
            min_disk_gb: 40,
            created_at: Utc::now() - Duration::days(age_days),
            tags: Vec::new(),
        }
    }

    #[test]
    fn test_no_match() {
        let err = pick_image(Vec::new(), &ImageFilter::default(), true).unwrap_err();
        assert!(err.to_string().starts_with("No image was found matching filters"));
    }

    #[test]
    fn test_ambiguous_without_most_recent() {
        let images = vec![image("a", 3), image("b", 1)];
        let err = pick_image(images, &ImageFilter::default(), false).unwrap_err();
        assert!(err
            .to_string()
            .starts_with("Your query returned more than one result"));
    }

    #[test]
    fn test_most_recent_picks_newest() {
        let images = vec![image("old", 30), image("new", 1), image("mid", 10)];
        let picked = pick_image(images, &ImageFilter::default(), true).unwrap();
        assert_eq!(picked.id, "new");
    }
}
