//! Update detector.
//!
//! For one eligible container, probes the registry tag by tag and decides
//! whether a newer build exists.  A differing content identity is not
//! enough: the pulled image must also have been created strictly later than
//! the running one, so a tag moved back onto an older build never counts
//! as an update.

use log::{debug, warn};

use crate::error::{DetectError, RuntimeError};
use crate::reference::ImageReference;
use crate::runtime::ContainerRuntime;
use crate::types::{ContainerRecord, ImageDescriptor, Platform, RegistryCredential};

/// Tags to probe for one container, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePlan {
    pub repository: String,
    /// Primary tag first, then the secondary candidate tag if configured.
    pub tags: Vec<String>,
    pub secondary: Option<String>,
    pub platform: Platform,
    pub fallback_platform: Platform,
}

impl UpdatePlan {
    pub fn new(image: &str, secondary: Option<&str>, platform: Platform) -> Self {
        let reference = ImageReference::parse(image);
        let primary = reference.tag_or_default().to_string();
        let mut tags = vec![primary.clone()];
        let secondary = secondary
            .filter(|t| !t.is_empty() && *t != primary)
            .map(str::to_string);
        if let Some(tag) = &secondary {
            tags.push(tag.clone());
        }
        let platform = if platform.os.is_empty() || platform.architecture.is_empty() {
            Platform::fallback()
        } else {
            platform
        };
        Self {
            repository: reference.repository,
            tags,
            secondary,
            platform,
            fallback_platform: Platform::fallback(),
        }
    }

    pub fn primary(&self) -> &str {
        &self.tags[0]
    }

    pub fn reference(&self, tag: &str) -> String {
        format!("{}:{}", self.repository, tag)
    }
}

/// A newer image found on `tag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub repository: String,
    pub tag: String,
    /// Tag the container should end up on.
    pub primary: String,
    /// Whether `tag` is the secondary candidate tag.
    pub secondary: bool,
    pub image: ImageDescriptor,
}

impl Update {
    pub fn pulled_reference(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }

    pub fn primary_reference(&self) -> String {
        format!("{}:{}", self.repository, self.primary)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    NoUpdate,
    UpdateAvailable(Update),
}

/// Whether `pulled` is a genuinely newer build than `current`.
///
/// Same identity, a missing or unparseable timestamp on either side, or a
/// pulled timestamp that is not strictly later all mean no update.
pub fn is_newer(current: &ImageDescriptor, pulled: &ImageDescriptor) -> bool {
    if pulled.id == current.id {
        return false;
    }
    match (current.created_at(), pulled.created_at()) {
        (Some(local), Some(remote)) => remote > local,
        _ => false,
    }
}

pub struct Detector<'a, R: ?Sized> {
    runtime: &'a R,
    credential: Option<&'a RegistryCredential>,
    secondary: Option<&'a str>,
}

impl<'a, R: ContainerRuntime + ?Sized> Detector<'a, R> {
    pub fn new(
        runtime: &'a R,
        credential: Option<&'a RegistryCredential>,
        secondary: Option<&'a str>,
    ) -> Self {
        Self {
            runtime,
            credential,
            secondary,
        }
    }

    pub async fn check(&self, container: &ContainerRecord) -> Result<Detection, DetectError> {
        let current = self
            .runtime
            .inspect_image(&container.image_id)
            .await
            .map_err(|source| DetectError::CurrentImage {
                image_id: container.image_id.clone(),
                source,
            })?;

        let plan = UpdatePlan::new(&container.image, self.secondary, current.platform.clone());
        let mut last_error = None;
        let mut probed = false;

        for tag in &plan.tags {
            let reference = plan.reference(tag);
            debug!("Checking container {} with tag {}", container.name, tag);

            let pulled = match self.pull(&plan, &reference).await {
                Ok(pulled) => pulled,
                Err(e) => {
                    warn!("Error pulling {} ({}): {}", container.name, tag, e);
                    last_error = Some(e);
                    continue;
                }
            };
            probed = true;

            if is_newer(&current, &pulled) {
                debug!(
                    "Image {} has newer build (remote: {:?} > local: {:?})",
                    reference, pulled.created, current.created
                );
                return Ok(Detection::UpdateAvailable(Update {
                    repository: plan.repository.clone(),
                    tag: tag.clone(),
                    primary: plan.primary().to_string(),
                    secondary: plan.secondary.as_deref() == Some(tag.as_str()),
                    image: pulled,
                }));
            }
            debug!("{} is up to date on tag {}", container.name, tag);
        }

        match last_error {
            Some(last) if !probed => Err(DetectError::AllTagsFailed {
                repository: plan.repository,
                last,
            }),
            _ => Ok(Detection::NoUpdate),
        }
    }

    /// Pulls `reference` for the container's platform, retrying once on the
    /// fallback platform when the registry has no matching manifest, then
    /// inspects the result.
    async fn pull(&self, plan: &UpdatePlan, reference: &str) -> Result<ImageDescriptor, RuntimeError> {
        match self
            .runtime
            .pull_image(reference, &plan.platform, self.credential)
            .await
        {
            Ok(()) => {}
            Err(RuntimeError::ManifestMismatch { .. }) if plan.platform != plan.fallback_platform => {
                debug!(
                    "No {} manifest for {}, retrying with {}",
                    plan.platform, reference, plan.fallback_platform
                );
                self.runtime
                    .pull_image(reference, &plan.fallback_platform, self.credential)
                    .await?;
            }
            Err(e) => return Err(e),
        }
        self.runtime.inspect_image(reference).await
    }
}
