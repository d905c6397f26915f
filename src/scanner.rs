//! Inventory scanner.
//!
//! Lists every container the runtime manages, resolves content-addressed
//! image references to a tag and decides which containers the engine may
//! touch.  The scan is read-only; a listing failure abandons the tick.

use log::{debug, warn};

use crate::config::Config;
use crate::error::TickError;
use crate::reference::is_content_address;
use crate::runtime::ContainerRuntime;
use crate::types::{ContainerRecord, ListedContainer};

/// Why a container is, or is not, handed to the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    /// Label filtering is on and the enable label is missing or falsy.
    LabelMissing,
    /// The image reference is a content address with no tag to resolve to.
    Unresolved,
    /// The image does not come from the configured registry.
    OtherRegistry,
}

#[derive(Debug, Clone)]
pub struct ScannedContainer {
    pub record: ContainerRecord,
    pub eligibility: Eligibility,
}

impl ScannedContainer {
    pub fn is_eligible(&self) -> bool {
        self.eligibility == Eligibility::Eligible
    }
}

/// Lists containers in runtime order, each annotated with its eligibility.
pub async fn scan<R: ContainerRuntime + ?Sized>(
    runtime: &R,
    config: &Config,
) -> Result<Vec<ScannedContainer>, TickError> {
    let containers = runtime
        .list_containers()
        .await
        .map_err(TickError::Inventory)?;

    let mut scanned = Vec::with_capacity(containers.len());
    for container in containers {
        scanned.push(classify(runtime, config, container).await);
    }

    let eligible = scanned.iter().filter(|c| c.is_eligible()).count();
    debug!(
        "Found {} total containers, {} eligible for updates",
        scanned.len(),
        eligible
    );
    Ok(scanned)
}

async fn classify<R: ContainerRuntime + ?Sized>(
    runtime: &R,
    config: &Config,
    container: ListedContainer,
) -> ScannedContainer {
    let ListedContainer {
        id,
        name,
        image,
        image_id,
        labels,
    } = container;

    let labelled = labels
        .get(&config.enable_label)
        .is_some_and(|v| is_truthy(v));

    let resolved = if is_content_address(&image) {
        match runtime.inspect_image(&image_id).await {
            Ok(descriptor) => {
                if let Some(tag) = &descriptor.reference {
                    debug!("Resolved digest {} to tag {}", image, tag);
                }
                descriptor.reference
            }
            Err(e) => {
                warn!("Failed to resolve image of {}: {}", name, e);
                None
            }
        }
    } else {
        Some(image)
    };

    let eligibility = if config.label_enable && !labelled {
        Eligibility::LabelMissing
    } else {
        match &resolved {
            None => Eligibility::Unresolved,
            Some(reference) if matches_registry(reference, config) => Eligibility::Eligible,
            Some(_) => Eligibility::OtherRegistry,
        }
    };

    ScannedContainer {
        record: ContainerRecord {
            id,
            name,
            image: resolved.unwrap_or_default(),
            image_id,
        },
        eligibility,
    }
}

/// Substring match against the registry host or, failing that, the
/// username (short references omit the host).  With neither configured,
/// every reference matches.
pub fn matches_registry(reference: &str, config: &Config) -> bool {
    let needles: Vec<&str> = [
        config.registry_url.as_deref().map(registry_host),
        config.registry_username.as_deref(),
    ]
    .into_iter()
    .flatten()
    .filter(|n| !n.is_empty())
    .collect();

    needles.is_empty() || needles.iter().any(|n| reference.contains(n))
}

fn registry_host(url: &str) -> &str {
    let url = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    url.trim_end_matches('/')
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}
