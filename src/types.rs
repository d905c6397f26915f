//! Data structures shared by the scanner, detector and reconciler.
//!
//! Everything here is a read snapshot of runtime state taken during one
//! tick.  Nothing is cached across ticks; each tick lists, inspects and
//! pulls afresh so the engine never acts on stale state.

use std::collections::HashMap;
use std::fmt;

use bollard::models::{ContainerConfig, EndpointSettings, HostConfig};
use chrono::{DateTime, Utc};

/// OS/architecture pair an image was built for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
}

impl Platform {
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            architecture: architecture.into(),
        }
    }

    /// Platform retried once when a registry has no manifest for the
    /// container's own platform.
    pub fn fallback() -> Self {
        Self::new("linux", "amd64")
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)
    }
}

/// One row of the runtime's container listing, before eligibility checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListedContainer {
    pub id: String,
    pub name: String,
    /// Image reference as reported by the runtime; may be `sha256:...`.
    pub image: String,
    pub image_id: String,
    pub labels: HashMap<String, String>,
}

/// A container the scanner resolved to a human-readable image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    /// Resolved `repository[:tag]` reference.
    pub image: String,
    /// Opaque content identity of the image the container runs.
    pub image_id: String,
}

/// Metadata of a locally present image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub id: String,
    /// First repository tag, if the image has one.
    pub reference: Option<String>,
    /// Registry-reported creation time, unparsed.
    pub created: Option<String>,
    pub platform: Platform,
}

impl ImageDescriptor {
    /// Creation time, or `None` when absent or not RFC 3339.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.created.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Credential forwarded with every pull; absent means anonymous.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryCredential {
    pub username: String,
    pub password: String,
    pub server_address: String,
}

impl fmt::Debug for RegistryCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("server_address", &self.server_address)
            .finish()
    }
}

/// Full configuration of a container, captured before it is stopped.
///
/// Recreation replays `config`, `host_config` and `networks` verbatim; only
/// the image reference is replaced (see [`ContainerSnapshot::recreate_as`]).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSnapshot {
    pub id: String,
    pub name: String,
    pub image_id: String,
    pub config: ContainerConfig,
    pub host_config: Option<HostConfig>,
    pub networks: HashMap<String, EndpointSettings>,
}

impl ContainerSnapshot {
    /// Creation request for a replacement container running `image`.
    pub fn recreate_as(&self, image: &str) -> ContainerSpec {
        let mut config = self.config.clone();
        config.image = Some(image.to_string());
        ContainerSpec {
            name: self.name.clone(),
            config,
            host_config: self.host_config.clone(),
            networks: self.networks.clone(),
        }
    }
}

/// Everything needed to create a container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub config: ContainerConfig,
    pub host_config: Option<HostConfig>,
    pub networks: HashMap<String, EndpointSettings>,
}

/// Result of pruning unreferenced images.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneSummary {
    pub images_deleted: usize,
    pub space_reclaimed: u64,
}
