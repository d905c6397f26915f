use std::time::Duration;

use async_trait::async_trait;

use crate::error::RuntimeError;
use crate::types::{
    ContainerSnapshot, ContainerSpec, ImageDescriptor, ListedContainer, Platform, PruneSummary,
    RegistryCredential,
};

pub mod docker;
pub use docker::DockerRuntime;

#[cfg(test)]
pub mod mock;

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// The container runtime primitives the reconciliation engine relies on.
///
/// Implementations are used from a single worker at a time; no call is
/// ever issued concurrently with another.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Checks that the runtime daemon is reachable.
    async fn ping(&self) -> Result<()>;

    /// Lists every container, running or stopped, in runtime order.
    async fn list_containers(&self) -> Result<Vec<ListedContainer>>;

    /// Inspects a local image by id or reference.
    async fn inspect_image(&self, reference: &str) -> Result<ImageDescriptor>;

    /// Pulls `reference` for `platform`, waiting for the pull to finish.
    ///
    /// A registry without a manifest for `platform` must be reported as
    /// [`RuntimeError::ManifestMismatch`].
    async fn pull_image(
        &self,
        reference: &str,
        platform: &Platform,
        credential: Option<&RegistryCredential>,
    ) -> Result<()>;

    /// Points `repository:tag` at the image `source`.
    async fn tag_image(&self, source: &str, repository: &str, tag: &str) -> Result<()>;

    /// Removes the image reference `reference`.
    async fn remove_image(&self, reference: &str) -> Result<()>;

    /// Removes images no container references.
    async fn prune_images(&self) -> Result<PruneSummary>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerSnapshot>;

    /// Stops a container, killing it once `grace` has elapsed.
    async fn stop_container(&self, id: &str, grace: Duration) -> Result<()>;

    async fn remove_container(&self, id: &str) -> Result<()>;

    /// Creates a container and returns its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start_container(&self, id: &str) -> Result<()>;

    async fn restart_container(&self, id: &str, grace: Duration) -> Result<()>;
}
