//! In-memory runtime used by the engine tests.
//!
//! Every call is recorded as a short string (`"pull app:latest linux/amd64"`)
//! so tests can assert on exactly what the engine asked the runtime to do.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{ContainerRuntime, Result};
use crate::error::RuntimeError;
use crate::types::{
    ContainerSnapshot, ContainerSpec, ImageDescriptor, ListedContainer, Platform, PruneSummary,
    RegistryCredential,
};

#[derive(Default)]
pub struct MockRuntime {
    containers: Vec<ListedContainer>,
    list_error: Option<RuntimeError>,
    list_delay: Option<Duration>,
    lists_in_flight: AtomicUsize,
    max_lists_in_flight: AtomicUsize,
    snapshots: HashMap<String, ContainerSnapshot>,
    /// Images the registry serves, keyed by `repository:tag`.
    remote: HashMap<String, ImageDescriptor>,
    /// Pull failures keyed by reference; `None` platform fails every platform.
    pull_failures: HashMap<String, Vec<(Option<Platform>, RuntimeError)>>,
    /// `(operation, target)` pairs that fail; an empty target fails every call.
    failures: HashSet<(String, String)>,
    prune: PruneSummary,
    images: Mutex<HashMap<String, ImageDescriptor>>,
    calls: Mutex<Vec<String>>,
    created: Mutex<Vec<ContainerSpec>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_container(mut self, container: ListedContainer) -> Self {
        self.containers.push(container);
        self
    }

    pub fn with_snapshot(mut self, snapshot: ContainerSnapshot) -> Self {
        self.snapshots.insert(snapshot.id.clone(), snapshot);
        self
    }

    /// A locally present image, reachable by its id and its reference.
    pub fn with_local_image(self, image: ImageDescriptor) -> Self {
        {
            let mut images = self.images.lock().unwrap();
            if let Some(reference) = &image.reference {
                images.insert(reference.clone(), image.clone());
            }
            images.insert(image.id.clone(), image);
        }
        self
    }

    /// An image the registry returns when `reference` is pulled.
    pub fn with_remote_image(mut self, reference: &str, image: ImageDescriptor) -> Self {
        self.remote.insert(reference.to_string(), image);
        self
    }

    pub fn with_pull_failure(
        mut self,
        reference: &str,
        platform: Option<Platform>,
        error: RuntimeError,
    ) -> Self {
        self.pull_failures
            .entry(reference.to_string())
            .or_default()
            .push((platform, error));
        self
    }

    /// Makes every listing take `delay` of (tokio) time.
    pub fn with_list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = Some(delay);
        self
    }

    /// Highest number of listings observed running at the same time.
    pub fn max_concurrent_lists(&self) -> usize {
        self.max_lists_in_flight.load(Ordering::SeqCst)
    }

    pub fn with_list_error(mut self, error: RuntimeError) -> Self {
        self.list_error = Some(error);
        self
    }

    /// Makes `operation` fail for `target` (or for everything when empty).
    pub fn failing(mut self, operation: &str, target: &str) -> Self {
        self.failures
            .insert((operation.to_string(), target.to_string()));
        self
    }

    pub fn with_prune_result(mut self, prune: PruneSummary) -> Self {
        self.prune = prune;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn created(&self) -> Vec<ContainerSpec> {
        self.created.lock().unwrap().clone()
    }

    pub fn local_image(&self, reference: &str) -> Option<ImageDescriptor> {
        self.images.lock().unwrap().get(reference).cloned()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, operation: &str, target: &str) -> Result<()> {
        let failing = self
            .failures
            .contains(&(operation.to_string(), target.to_string()))
            || self
                .failures
                .contains(&(operation.to_string(), String::new()));
        if failing {
            return Err(RuntimeError::Api(format!("mock {operation} failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn ping(&self) -> Result<()> {
        self.record("ping".into());
        Ok(())
    }

    async fn list_containers(&self) -> Result<Vec<ListedContainer>> {
        self.record("list".into());
        let in_flight = self.lists_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_lists_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);
        if let Some(delay) = self.list_delay {
            tokio::time::sleep(delay).await;
        }
        self.lists_in_flight.fetch_sub(1, Ordering::SeqCst);
        match &self.list_error {
            Some(err) => Err(err.clone()),
            None => Ok(self.containers.clone()),
        }
    }

    async fn inspect_image(&self, reference: &str) -> Result<ImageDescriptor> {
        self.record(format!("inspect_image {reference}"));
        self.images
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(reference.to_string()))
    }

    async fn pull_image(
        &self,
        reference: &str,
        platform: &Platform,
        _credential: Option<&RegistryCredential>,
    ) -> Result<()> {
        self.record(format!("pull {reference} {platform}"));
        if let Some(failures) = self.pull_failures.get(reference) {
            for (on, error) in failures {
                if on.as_ref().map_or(true, |p| p == platform) {
                    return Err(error.clone());
                }
            }
        }
        let image = self
            .remote
            .get(reference)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(format!("manifest unknown: {reference}")))?;
        let mut images = self.images.lock().unwrap();
        images.insert(image.id.clone(), image.clone());
        images.insert(reference.to_string(), image);
        Ok(())
    }

    async fn tag_image(&self, source: &str, repository: &str, tag: &str) -> Result<()> {
        self.record(format!("tag {source} {repository}:{tag}"));
        self.check("tag", source)?;
        let mut images = self.images.lock().unwrap();
        let image = images
            .get(source)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(source.to_string()))?;
        images.insert(format!("{repository}:{tag}"), image);
        Ok(())
    }

    async fn remove_image(&self, reference: &str) -> Result<()> {
        self.record(format!("remove_image {reference}"));
        self.check("remove_image", reference)?;
        self.images.lock().unwrap().remove(reference);
        Ok(())
    }

    async fn prune_images(&self) -> Result<PruneSummary> {
        self.record("prune".into());
        self.check("prune", "")?;
        Ok(self.prune)
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerSnapshot> {
        self.record(format!("inspect_container {id}"));
        self.check("inspect_container", id)?;
        self.snapshots
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<()> {
        self.record(format!("stop {id} {}s", grace.as_secs()));
        self.check("stop", id)
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.record(format!("remove {id}"));
        self.check("remove", id)
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let image = spec.config.image.clone().unwrap_or_default();
        self.record(format!("create {} {image}", spec.name));
        self.check("create", &spec.name)?;
        self.created.lock().unwrap().push(spec.clone());
        Ok(format!("{}-new", spec.name))
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.record(format!("start {id}"));
        self.check("start", id)
    }

    async fn restart_container(&self, id: &str, grace: Duration) -> Result<()> {
        self.record(format!("restart {id} {}s", grace.as_secs()));
        self.check("restart", id)
    }
}
