//! Reconciler.
//!
//! Moves one container onto the image the detector found:
//!
//! ```text
//! UpdateAvailable -> Stopping -> Removing -> Creating -> Starting -> Started
//!                        \          \           \           \
//!                         +----------+-----------+-----------+--> Failed(step)
//! ```
//!
//! Any failing step aborts the transition and leaves the container as that
//! step left it.  There is no rollback: when removal succeeds and creation
//! fails the container is gone, and later ticks cannot bring it back since
//! there is nothing left to scan.  The failure is reported, not masked.

use std::time::Duration;

use log::{debug, info, warn};

use crate::detector::Update;
use crate::error::{ReconcileError, ReconcileStep};
use crate::logging::UPDATE_TARGET;
use crate::runtime::ContainerRuntime;
use crate::types::ContainerRecord;

/// How a container ended up on the new image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Stopped, removed and recreated; `id` is the new container.
    Recreated { id: String },
    /// Already referenced the target image and was restarted in place.
    Restarted,
}

pub struct Reconciler<'a, R: ?Sized> {
    runtime: &'a R,
    stop_timeout: Duration,
}

impl<'a, R: ContainerRuntime + ?Sized> Reconciler<'a, R> {
    pub fn new(runtime: &'a R, stop_timeout: Duration) -> Self {
        Self {
            runtime,
            stop_timeout,
        }
    }

    pub async fn apply(
        &self,
        container: &ContainerRecord,
        update: &Update,
    ) -> Result<Transition, ReconcileError> {
        let image = self.promote(update).await;

        // Captured before the stop; replayed verbatim apart from the image.
        let snapshot = self
            .runtime
            .inspect_container(&container.id)
            .await
            .map_err(|e| ReconcileError::new(ReconcileStep::Snapshot, e))?;

        if snapshot.image_id == update.image.id {
            debug!("{} already runs {}, restarting", container.name, update.image.id);
            self.runtime
                .restart_container(&snapshot.id, self.stop_timeout)
                .await
                .map_err(|e| ReconcileError::new(ReconcileStep::Restarting, e))?;
            return Ok(Transition::Restarted);
        }

        info!(target: UPDATE_TARGET, "Updating container {} with new image", container.name);

        debug!("Stopping {}", container.name);
        self.runtime
            .stop_container(&snapshot.id, self.stop_timeout)
            .await
            .map_err(|e| ReconcileError::new(ReconcileStep::Stopping, e))?;

        debug!("Removing {}", container.name);
        self.runtime
            .remove_container(&snapshot.id)
            .await
            .map_err(|e| ReconcileError::new(ReconcileStep::Removing, e))?;

        debug!("Creating {} from {}", snapshot.name, image);
        let id = self
            .runtime
            .create_container(&snapshot.recreate_as(&image))
            .await
            .map_err(|e| ReconcileError::new(ReconcileStep::Creating, e))?;

        debug!("Starting {}", id);
        self.runtime
            .start_container(&id)
            .await
            .map_err(|e| ReconcileError::new(ReconcileStep::Starting, e))?;

        Ok(Transition::Recreated { id })
    }

    /// Moves an update found on the secondary tag onto the primary tag and
    /// drops the secondary reference.  Best-effort: returns the reference the
    /// new container should run, falling back to the secondary reference
    /// when retagging fails.
    async fn promote(&self, update: &Update) -> String {
        if !update.secondary {
            return update.primary_reference();
        }

        let pulled = update.pulled_reference();
        let primary = update.primary_reference();
        if let Err(e) = self
            .runtime
            .tag_image(&pulled, &update.repository, &update.primary)
            .await
        {
            warn!("Failed to retag {} as {}: {}", pulled, update.primary, e);
            return pulled;
        }
        info!(target: UPDATE_TARGET, "Retagged {} as {}", pulled, update.primary);

        match self.runtime.remove_image(&pulled).await {
            Ok(()) => info!(target: UPDATE_TARGET, "Removed old tag {}", pulled),
            Err(e) => warn!("Failed to remove old tag {}: {}", pulled, e),
        }
        primary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeError;
    use crate::runtime::mock::MockRuntime;
    use crate::types::{ContainerSnapshot, ImageDescriptor, Platform};
    use bollard::models::{ContainerConfig, EndpointSettings, HostConfig};
    use std::collections::HashMap;

    const REPO: &str = "registry.example.com/team/api";

    fn record() -> ContainerRecord {
        ContainerRecord {
            id: "c1".into(),
            name: "api".into(),
            image: format!("{REPO}:latest"),
            image_id: "sha256:old".into(),
        }
    }

    fn snapshot() -> ContainerSnapshot {
        let mut networks = HashMap::new();
        networks.insert(
            "backend".to_string(),
            EndpointSettings {
                aliases: Some(vec!["api".into()]),
                ..Default::default()
            },
        );
        networks.insert("frontend".to_string(), EndpointSettings::default());
        ContainerSnapshot {
            id: "c1".into(),
            name: "api".into(),
            image_id: "sha256:old".into(),
            config: ContainerConfig {
                image: Some(format!("{REPO}:latest")),
                env: Some(vec!["MODE=prod".into(), "PORT=8080".into()]),
                cmd: Some(vec!["serve".into()]),
                ..Default::default()
            },
            host_config: Some(HostConfig {
                binds: Some(vec!["/srv/api:/data".into()]),
                ..Default::default()
            }),
            networks,
        }
    }

    fn update(tag: &str, secondary: bool) -> Update {
        Update {
            repository: REPO.into(),
            tag: tag.into(),
            primary: "latest".into(),
            secondary,
            image: ImageDescriptor {
                id: "sha256:new".into(),
                reference: Some(format!("{REPO}:{tag}")),
                created: Some("2024-05-02T10:00:00Z".into()),
                platform: Platform::fallback(),
            },
        }
    }

    fn runtime() -> MockRuntime {
        MockRuntime::new().with_snapshot(snapshot())
    }

    #[tokio::test]
    async fn recreate_runs_every_step_in_order() {
        let runtime = runtime();
        let reconciler = Reconciler::new(&runtime, Duration::from_secs(10));

        let transition = reconciler.apply(&record(), &update("latest", false)).await.unwrap();
        assert_eq!(transition, Transition::Recreated { id: "api-new".into() });
        assert_eq!(
            runtime.calls(),
            vec![
                "inspect_container c1".to_string(),
                "stop c1 10s".into(),
                "remove c1".into(),
                format!("create api {REPO}:latest"),
                "start api-new".into(),
            ]
        );
    }

    #[tokio::test]
    async fn recreation_preserves_configuration() {
        let runtime = runtime();
        let reconciler = Reconciler::new(&runtime, Duration::from_secs(10));
        reconciler.apply(&record(), &update("latest", false)).await.unwrap();

        let original = snapshot();
        let created = runtime.created();
        assert_eq!(created.len(), 1);
        let spec = &created[0];
        assert_eq!(spec.name, original.name);
        assert_eq!(spec.config.env, original.config.env);
        assert_eq!(spec.config.cmd, original.config.cmd);
        assert_eq!(spec.host_config, original.host_config);
        assert_eq!(spec.networks, original.networks);
    }

    #[tokio::test]
    async fn stop_failure_aborts_before_removal() {
        let runtime = runtime().failing("stop", "c1");
        let reconciler = Reconciler::new(&runtime, Duration::from_secs(10));

        let err = reconciler.apply(&record(), &update("latest", false)).await.unwrap_err();
        assert_eq!(err.step, ReconcileStep::Stopping);
        assert!(runtime.calls_starting_with("remove").is_empty());
        assert!(runtime.created().is_empty());
    }

    #[tokio::test]
    async fn create_failure_leaves_the_container_removed() {
        let runtime = runtime().failing("create", "api");
        let reconciler = Reconciler::new(&runtime, Duration::from_secs(10));

        let err = reconciler.apply(&record(), &update("latest", false)).await.unwrap_err();
        assert_eq!(err.step, ReconcileStep::Creating);
        assert_eq!(runtime.calls_starting_with("remove c1").len(), 1);
        assert!(runtime.calls_starting_with("start").is_empty());
    }

    #[tokio::test]
    async fn secondary_update_is_promoted_to_primary() {
        let runtime = runtime().with_local_image(update("canary", true).image);
        let reconciler = Reconciler::new(&runtime, Duration::from_secs(10));

        reconciler.apply(&record(), &update("canary", true)).await.unwrap();
        let calls = runtime.calls();
        assert_eq!(calls[0], format!("tag {REPO}:canary {REPO}:latest"));
        assert_eq!(calls[1], format!("remove_image {REPO}:canary"));
        assert_eq!(
            runtime.local_image(&format!("{REPO}:latest")).unwrap().id,
            "sha256:new"
        );
        assert!(runtime.local_image(&format!("{REPO}:canary")).is_none());
        assert_eq!(
            runtime.created()[0].config.image.as_deref(),
            Some(format!("{REPO}:latest").as_str())
        );
    }

    #[tokio::test]
    async fn failed_retag_still_updates_from_the_candidate_tag() {
        let runtime = runtime().failing("tag", "");
        let reconciler = Reconciler::new(&runtime, Duration::from_secs(10));

        reconciler.apply(&record(), &update("canary", true)).await.unwrap();
        assert!(runtime.calls_starting_with("remove_image").is_empty());
        assert_eq!(
            runtime.created()[0].config.image.as_deref(),
            Some(format!("{REPO}:canary").as_str())
        );
    }

    #[tokio::test]
    async fn container_already_on_target_image_is_restarted_in_place() {
        let runtime = MockRuntime::new().with_snapshot(ContainerSnapshot {
            image_id: "sha256:new".into(),
            ..snapshot()
        });
        let reconciler = Reconciler::new(&runtime, Duration::from_secs(10));

        let transition = reconciler.apply(&record(), &update("latest", false)).await.unwrap();
        assert_eq!(transition, Transition::Restarted);
        assert_eq!(
            runtime.calls(),
            vec!["inspect_container c1".to_string(), "restart c1 10s".into()]
        );
    }

    #[tokio::test]
    async fn missing_container_fails_at_snapshot() {
        let runtime = MockRuntime::new();
        let reconciler = Reconciler::new(&runtime, Duration::from_secs(10));
        let err = reconciler.apply(&record(), &update("latest", false)).await.unwrap_err();
        assert_eq!(err.step, ReconcileStep::Snapshot);
        assert!(matches!(err.source, RuntimeError::NotFound(_)));
    }
}
