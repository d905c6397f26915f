use super::{ContainerRuntime, Result};
use crate::error::RuntimeError;
use crate::types::{
    ContainerSnapshot, ContainerSpec, ImageDescriptor, ListedContainer, Platform, PruneSummary,
    RegistryCredential,
};
use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    NetworkingConfig, RemoveContainerOptions, RestartContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::{CreateImageOptions, PruneImagesOptions, RemoveImageOptions, TagImageOptions};
use bollard::Docker;
use futures_util::stream::StreamExt;
use log::debug;
use std::time::Duration;

/// Daemon message for a tag that is not published for the requested platform.
const MANIFEST_MISMATCH: &str = "no matching manifest";

/// [`ContainerRuntime`] backed by the local Docker daemon.
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects to the local Docker daemon using default settings
    /// (`DOCKER_HOST` or the unix socket on Linux).
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Connection(e.to_string()))?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::Connection(e.to_string()))
    }

    async fn list_containers(&self) -> Result<Vec<ListedContainer>> {
        let opts = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(opts))
            .await
            .map_err(|e| classify("list containers", e))?;

        Ok(containers
            .into_iter()
            .map(|c| {
                let id = c.id.unwrap_or_default();
                let name = c
                    .names
                    .as_ref()
                    .and_then(|n| n.first())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_else(|| id.clone());
                ListedContainer {
                    id,
                    name,
                    image: c.image.unwrap_or_default(),
                    image_id: c.image_id.unwrap_or_default(),
                    labels: c.labels.unwrap_or_default(),
                }
            })
            .collect())
    }

    async fn inspect_image(&self, reference: &str) -> Result<ImageDescriptor> {
        let image = self
            .docker
            .inspect_image(reference)
            .await
            .map_err(|e| classify("inspect image", e))?;

        Ok(ImageDescriptor {
            id: image.id.unwrap_or_default(),
            reference: image.repo_tags.and_then(|tags| tags.into_iter().next()),
            created: image.created,
            platform: Platform::new(
                image.os.unwrap_or_default(),
                image.architecture.unwrap_or_default(),
            ),
        })
    }

    async fn pull_image(
        &self,
        reference: &str,
        platform: &Platform,
        credential: Option<&RegistryCredential>,
    ) -> Result<()> {
        let opts = CreateImageOptions {
            from_image: reference.to_string(),
            platform: platform.to_string(),
            ..Default::default()
        };
        let credentials = credential.map(|c| DockerCredentials {
            username: Some(c.username.clone()),
            password: Some(c.password.clone()),
            serveraddress: Some(c.server_address.clone()),
            ..Default::default()
        });

        // The pull is only complete once the progress stream is drained.
        let mut stream = self.docker.create_image(Some(opts), None, credentials);
        while let Some(msg) = stream.next().await {
            let info = msg.map_err(|e| classify_pull(e.to_string(), platform))?;
            if let Some(error) = info.error {
                return Err(classify_pull(error, platform));
            }
            if let Some(status) = info.status {
                debug!("pull {}: {}", reference, status);
            }
        }
        Ok(())
    }

    async fn tag_image(&self, source: &str, repository: &str, tag: &str) -> Result<()> {
        let opts = TagImageOptions {
            repo: repository.to_string(),
            tag: tag.to_string(),
        };
        self.docker
            .tag_image(source, Some(opts))
            .await
            .map_err(|e| classify("tag image", e))
    }

    async fn remove_image(&self, reference: &str) -> Result<()> {
        let opts = RemoveImageOptions {
            force: true,
            noprune: false,
        };
        self.docker
            .remove_image(reference, Some(opts), None)
            .await
            .map(|_| ())
            .map_err(|e| classify("remove image", e))
    }

    async fn prune_images(&self) -> Result<PruneSummary> {
        let pruned = self
            .docker
            .prune_images(None::<PruneImagesOptions<String>>)
            .await
            .map_err(|e| classify("prune images", e))?;

        Ok(PruneSummary {
            images_deleted: pruned.images_deleted.map_or(0, |d| d.len()),
            space_reclaimed: pruned
                .space_reclaimed
                .and_then(|b| u64::try_from(b).ok())
                .unwrap_or(0),
        })
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerSnapshot> {
        let detail = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| classify("inspect container", e))?;

        Ok(ContainerSnapshot {
            id: detail.id.unwrap_or_else(|| id.to_string()),
            name: detail
                .name
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            image_id: detail.image.unwrap_or_default(),
            config: detail.config.unwrap_or_default(),
            host_config: detail.host_config,
            networks: detail
                .network_settings
                .and_then(|s| s.networks)
                .unwrap_or_default(),
        })
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<()> {
        let opts = StopContainerOptions {
            t: i64::try_from(grace.as_secs()).unwrap_or(i64::MAX),
        };
        self.docker
            .stop_container(id, Some(opts))
            .await
            .map_err(|e| classify("stop container", e))
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.docker
            .remove_container(id, None::<RemoveContainerOptions>)
            .await
            .map_err(|e| classify("remove container", e))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let opts = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let mut config: Config<String> = spec.config.clone().into();
        config.host_config = spec.host_config.clone();
        config.networking_config = Some(NetworkingConfig {
            endpoints_config: spec.networks.clone(),
        });

        let created = self
            .docker
            .create_container(Some(opts), config)
            .await
            .map_err(|e| classify("create container", e))?;
        for warning in &created.warnings {
            debug!("create {}: {}", spec.name, warning);
        }
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| classify("start container", e))
    }

    async fn restart_container(&self, id: &str, grace: Duration) -> Result<()> {
        let opts = RestartContainerOptions {
            t: isize::try_from(grace.as_secs()).unwrap_or(isize::MAX),
        };
        self.docker
            .restart_container(id, Some(opts))
            .await
            .map_err(|e| classify("restart container", e))
    }
}

fn classify(operation: &str, err: BollardError) -> RuntimeError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::NotFound(message),
        BollardError::IOError { err } => RuntimeError::Connection(format!("{operation}: {err}")),
        BollardError::SocketNotFoundError(path) => {
            RuntimeError::Connection(format!("{operation}: socket not found at {path}"))
        }
        other => RuntimeError::Api(format!("{operation}: {other}")),
    }
}

fn classify_pull(message: String, platform: &Platform) -> RuntimeError {
    if message.contains(MANIFEST_MISMATCH) {
        RuntimeError::ManifestMismatch {
            platform: platform.clone(),
            message,
        }
    } else {
        RuntimeError::Api(format!("pull image: {message}"))
    }
}
