use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{Config, CreateContainerOptions, LogsOptions};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerStateStatusEnum, HostConfig};
use bollard::Docker;
use chrono::Utc;
use futures::StreamExt;
use tokio::time::sleep;
use tracing::{debug, error, info, trace, warn};

use crate::application::ApplicationStatus;
use crate::error::Error;

/// Containers are polled at this interval while waiting for them to reach
/// (and keep) the `running` state.
const POLL_INTERVAL: Duration = Duration::from_secs(10);

pub struct ContainerSettingsBuilder {
    network_name: Option<String>,
    base_domain: Option<String>,
    deploy_timeout: Option<Duration>,
}

impl Default for ContainerSettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerSettingsBuilder {
    pub fn new() -> Self {
        Self {
            network_name: None,
            base_domain: None,
            deploy_timeout: None,
        }
    }

    pub fn network_name<S: ToString>(mut self, name: S) -> Self {
        self.network_name = Some(name.to_string());
        self
    }

    pub fn base_domain<S: ToString>(mut self, domain: S) -> Self {
        self.base_domain = Some(domain.to_string());
        self
    }

    pub fn deploy_timeout(mut self, timeout: Duration) -> Self {
        self.deploy_timeout = Some(timeout);
        self
    }

    pub fn build(mut self) -> ContainerSettings {
        let network_name = self.network_name.take().unwrap();
        let base_domain = self.base_domain.take().unwrap();
        let deploy_timeout = self.deploy_timeout.take().unwrap();

        ContainerSettings {
            network_name,
            base_domain,
            deploy_timeout,
        }
    }
}

#[derive(Clone)]
pub struct ContainerSettings {
    pub network_name: String,
    pub base_domain: String,
    pub deploy_timeout: Duration,
}

impl ContainerSettings {
    pub fn builder() -> ContainerSettingsBuilder {
        ContainerSettingsBuilder::new()
    }
}

/// What a successful [`ContainerRuntime::run`] observed.
#[derive(Clone, Debug)]
pub struct ContainerInfo {
    pub status: ApplicationStatus,
    pub id: String,
    pub name: String,
    pub route: String,
    pub logs: String,
    pub started_at: i64,
}

/// Operations the orchestrator needs from the container engine. The
/// production implementation is [`ContainerRuntime`]; tests substitute an
/// in-memory double.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Pull the image (authenticating against its registry when
    /// credentials are given), run it detached behind the proxy, and wait
    /// for it to stay running.
    async fn run(
        &self,
        image_name: &str,
        subdomain: &str,
        container_name: &str,
        registry_credentials: Option<&str>,
    ) -> Result<ContainerInfo, Error>;

    /// Start a stopped container. Returns the new start timestamp, or
    /// `None` when the container was already running.
    async fn start(&self, container_id: &str) -> Result<Option<i64>, Error>;

    /// Stop and remove a container by id or name. Returns whether a
    /// container was actually found.
    async fn delete(&self, id_or_name: &str) -> Result<bool, Error>;
}

/// [`Runtime`] backed by the local container engine. One instance is
/// shared process-wide.
#[derive(Clone)]
pub struct ContainerRuntime {
    docker: Docker,
    settings: ContainerSettings,
}

impl ContainerRuntime {
    pub fn new(docker: Docker, settings: ContainerSettings) -> Self {
        Self { docker, settings }
    }

    pub fn settings(&self) -> &ContainerSettings {
        &self.settings
    }
}

#[async_trait]
impl Runtime for ContainerRuntime {
    async fn run(
        &self,
        image_name: &str,
        subdomain: &str,
        container_name: &str,
        registry_credentials: Option<&str>,
    ) -> Result<ContainerInfo, Error> {
        let credentials = registry_credentials
            .map(|credentials| registry_auth(image_name, credentials))
            .transpose()?;

        self.pull_image(image_name, credentials).await?;

        let route = format!("{subdomain}.app.{}", self.settings.base_domain);
        let labels = traefik_labels(subdomain, &route);

        info!(%image_name, %container_name, "attempting to run container");
        let config = Config {
            image: Some(image_name.to_string()),
            labels: Some(labels),
            host_config: Some(HostConfig {
                network_mode: Some(self.settings.network_name.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let container = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: container_name.to_string(),
                    ..Default::default()
                }),
                config,
            )
            .await
            .map_err(Error::Docker)?;

        self.docker
            .start_container::<String>(&container.id, None)
            .await
            .map_err(Error::Docker)?;

        self.wait_for_running(&container.id).await?;
        info!(container_id = %container.id, "started container");

        let logs = self.container_logs(&container.id).await;

        Ok(ContainerInfo {
            status: ApplicationStatus::Running,
            id: container.id,
            name: container_name.to_string(),
            route,
            logs,
            started_at: Utc::now().timestamp(),
        })
    }

    async fn start(&self, container_id: &str) -> Result<Option<i64>, Error> {
        if container_id.is_empty() {
            return Err(Error::InvalidParameter(
                "container id is required".to_string(),
            ));
        }

        let status = match self.docker.inspect_container(container_id, None).await {
            Ok(container) => container.state.and_then(|state| state.status),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                return Err(Error::InvalidParameter(format!(
                    "Container {container_id} not found"
                )))
            }
            Err(err) => return Err(Error::Docker(err)),
        };

        if status == Some(ContainerStateStatusEnum::RUNNING) {
            info!(%container_id, "container is already running");
            return Ok(None);
        }

        match self
            .docker
            .start_container::<String>(container_id, None)
            .await
        {
            Ok(()) => {
                info!(%container_id, "started container");
                Ok(Some(Utc::now().timestamp()))
            }
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Err(Error::InvalidParameter(format!(
                "Container {container_id} not found"
            ))),
            Err(err) => Err(Error::Docker(err)),
        }
    }

    async fn delete(&self, id_or_name: &str) -> Result<bool, Error> {
        if id_or_name.is_empty() {
            return Err(Error::InvalidParameter(
                "container id or name is required".to_string(),
            ));
        }

        match self.docker.inspect_container(id_or_name, None).await {
            Ok(_) => {}
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                info!(container = %id_or_name, "container already does not exist");
                return Ok(false);
            }
            Err(err) => return Err(Error::Docker(err)),
        }

        self.stop_and_remove(id_or_name).await?;
        info!(container = %id_or_name, "stopped and removed container");

        Ok(true)
    }
}

impl ContainerRuntime {
    /// The container's collected stdout and stderr, best effort.
    pub async fn container_logs(&self, container_id: &str) -> String {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: "all".to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.logs(container_id, Some(options));
        let mut collected = String::new();

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(output) => collected.push_str(&String::from_utf8_lossy(&output.into_bytes())),
                Err(err) => {
                    warn!(%container_id, error = %err, "failed to read container logs");
                    break;
                }
            }
        }

        collected
    }

    async fn pull_image(
        &self,
        image_name: &str,
        credentials: Option<DockerCredentials>,
    ) -> Result<(), Error> {
        info!(%image_name, "attempting to pull image");
        let authenticated = credentials.is_some();

        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image_name.to_string(),
                ..Default::default()
            }),
            None,
            credentials,
        );

        while let Some(progress) = stream.next().await {
            match progress {
                Ok(info) => {
                    if let Some(status) = info.status {
                        trace!(%status, "pull progress");
                    }
                    if let Some(message) = info.error {
                        return Err(pull_failure(image_name, authenticated, &message, None));
                    }
                }
                Err(DockerError::DockerResponseServerError {
                    status_code,
                    message,
                }) => {
                    return Err(pull_failure(
                        image_name,
                        authenticated,
                        &message,
                        Some(status_code),
                    ))
                }
                Err(err) => return Err(Error::Docker(err)),
            }
        }

        Ok(())
    }

    /// Wait until the container reports `running` on two consecutive polls.
    /// A container that exits, or that is still not running when the deploy
    /// timeout elapses, is stopped, removed, and reported as a start
    /// failure carrying its captured logs.
    async fn wait_for_running(&self, container_id: &str) -> Result<(), Error> {
        let started = Instant::now();
        let mut confirmed = false;
        let mut status = self.container_status(container_id).await?;

        while !(status == ContainerStateStatusEnum::RUNNING && confirmed) {
            if status == ContainerStateStatusEnum::RUNNING {
                confirmed = true;
                info!(%container_id, "container is running, waiting to see if it stays running");
            }

            sleep(POLL_INTERVAL).await;
            status = self.container_status(container_id).await?;
            debug!(%container_id, status = state_str(status), "waiting for container to start");

            if started.elapsed() > self.settings.deploy_timeout
                || status == ContainerStateStatusEnum::EXITED
            {
                let message = format!(
                    "Container {container_id} failed to start in {} seconds. The status is {}",
                    started.elapsed().as_secs(),
                    state_str(status),
                );
                error!("{message}");

                let logs = self.container_logs(container_id).await;
                if let Err(err) = self.stop_and_remove(container_id).await {
                    warn!(%container_id, error = %err, "failed to clean up container that did not start");
                } else {
                    info!(%container_id, "stopped and removed container");
                }

                return Err(Error::ContainerStart {
                    message,
                    container_id: container_id.to_string(),
                    container_status: state_str(status).to_string(),
                    logs,
                });
            }
        }

        Ok(())
    }

    async fn container_status(
        &self,
        container_id: &str,
    ) -> Result<ContainerStateStatusEnum, Error> {
        let container = self
            .docker
            .inspect_container(container_id, None)
            .await
            .map_err(Error::Docker)?;

        Ok(container
            .state
            .and_then(|state| state.status)
            .unwrap_or(ContainerStateStatusEnum::EMPTY))
    }

    async fn stop_and_remove(&self, id_or_name: &str) -> Result<(), Error> {
        match self.docker.stop_container(id_or_name, None).await {
            Ok(()) => {}
            // 304: already stopped; 404: gone in the meantime
            Err(DockerError::DockerResponseServerError {
                status_code: 304 | 404,
                ..
            }) => {}
            Err(err) => return Err(Error::Docker(err)),
        }

        match self.docker.remove_container(id_or_name, None).await {
            Ok(()) => Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(err) => Err(Error::Docker(err)),
        }
    }
}

/// The labels Traefik picks up to route `route` to the container.
fn traefik_labels(subdomain: &str, route: &str) -> HashMap<String, String> {
    HashMap::from([
        ("traefik.enable".to_string(), "true".to_string()),
        (
            format!("traefik.http.routers.{subdomain}.rule"),
            format!("Host(`{route}`)"),
        ),
        (
            format!("traefik.http.routers.{subdomain}.entrypoints"),
            "web".to_string(),
        ),
    ])
}

/// Extract the registry from an image name: the first `/`-separated
/// segment, iff it looks like a host (contains `.` or `:`). A bare or
/// `user/image` name means the default public registry.
pub fn registry_from_image_name(image_name: &str) -> Option<&str> {
    let (first, _) = image_name.split_once('/')?;

    if first.contains('.') || first.contains(':') {
        Some(first)
    } else {
        None
    }
}

/// Build the per-pull registry credentials from a `user:password` string.
/// The engine performs the actual login when the image is pulled.
fn registry_auth(image_name: &str, credentials: &str) -> Result<DockerCredentials, Error> {
    let registry = registry_from_image_name(image_name).ok_or_else(|| {
        Error::InvalidParameter(format!(
            "Could not extract registry from image name {image_name}"
        ))
    })?;

    let (username, password) = credentials.split_once(':').ok_or_else(|| {
        Error::InvalidParameter("registry credentials must be in user:password format".to_string())
    })?;

    debug!(%registry, %username, "authenticating image pull against registry");

    Ok(DockerCredentials {
        username: Some(username.to_string()),
        password: Some(password.to_string()),
        serveraddress: Some(registry.to_string()),
        ..Default::default()
    })
}

/// Map a failed pull onto the error taxonomy. The engine reports a missing
/// image as 404 and a rejected registry login as 401 or an
/// "unauthorized"/"access denied" message.
fn pull_failure(
    image_name: &str,
    authenticated: bool,
    message: &str,
    status_code: Option<u16>,
) -> Error {
    let lowered = message.to_lowercase();

    if status_code == Some(401) {
        error!(%image_name, "registry rejected the supplied credentials");
        return Error::Unauthorized;
    }

    if lowered.contains("unauthorized") || lowered.contains("access denied") {
        if authenticated {
            error!(%image_name, "registry rejected the supplied credentials");
            return Error::Unauthorized;
        }
        return Error::InvalidParameter(format!("Image {image_name} not found."));
    }

    if status_code == Some(404) || lowered.contains("not found") || lowered.contains("manifest unknown")
    {
        error!(%image_name, "image not found");
        return Error::InvalidParameter(format!("Image {image_name} not found."));
    }

    Error::Internal(format!("failed to pull image {image_name}: {message}"))
}

fn state_str(status: ContainerStateStatusEnum) -> &'static str {
    match status {
        ContainerStateStatusEnum::CREATED => "created",
        ContainerStateStatusEnum::RUNNING => "running",
        ContainerStateStatusEnum::PAUSED => "paused",
        ContainerStateStatusEnum::RESTARTING => "restarting",
        ContainerStateStatusEnum::REMOVING => "removing",
        ContainerStateStatusEnum::EXITED => "exited",
        ContainerStateStatusEnum::DEAD => "dead",
        ContainerStateStatusEnum::EMPTY => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_extraction() {
        assert_eq!(registry_from_image_name("alpine"), None);
        assert_eq!(registry_from_image_name("user/alpine"), None);
        assert_eq!(registry_from_image_name("myreg.io/alpine"), Some("myreg.io"));
        assert_eq!(
            registry_from_image_name("localhost:5000/alpine"),
            Some("localhost:5000")
        );
        assert_eq!(
            registry_from_image_name("registry.example.com/team/app"),
            Some("registry.example.com")
        );
    }

    #[test]
    fn registry_auth_builds_engine_credentials() {
        let credentials = registry_auth("myreg.io/alpine", "user:pass").unwrap();

        assert_eq!(credentials.username.as_deref(), Some("user"));
        assert_eq!(credentials.password.as_deref(), Some("pass"));
        assert_eq!(credentials.serveraddress.as_deref(), Some("myreg.io"));
    }

    #[test]
    fn registry_auth_password_may_contain_colons() {
        let credentials = registry_auth("myreg.io/alpine", "user:pa:ss").unwrap();

        assert_eq!(credentials.password.as_deref(), Some("pa:ss"));
    }

    #[test]
    fn credentials_without_a_registry_are_rejected() {
        assert!(matches!(
            registry_auth("alpine", "user:pass"),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn malformed_credentials_are_rejected() {
        assert!(matches!(
            registry_auth("myreg.io/alpine", "nocolon"),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn routing_labels_cover_rule_and_entrypoint() {
        let labels = traefik_labels("alpha", "alpha.app.example.com");

        assert_eq!(labels.get("traefik.enable").unwrap(), "true");
        assert_eq!(
            labels.get("traefik.http.routers.alpha.rule").unwrap(),
            "Host(`alpha.app.example.com`)"
        );
        assert_eq!(
            labels.get("traefik.http.routers.alpha.entrypoints").unwrap(),
            "web"
        );
    }

    #[test]
    fn pull_failures_map_to_the_error_taxonomy() {
        assert!(matches!(
            pull_failure("ghost/app", false, "manifest unknown", Some(404)),
            Error::InvalidParameter(_)
        ));
        assert!(matches!(
            pull_failure("myreg.io/app", true, "unauthorized: incorrect username or password", Some(500)),
            Error::Unauthorized
        ));
        assert!(matches!(
            pull_failure(
                "ghost/app",
                false,
                "pull access denied for ghost/app, repository does not exist",
                None
            ),
            Error::InvalidParameter(_)
        ));
        assert!(matches!(
            pull_failure("alpine", false, "connection reset by peer", Some(500)),
            Error::Internal(_)
        ));
    }
}
