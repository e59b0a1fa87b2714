use anyhow::Context;
use async_trait::async_trait;
use bollard::Docker;
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerCreateBody, HostConfig, PortBinding};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, CreateImageOptionsBuilder, InspectContainerOptions,
    ListContainersOptionsBuilder, LogsOptionsBuilder, RemoveContainerOptionsBuilder,
    RestartContainerOptions, StartContainerOptions, StopContainerOptions,
};
use futures_util::TryStreamExt;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("container not found")]
    NotFound,
    #[error("docker api error: {0}")]
    Api(String),
}

fn map_docker_err(e: BollardError) -> RuntimeError {
    match e {
        BollardError::DockerResponseServerError { status_code, .. } if status_code == 404 => {
            RuntimeError::NotFound
        }
        other => RuntimeError::Api(other.to_string()),
    }
}

/// Everything the orchestrator needs to create one container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub image: String,
    pub env: Vec<String>,
    /// `host_path:container_path` bind mounts.
    pub binds: Vec<String>,
    /// `(container_port_key, host_port)`, e.g. `("25565/tcp", 31000)`.
    pub port_map: Vec<(String, u16)>,
}

#[derive(Debug, Clone, Copy)]
pub struct ContainerState {
    pub running: bool,
}

#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub name: String,
    pub state: Option<String>,
}

/// Capability boundary over the container runtime. The orchestrator depends
/// on this contract only, never on the transport.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError>;
    async fn create(&self, name: &str, spec: ContainerSpec) -> Result<(), RuntimeError>;
    async fn start(&self, name: &str) -> Result<(), RuntimeError>;
    async fn stop(&self, name: &str) -> Result<(), RuntimeError>;
    async fn restart(&self, name: &str) -> Result<(), RuntimeError>;
    /// Force-removes the container whether or not it is running.
    async fn remove(&self, name: &str) -> Result<(), RuntimeError>;
    async fn exists(&self, name: &str) -> Result<bool, RuntimeError>;
    async fn inspect(&self, name: &str) -> Result<ContainerState, RuntimeError>;
    async fn logs(&self, name: &str, tail: usize) -> Result<Vec<String>, RuntimeError>;
    async fn list(&self, include_stopped: bool) -> Result<Vec<ContainerInfo>, RuntimeError>;
}

/// Bollard-backed runtime client against the local Docker socket.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect() -> anyhow::Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("connect to docker daemon")?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        if self.docker.inspect_image(image).await.is_ok() {
            tracing::info!(image, "found image");
            return Ok(());
        }

        tracing::info!(image, "pulling image");
        let (from_image, tag) = match image.rsplit_once(':') {
            Some((img, tag)) => (img, tag),
            None => (image, "latest"),
        };
        self.docker
            .create_image(
                Some(
                    CreateImageOptionsBuilder::new()
                        .from_image(from_image)
                        .tag(tag)
                        .build(),
                ),
                None,
                None,
            )
            .try_collect::<Vec<_>>()
            .await
            .map_err(map_docker_err)?;
        Ok(())
    }

    async fn create(&self, name: &str, spec: ContainerSpec) -> Result<(), RuntimeError> {
        let mut port_bindings = std::collections::HashMap::new();
        let mut exposed_ports = std::collections::HashMap::new();
        for (container_port, host_port) in &spec.port_map {
            port_bindings.insert(
                container_port.clone(),
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(host_port.to_string()),
                }]),
            );
            exposed_ports.insert(container_port.clone(), std::collections::HashMap::new());
        }

        let body = ContainerCreateBody {
            image: Some(spec.image),
            env: Some(spec.env),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                binds: Some(spec.binds),
                port_bindings: Some(port_bindings),
                ..HostConfig::default()
            }),
            ..ContainerCreateBody::default()
        };

        self.docker
            .create_container(
                Some(CreateContainerOptionsBuilder::new().name(name).build()),
                body,
            )
            .await
            .map_err(map_docker_err)?;
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(name, None::<StartContainerOptions>)
            .await
            .map_err(map_docker_err)
    }

    async fn stop(&self, name: &str) -> Result<(), RuntimeError> {
        self.docker
            .stop_container(name, None::<StopContainerOptions>)
            .await
            .map_err(map_docker_err)
    }

    async fn restart(&self, name: &str) -> Result<(), RuntimeError> {
        self.docker
            .restart_container(name, None::<RestartContainerOptions>)
            .await
            .map_err(map_docker_err)
    }

    async fn remove(&self, name: &str) -> Result<(), RuntimeError> {
        self.docker
            .remove_container(
                name,
                Some(RemoveContainerOptionsBuilder::new().force(true).build()),
            )
            .await
            .map_err(map_docker_err)
    }

    async fn exists(&self, name: &str) -> Result<bool, RuntimeError> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => match map_docker_err(e) {
                RuntimeError::NotFound => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn inspect(&self, name: &str) -> Result<ContainerState, RuntimeError> {
        let info = self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .map_err(map_docker_err)?;
        let running = info
            .state
            .and_then(|s| s.running)
            .unwrap_or(false);
        Ok(ContainerState { running })
    }

    async fn logs(&self, name: &str, tail: usize) -> Result<Vec<String>, RuntimeError> {
        let options = LogsOptionsBuilder::new()
            .stdout(true)
            .stderr(true)
            .tail(&tail.to_string())
            .build();

        let chunks = self
            .docker
            .logs(name, Some(options))
            .try_collect::<Vec<_>>()
            .await
            .map_err(map_docker_err)?;

        let mut lines = Vec::new();
        for chunk in chunks {
            let bytes = chunk.into_bytes();
            for line in String::from_utf8_lossy(&bytes).lines() {
                if !line.is_empty() {
                    lines.push(line.to_string());
                }
            }
        }
        Ok(lines)
    }

    async fn list(&self, include_stopped: bool) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let options = ListContainersOptionsBuilder::new()
            .all(include_stopped)
            .build();
        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(map_docker_err)?;

        Ok(summaries
            .into_iter()
            .map(|s| ContainerInfo {
                name: s
                    .names
                    .unwrap_or_default()
                    .first()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default(),
                state: s.state.map(|st| st.to_string()),
            })
            .collect())
    }
}

#[cfg(test)]
pub mod mock {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::{ContainerInfo, ContainerRuntime, ContainerSpec, ContainerState, RuntimeError};

    #[derive(Debug, Clone, Default)]
    pub struct MockContainer {
        pub running: bool,
        pub logs: Vec<String>,
    }

    /// In-memory runtime double for orchestrator and dispatcher tests.
    #[derive(Default)]
    pub struct MockRuntime {
        pub containers: Mutex<HashMap<String, MockContainer>>,
        /// Number of upcoming create calls that fail with an api error.
        pub fail_creates: AtomicUsize,
        pub fail_stops: AtomicUsize,
        pub create_calls: AtomicUsize,
        pub start_calls: AtomicUsize,
    }

    impl MockRuntime {
        pub async fn insert(&self, name: &str, container: MockContainer) {
            self.containers
                .lock()
                .await
                .insert(name.to_string(), container);
        }

        pub async fn contains(&self, name: &str) -> bool {
            self.containers.lock().await.contains_key(name)
        }
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        if counter.load(Ordering::SeqCst) > 0 {
            counter.fetch_sub(1, Ordering::SeqCst);
            return true;
        }
        false
    }

    #[async_trait]
    impl ContainerRuntime for MockRuntime {
        async fn ensure_image(&self, _image: &str) -> Result<(), RuntimeError> {
            Ok(())
        }

        async fn create(&self, name: &str, _spec: ContainerSpec) -> Result<(), RuntimeError> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            if take_failure(&self.fail_creates) {
                return Err(RuntimeError::Api("injected create failure".to_string()));
            }
            self.insert(name, MockContainer::default()).await;
            Ok(())
        }

        async fn start(&self, name: &str) -> Result<(), RuntimeError> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            let mut map = self.containers.lock().await;
            let c = map.get_mut(name).ok_or(RuntimeError::NotFound)?;
            c.running = true;
            Ok(())
        }

        async fn stop(&self, name: &str) -> Result<(), RuntimeError> {
            let mut map = self.containers.lock().await;
            let c = map.get_mut(name).ok_or(RuntimeError::NotFound)?;
            if take_failure(&self.fail_stops) {
                return Err(RuntimeError::Api("injected stop failure".to_string()));
            }
            c.running = false;
            Ok(())
        }

        async fn restart(&self, name: &str) -> Result<(), RuntimeError> {
            let mut map = self.containers.lock().await;
            let c = map.get_mut(name).ok_or(RuntimeError::NotFound)?;
            c.running = true;
            Ok(())
        }

        async fn remove(&self, name: &str) -> Result<(), RuntimeError> {
            self.containers
                .lock()
                .await
                .remove(name)
                .map(|_| ())
                .ok_or(RuntimeError::NotFound)
        }

        async fn exists(&self, name: &str) -> Result<bool, RuntimeError> {
            Ok(self.contains(name).await)
        }

        async fn inspect(&self, name: &str) -> Result<ContainerState, RuntimeError> {
            let map = self.containers.lock().await;
            let c = map.get(name).ok_or(RuntimeError::NotFound)?;
            Ok(ContainerState { running: c.running })
        }

        async fn logs(&self, name: &str, tail: usize) -> Result<Vec<String>, RuntimeError> {
            let map = self.containers.lock().await;
            let c = map.get(name).ok_or(RuntimeError::NotFound)?;
            let skip = c.logs.len().saturating_sub(tail);
            Ok(c.logs.iter().skip(skip).cloned().collect())
        }

        async fn list(&self, include_stopped: bool) -> Result<Vec<ContainerInfo>, RuntimeError> {
            let map = self.containers.lock().await;
            Ok(map
                .iter()
                .filter(|(_, c)| include_stopped || c.running)
                .map(|(name, c)| ContainerInfo {
                    name: name.clone(),
                    state: Some(if c.running { "running" } else { "exited" }.to_string()),
                })
                .collect())
        }
    }
}
