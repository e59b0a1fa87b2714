use std::sync::Arc;

use basalt_core::{InstanceId, ServerStatus};

use crate::properties::{self, ConfigError};
use crate::runtime::{ContainerInfo, ContainerRuntime, ContainerSpec, RuntimeError};
use crate::settings::Settings;
use crate::status::infer_status;

pub const CONTAINER_NAME_PREFIX: &str = "mc_";
const GAME_CONTAINER_PORT: &str = "25565/tcp";
const RCON_CONTAINER_PORT: &str = "25575/tcp";
const LOG_TAIL_LINES: usize = 100;

pub fn container_name(id: &InstanceId) -> String {
    format!("{CONTAINER_NAME_PREFIX}{id}")
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("server '{0}' not found")]
    NotFound(InstanceId),
    #[error("failed to create container for '{id}': {source}")]
    Create { id: InstanceId, source: RuntimeError },
    #[error("failed to start server '{id}': {source}")]
    Start { id: InstanceId, source: RuntimeError },
    #[error("failed to stop server '{id}': {source}")]
    Stop { id: InstanceId, source: RuntimeError },
    #[error("failed to delete server '{id}': {source}")]
    Delete { id: InstanceId, source: RuntimeError },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl OrchestratorError {
    /// Whether a redelivery of the failed task can plausibly succeed.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Create { .. }
                | OrchestratorError::Start { .. }
                | OrchestratorError::Stop { .. }
                | OrchestratorError::Delete { .. }
        )
    }
}

/// Façade over the four lifecycle verbs. Holds no container state of its own;
/// everything is re-fetched from the runtime per call.
pub struct Orchestrator<R> {
    runtime: Arc<R>,
    settings: Settings,
}

impl<R: ContainerRuntime> Orchestrator<R> {
    pub fn new(runtime: Arc<R>, settings: Settings) -> Self {
        Self { runtime, settings }
    }

    pub async fn create(
        &self,
        id: &InstanceId,
        port: u16,
        rcon_port: u16,
        rcon_password: &str,
        version: &str,
    ) -> Result<(), OrchestratorError> {
        let name = container_name(id);

        // The task channel is at-least-once; a replayed create against an
        // existing container is success, not a second container.
        match self.runtime.exists(&name).await {
            Ok(true) => {
                tracing::info!(%id, "container already exists, create is a no-op");
                return Ok(());
            }
            Ok(false) => {}
            Err(source) => {
                return Err(OrchestratorError::Create {
                    id: id.clone(),
                    source,
                });
            }
        }

        let dir = properties::ensure_instance_dir(&self.settings, id).await?;
        let spec = ContainerSpec {
            image: self.settings.image.clone(),
            env: vec![
                "EULA=TRUE".to_string(),
                "ENABLE_RCON=true".to_string(),
                format!("RCON_PASSWORD={rcon_password}"),
                format!("VERSION={version}"),
                "OVERRIDE_SERVER_PROPERTIES=FALSE".to_string(),
            ],
            binds: vec![format!("{}:/data", dir.display())],
            port_map: vec![
                (GAME_CONTAINER_PORT.to_string(), port),
                (RCON_CONTAINER_PORT.to_string(), rcon_port),
            ],
        };

        self.runtime
            .create(&name, spec)
            .await
            .map_err(|source| OrchestratorError::Create {
                id: id.clone(),
                source,
            })?;

        properties::materialize_from_template(&self.settings, id, rcon_password).await?;

        tracing::info!(%id, port, "server created");
        Ok(())
    }

    pub async fn start(&self, id: &InstanceId) -> Result<(), OrchestratorError> {
        self.runtime
            .start(&container_name(id))
            .await
            .map_err(|source| match source {
                RuntimeError::NotFound => OrchestratorError::NotFound(id.clone()),
                source => OrchestratorError::Start {
                    id: id.clone(),
                    source,
                },
            })?;
        tracing::info!(%id, "server started");
        Ok(())
    }

    pub async fn restart(&self, id: &InstanceId) -> Result<(), OrchestratorError> {
        // Restart failures surface as start failures.
        self.runtime
            .restart(&container_name(id))
            .await
            .map_err(|source| match source {
                RuntimeError::NotFound => OrchestratorError::NotFound(id.clone()),
                source => OrchestratorError::Start {
                    id: id.clone(),
                    source,
                },
            })?;
        tracing::info!(%id, "server restarted");
        Ok(())
    }

    pub async fn stop(&self, id: &InstanceId) -> Result<(), OrchestratorError> {
        self.runtime
            .stop(&container_name(id))
            .await
            .map_err(|source| match source {
                RuntimeError::NotFound => OrchestratorError::NotFound(id.clone()),
                source => OrchestratorError::Stop {
                    id: id.clone(),
                    source,
                },
            })?;
        tracing::info!(%id, "server stopped");
        Ok(())
    }

    /// Force-deletes the container, then the instance directory. The
    /// directory is only removed once the container is actually gone.
    pub async fn remove(&self, id: &InstanceId) -> Result<(), OrchestratorError> {
        self.runtime
            .remove(&container_name(id))
            .await
            .map_err(|source| match source {
                RuntimeError::NotFound => OrchestratorError::NotFound(id.clone()),
                source => OrchestratorError::Delete {
                    id: id.clone(),
                    source,
                },
            })?;

        properties::remove_instance_dir(&self.settings, id).await?;
        tracing::info!(%id, "server removed");
        Ok(())
    }

    /// Derived status; a missing or unreachable container is `not_found`,
    /// never an error.
    pub async fn status(&self, id: &InstanceId) -> ServerStatus {
        let name = container_name(id);
        let state = match self.runtime.inspect(&name).await {
            Ok(state) => state,
            Err(_) => return ServerStatus::NotFound,
        };
        if !state.running {
            return ServerStatus::Stopped;
        }
        match self.runtime.logs(&name, LOG_TAIL_LINES).await {
            Ok(tail) => infer_status(true, &tail),
            Err(_) => ServerStatus::NotFound,
        }
    }

    pub async fn list(&self, active_only: bool) -> Result<Vec<ContainerInfo>, RuntimeError> {
        self.runtime.list(!active_only).await
    }
}
