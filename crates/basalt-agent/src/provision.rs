use std::collections::BTreeMap;

use basalt_core::{Instance, InstanceId};
use chrono::Utc;

use crate::console::{self, ConsoleCommand, ConsoleError};
use crate::creds::{self, RCON_PASSWORD_LEN};
use crate::dispatcher::{Dispatcher, EnqueueError, LifecycleTask};
use crate::port_alloc::{self, PortsExhausted};
use crate::properties::{self, ConfigError};
use crate::repository::{InstanceRepository, RepositoryError};
use crate::settings::Settings;

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("server '{0}' not found")]
    NotFound(InstanceId),
    #[error(transparent)]
    PortsExhausted(#[from] PortsExhausted),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Enqueue(#[from] EnqueueError),
    #[error(transparent)]
    Console(ConsoleError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Synchronous half of server creation: reserve a port pair and a metadata
/// row, then hand the container work to the dispatcher. The returned instance
/// is authoritative even though the container does not exist yet.
pub async fn create_server(
    repository: &dyn InstanceRepository,
    dispatcher: &Dispatcher,
    settings: &Settings,
    version: &str,
) -> Result<Instance, ProvisionError> {
    let used = repository.list_port_pairs().await;
    let (port, rcon_port) = port_alloc::allocate_pair(settings.min_port, settings.max_port, &used)?;

    let instance = Instance {
        id: InstanceId::new(),
        port,
        rcon_port,
        rcon_password: creds::generate_password(RCON_PASSWORD_LEN),
        version: version.to_string(),
        created_at: Utc::now(),
    };
    repository.create(instance.clone()).await?;

    dispatcher.enqueue(LifecycleTask::Create {
        id: instance.id.clone(),
        port: instance.port,
        rcon_port: instance.rcon_port,
        rcon_password: instance.rcon_password.clone(),
        version: instance.version.clone(),
    })?;

    tracing::info!(id = %instance.id, port, rcon_port, "server provisioning queued");
    Ok(instance)
}

async fn require(
    repository: &dyn InstanceRepository,
    id: &InstanceId,
) -> Result<Instance, ProvisionError> {
    repository
        .get(id)
        .await
        .ok_or_else(|| ProvisionError::NotFound(id.clone()))
}

pub async fn start_server(
    repository: &dyn InstanceRepository,
    dispatcher: &Dispatcher,
    id: &InstanceId,
) -> Result<(), ProvisionError> {
    require(repository, id).await?;
    dispatcher.enqueue(LifecycleTask::Start { id: id.clone() })?;
    Ok(())
}

pub async fn stop_server(
    repository: &dyn InstanceRepository,
    dispatcher: &Dispatcher,
    id: &InstanceId,
) -> Result<(), ProvisionError> {
    require(repository, id).await?;
    dispatcher.enqueue(LifecycleTask::Stop { id: id.clone() })?;
    Ok(())
}

pub async fn restart_server(
    repository: &dyn InstanceRepository,
    dispatcher: &Dispatcher,
    id: &InstanceId,
) -> Result<(), ProvisionError> {
    require(repository, id).await?;
    dispatcher.enqueue(LifecycleTask::Restart { id: id.clone() })?;
    Ok(())
}

/// Queues teardown. The repository row survives until the worker has removed
/// the container, so a crashed delete can be replayed against the same id.
pub async fn delete_server(
    repository: &dyn InstanceRepository,
    dispatcher: &Dispatcher,
    id: &InstanceId,
) -> Result<(), ProvisionError> {
    require(repository, id).await?;
    dispatcher.enqueue(LifecycleTask::Delete { id: id.clone() })?;
    Ok(())
}

/// Applies a `server.properties` patch to a provisioned server. Takes effect
/// on the next (re)start; the dispatcher is not involved.
pub async fn patch_properties(
    repository: &dyn InstanceRepository,
    settings: &Settings,
    id: &InstanceId,
    changes: &BTreeMap<String, Option<String>>,
) -> Result<(), ProvisionError> {
    require(repository, id).await?;
    properties::patch(settings, id, changes).await?;
    Ok(())
}

/// Runs one console command against a provisioned server over its rcon port,
/// using the credentials fixed at creation. Console failure kinds pass
/// through untouched; a refused connection only means the server is not
/// listening yet, not that the instance is gone.
pub async fn run_console_command(
    repository: &dyn InstanceRepository,
    settings: &Settings,
    id: &InstanceId,
    command: ConsoleCommand,
    argument: &str,
) -> Result<String, ProvisionError> {
    let instance = require(repository, id).await?;
    console::execute(
        settings.rcon_host.clone(),
        instance.rcon_port,
        instance.rcon_password,
        command.line(argument),
        settings.console_timeout,
    )
    .await
    .map_err(ProvisionError::Console)
}
