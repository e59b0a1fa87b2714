use std::collections::HashMap;

use async_trait::async_trait;
use basalt_core::{Instance, InstanceId, PortPair};
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("instance '{0}' not found")]
    NotFound(InstanceId),
    #[error("a server already uses port {0}")]
    PortConflict(u16),
}

/// Narrow persistence boundary for instance metadata. The real store lives
/// outside this service; the orchestrator only needs these lookups.
#[async_trait]
pub trait InstanceRepository: Send + Sync {
    async fn get(&self, id: &InstanceId) -> Option<Instance>;
    async fn get_by_port(&self, port: u16) -> Option<Instance>;
    async fn list(&self) -> Vec<Instance>;
    async fn list_port_pairs(&self) -> Vec<PortPair>;
    async fn create(&self, instance: Instance) -> Result<(), RepositoryError>;
    async fn delete(&self, id: &InstanceId) -> Result<(), RepositoryError>;
}

/// In-memory reference implementation.
#[derive(Default)]
pub struct MemoryRepository {
    inner: Mutex<HashMap<String, Instance>>,
}

#[async_trait]
impl InstanceRepository for MemoryRepository {
    async fn get(&self, id: &InstanceId) -> Option<Instance> {
        self.inner.lock().await.get(&id.0).cloned()
    }

    async fn get_by_port(&self, port: u16) -> Option<Instance> {
        self.inner
            .lock()
            .await
            .values()
            .find(|i| i.port == port)
            .cloned()
    }

    async fn list(&self) -> Vec<Instance> {
        self.inner.lock().await.values().cloned().collect()
    }

    async fn list_port_pairs(&self) -> Vec<PortPair> {
        self.inner
            .lock()
            .await
            .values()
            .map(Instance::port_pair)
            .collect()
    }

    async fn create(&self, instance: Instance) -> Result<(), RepositoryError> {
        let mut map = self.inner.lock().await;
        for existing in map.values() {
            if existing.port == instance.port || existing.rcon_port == instance.rcon_port {
                return Err(RepositoryError::PortConflict(instance.port));
            }
        }
        map.insert(instance.id.0.clone(), instance);
        Ok(())
    }

    async fn delete(&self, id: &InstanceId) -> Result<(), RepositoryError> {
        self.inner
            .lock()
            .await
            .remove(&id.0)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound(id.clone()))
    }
}
