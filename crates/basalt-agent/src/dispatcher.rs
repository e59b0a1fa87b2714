use std::sync::Arc;
use std::time::Duration;

use basalt_core::InstanceId;
use tokio::sync::{Mutex, mpsc};

use crate::orchestrator::{Orchestrator, OrchestratorError};
use crate::repository::InstanceRepository;
use crate::runtime::ContainerRuntime;
use crate::settings::Settings;

const RETRY_BACKOFF_BASE_MS: u64 = 500;
const RETRY_BACKOFF_MAX_MS: u64 = 30_000;

/// One lifecycle verb against one instance, shipped through the task channel.
/// Create carries its payload so a worker needs no repository read to act.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LifecycleTask {
    Create {
        id: InstanceId,
        port: u16,
        rcon_port: u16,
        rcon_password: String,
        version: String,
    },
    Start { id: InstanceId },
    Stop { id: InstanceId },
    Restart { id: InstanceId },
    Delete { id: InstanceId },
}

impl LifecycleTask {
    pub fn instance_id(&self) -> &InstanceId {
        match self {
            LifecycleTask::Create { id, .. }
            | LifecycleTask::Start { id }
            | LifecycleTask::Stop { id }
            | LifecycleTask::Restart { id }
            | LifecycleTask::Delete { id } => id,
        }
    }

    fn op(&self) -> &'static str {
        match self {
            LifecycleTask::Create { .. } => "create",
            LifecycleTask::Start { .. } => "start",
            LifecycleTask::Stop { .. } => "stop",
            LifecycleTask::Restart { .. } => "restart",
            LifecycleTask::Delete { .. } => "delete",
        }
    }
}

#[derive(Debug, Clone)]
struct Envelope {
    task: LifecycleTask,
    attempt: u32,
}

#[derive(Debug, thiserror::Error)]
#[error("task channel closed")]
pub struct EnqueueError;

fn compute_backoff(attempt: u32) -> Duration {
    // attempt is 1-based.
    let pow = attempt.saturating_sub(1).min(30);
    let mult = 1u64.checked_shl(pow).unwrap_or(u64::MAX);
    Duration::from_millis(
        RETRY_BACKOFF_BASE_MS
            .saturating_mul(mult)
            .min(RETRY_BACKOFF_MAX_MS),
    )
}

/// Hands lifecycle operations to a worker pool and returns immediately.
///
/// Delivery is at-least-once within the process lifetime: a retryable
/// failure is re-enqueued with backoff up to the configured attempt budget,
/// then dropped with an error log. No result flows back to the enqueuer.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl Dispatcher {
    pub fn start<R>(
        orchestrator: Arc<Orchestrator<R>>,
        repository: Arc<dyn InstanceRepository>,
        settings: &Settings,
    ) -> Self
    where
        R: ContainerRuntime + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel::<Envelope>();
        let rx = Arc::new(Mutex::new(rx));

        for worker in 0..settings.workers.max(1) {
            tokio::spawn(worker_loop(
                worker,
                rx.clone(),
                tx.clone(),
                orchestrator.clone(),
                repository.clone(),
                settings.max_task_attempts,
            ));
        }

        Self { tx }
    }

    pub fn enqueue(&self, task: LifecycleTask) -> Result<(), EnqueueError> {
        tracing::debug!(op = task.op(), id = %task.instance_id(), "task enqueued");
        self.tx
            .send(Envelope { task, attempt: 1 })
            .map_err(|_| EnqueueError)
    }
}

async fn worker_loop<R>(
    worker: usize,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Envelope>>>,
    tx: mpsc::UnboundedSender<Envelope>,
    orchestrator: Arc<Orchestrator<R>>,
    repository: Arc<dyn InstanceRepository>,
    max_attempts: u32,
) where
    R: ContainerRuntime,
{
    loop {
        let envelope = { rx.lock().await.recv().await };
        let Some(envelope) = envelope else {
            break;
        };

        let op = envelope.task.op();
        let id = envelope.task.instance_id().clone();

        match execute_task(&orchestrator, repository.as_ref(), &envelope.task).await {
            Ok(()) => {
                tracing::info!(worker, op, %id, attempt = envelope.attempt, "task done");
            }
            Err(e) if e.retryable() && envelope.attempt < max_attempts => {
                let delay = compute_backoff(envelope.attempt);
                tracing::warn!(
                    worker, op, %id,
                    attempt = envelope.attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "task failed, redelivering"
                );
                let tx = tx.clone();
                let next = Envelope {
                    task: envelope.task,
                    attempt: envelope.attempt + 1,
                };
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(next);
                });
            }
            Err(e) => {
                tracing::error!(
                    worker, op, %id,
                    attempt = envelope.attempt,
                    error = %e,
                    "task failed, dropping"
                );
            }
        }
    }
}

async fn execute_task<R>(
    orchestrator: &Orchestrator<R>,
    repository: &dyn InstanceRepository,
    task: &LifecycleTask,
) -> Result<(), OrchestratorError>
where
    R: ContainerRuntime,
{
    match task {
        LifecycleTask::Create {
            id,
            port,
            rcon_port,
            rcon_password,
            version,
        } => {
            orchestrator
                .create(id, *port, *rcon_port, rcon_password, version)
                .await
        }
        LifecycleTask::Start { id } => orchestrator.start(id).await,
        LifecycleTask::Stop { id } => orchestrator.stop(id).await,
        LifecycleTask::Restart { id } => orchestrator.restart(id).await,
        LifecycleTask::Delete { id } => {
            orchestrator.remove(id).await?;
            // The metadata row goes only after the container is gone.
            if let Err(e) = repository.delete(id).await {
                tracing::warn!(%id, error = %e, "repository row already gone");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::container_name;
    use crate::repository::MemoryRepository;
    use crate::runtime::mock::{MockContainer, MockRuntime};
    use basalt_core::Instance;
    use std::path::Path;
    use std::sync::atomic::Ordering;

    fn test_settings(root: &Path) -> Settings {
        Settings {
            data_root: root.to_path_buf(),
            template_path: root.join("server.properties.template"),
            image: "itzg/minecraft-server".to_string(),
            min_port: 25565,
            max_port: 25665,
            rcon_host: "127.0.0.1".to_string(),
            workers: 2,
            max_task_attempts: 3,
            console_timeout: Duration::from_secs(1),
        }
    }

    async fn test_env() -> (
        tempfile::TempDir,
        Arc<MockRuntime>,
        Arc<MemoryRepository>,
        Dispatcher,
    ) {
        let tmp = tempfile::tempdir().unwrap();
        let settings = test_settings(tmp.path());
        tokio::fs::write(&settings.template_path, "rcon.password=\n")
            .await
            .unwrap();

        let runtime = Arc::new(MockRuntime::default());
        let repository = Arc::new(MemoryRepository::default());
        let orchestrator = Arc::new(Orchestrator::new(runtime.clone(), settings.clone()));
        let dispatcher = Dispatcher::start(orchestrator, repository.clone(), &settings);
        (tmp, runtime, repository, dispatcher)
    }

    async fn wait_until(mut probe: impl AsyncFnMut() -> bool) -> bool {
        for _ in 0..200 {
            if probe().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn create_task_provisions_container() {
        let (_tmp, runtime, _repo, dispatcher) = test_env().await;
        let id = InstanceId::new();

        dispatcher
            .enqueue(LifecycleTask::Create {
                id: id.clone(),
                port: 25565,
                rcon_port: 25615,
                rcon_password: "pw".to_string(),
                version: "latest".to_string(),
            })
            .unwrap();

        let name = container_name(&id);
        assert!(wait_until(async || runtime.contains(&name).await).await);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failure_is_redelivered() {
        let (_tmp, runtime, _repo, dispatcher) = test_env().await;
        runtime.fail_creates.store(1, Ordering::SeqCst);
        let id = InstanceId::new();

        dispatcher
            .enqueue(LifecycleTask::Create {
                id: id.clone(),
                port: 25565,
                rcon_port: 25615,
                rcon_password: "pw".to_string(),
                version: "latest".to_string(),
            })
            .unwrap();

        let name = container_name(&id);
        assert!(wait_until(async || runtime.contains(&name).await).await);
        assert_eq!(runtime.create_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_is_never_retried() {
        let (_tmp, runtime, _repo, dispatcher) = test_env().await;
        let id = InstanceId::new();

        dispatcher
            .enqueue(LifecycleTask::Start { id: id.clone() })
            .unwrap();

        assert!(
            wait_until(async || runtime.start_calls.load(Ordering::SeqCst) == 1).await
        );
        // Let any (incorrect) redelivery fire; paused time makes this cheap.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(runtime.start_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delete_task_removes_container_and_row() {
        let (_tmp, runtime, repo, dispatcher) = test_env().await;
        let id = InstanceId::new();

        runtime
            .insert(&container_name(&id), MockContainer::default())
            .await;
        repo.create(Instance {
            id: id.clone(),
            port: 25565,
            rcon_port: 25615,
            rcon_password: "pw".to_string(),
            version: "latest".to_string(),
            created_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

        dispatcher
            .enqueue(LifecycleTask::Delete { id: id.clone() })
            .unwrap();

        assert!(wait_until(async || repo.get(&id).await.is_none()).await);
        assert!(!runtime.contains(&container_name(&id)).await);
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(compute_backoff(1), Duration::from_millis(500));
        assert_eq!(compute_backoff(2), Duration::from_millis(1000));
        assert_eq!(compute_backoff(30), Duration::from_millis(30_000));
    }

    #[test]
    fn task_serializes_with_op_tag() {
        let task = LifecycleTask::Stop {
            id: InstanceId("abc".to_string()),
        };
        let json = serde_json::to_string(&task).unwrap();
        assert!(json.contains("\"op\":\"stop\""));
    }
}
