use std::sync::Arc;

use basalt_agent::dispatcher::Dispatcher;
use basalt_agent::orchestrator::Orchestrator;
use basalt_agent::repository::MemoryRepository;
use basalt_agent::runtime::{ContainerRuntime, DockerRuntime};
use basalt_agent::settings::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = Settings::from_env();
    tracing::info!(
        data_root = %settings.data_root.display(),
        image = %settings.image,
        min_port = settings.min_port,
        max_port = settings.max_port,
        workers = settings.workers,
        "basalt-agent starting"
    );

    let runtime = Arc::new(DockerRuntime::connect()?);
    runtime.ensure_image(&settings.image).await?;

    let repository = Arc::new(MemoryRepository::default());
    let orchestrator = Arc::new(Orchestrator::new(runtime, settings.clone()));
    let _dispatcher = Dispatcher::start(orchestrator, repository, &settings);

    tracing::info!("basalt-agent ready");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    Ok(())
}
