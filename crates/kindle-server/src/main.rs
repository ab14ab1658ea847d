use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kindle_engine::EngineFactory;
use kindle_runtime::{MockEngineFactory, RemoteEngineFactory};
use kindle_server::{run_server, AppState, Backend, Cli, EngineLifecycle, Orchestrator, ServerError};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // A bad sampling override is a deployment error: refuse to start.
    let sampling = cli.conversation_sampling().map_err(ServerError::from)?;

    let factory: Arc<dyn EngineFactory> = match cli.backend {
        Backend::Mock => {
            Arc::new(MockEngineFactory::new().with_delta_delay(Duration::from_millis(20)))
        }
        Backend::Remote => Arc::new(
            RemoteEngineFactory::new(&cli.engine_url).with_request_timeout(cli.request_timeout()),
        ),
    };
    let lifecycle = Arc::new(EngineLifecycle::new(factory, cli.lifecycle_settings()));
    let orchestrator = Orchestrator::new(lifecycle.clone(), sampling);
    let state = AppState::new(cli.server_config(), orchestrator, cli.max_concurrent);

    tracing::info!(
        backend = ?cli.backend,
        model = %cli.model_path,
        preload = cli.preload,
        "starting {}",
        cli.app_name
    );

    if cli.preload {
        tokio::spawn(async move {
            if let Err(e) = lifecycle.acquire().await {
                tracing::error!(error = %e, "engine preload failed; retrying on first request");
            }
        });
    }

    run_server(state, cli.addr()).await
}
