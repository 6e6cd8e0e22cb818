use std::sync::Arc;

use tokio::sync::watch;

use tripmesh_api::agents::{AgentError, WorkerAgent};
use tripmesh_api::config::Settings;
use tripmesh_api::infrastructure::broker::MessageBroker;
use tripmesh_api::infrastructure::capability::ChatCompletionsCapability;
use tripmesh_api::infrastructure::store::{self, Store};

/// One agent role per process: claims from `tasks:<AGENT_NAME>` until
/// interrupted.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    dotenv::dotenv().ok();
    let settings = Settings::from_env();

    let Some(agent_name) = settings.agent_name.clone() else {
        let e = AgentError::ConfigError("AGENT_NAME is not set".to_string());
        tracing::error!(error = %e, "Cannot start worker");
        std::process::exit(1);
    };

    let capability = match ChatCompletionsCapability::from_settings(&settings) {
        Ok(capability) => capability,
        Err(e) => {
            tracing::error!(agent = %agent_name, error = %e, "Cannot start worker");
            std::process::exit(1);
        }
    };

    let store = match store::connect(settings.redis_url.as_deref()).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to store");
            std::process::exit(1);
        }
    };
    if let Err(e) = store.ping().await {
        tracing::error!(error = %e, "Store did not answer ping");
        std::process::exit(1);
    }
    if settings.redis_url.is_none() {
        tracing::warn!(
            agent = %agent_name,
            "No shared store configured; only tasks enqueued by this process will be seen"
        );
    }

    let broker = MessageBroker::new(store);
    let worker = WorkerAgent::from_settings(agent_name.as_str(), broker, Arc::new(capability), &settings);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!(agent = %agent_name, "Shutting down after the current task");
    let _ = shutdown_tx.send(true);
    if let Err(e) = handle.await {
        tracing::error!(error = %e, "Worker task failed");
    }
}
