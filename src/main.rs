use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;

use tripmesh_api::agents::messages::Payload;
use tripmesh_api::agents::{Capability, ResponseSink, WorkerAgent};
use tripmesh_api::api::{self, AppState};
use tripmesh_api::config::Settings;
use tripmesh_api::domain::repositories::{StateError, StateRepository};
use tripmesh_api::infrastructure::broker::{events_channel, MessageBroker};
use tripmesh_api::infrastructure::capability::ChatCompletionsCapability;
use tripmesh_api::infrastructure::repositories::{MemoryStateRepository, PostgresStateRepository};
use tripmesh_api::infrastructure::store::{self, Store};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load environment variables
    dotenv::dotenv().ok();
    let settings = Settings::from_env();

    // Connect to the shared store; nothing works without it
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

    let plans = match state_repository(&settings).await {
        Ok(plans) => plans,
        Err(e) => {
            tracing::error!(error = %e, "Failed to set up plan store");
            std::process::exit(1);
        }
    };

    let broker = MessageBroker::new(store);

    // Follow the entry agent's lifecycle in the logs
    let events = events_channel(&settings.entry_agent);
    if let Err(e) = broker
        .subscribe(&events, |message| {
            if let Payload::Event(event) = &message.payload {
                tracing::info!(
                    agent = %message.header.source_agent,
                    correlation_id = %message.header.correlation_id,
                    event = %event.event_name,
                    "Agent event"
                );
            }
        })
        .await
    {
        tracing::warn!(channel = %events, error = %e, "Event subscription failed");
    }

    // Store user-facing answers as they arrive
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sink = ResponseSink::new(broker.clone(), &settings.results_consumer, plans.clone())
        .with_poll_interval(settings.poll_interval);
    let sink_rx = shutdown_rx.clone();
    let sink_handle = tokio::spawn(async move { sink.run(sink_rx).await });

    // Agents hosted in this process, for deployments without separate workers
    let mut workers = Vec::new();
    if !settings.local_agents.is_empty() {
        let capability: Arc<dyn Capability> = match ChatCompletionsCapability::from_settings(&settings) {
            Ok(capability) => Arc::new(capability),
            Err(e) => {
                tracing::error!(error = %e, "Cannot start local agents");
                std::process::exit(1);
            }
        };
        for name in &settings.local_agents {
            let worker = WorkerAgent::from_settings(name.as_str(), broker.clone(), capability.clone(), &settings);
            let rx = shutdown_rx.clone();
            workers.push(tokio::spawn(async move { worker.run(rx).await }));
            tracing::info!(agent = %name, "Local agent started");
        }
    }
    if settings.redis_url.is_none() && !settings.local_agents.contains(&settings.entry_agent) {
        tracing::warn!(
            entry_agent = %settings.entry_agent,
            "Entry agent is not hosted here and no shared store is configured; requests will wait unclaimed"
        );
    }

    // Build router
    let app = api::router(AppState {
        broker: broker.clone(),
        plans,
        entry_agent: settings.entry_agent.clone(),
        results_consumer: settings.results_consumer.clone(),
    });

    // Start server
    let listener = match tokio::net::TcpListener::bind(settings.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %settings.bind_addr, error = %e, "Failed to bind address");
            std::process::exit(1);
        }
    };
    tracing::info!(
        "Server listening on {} (entry agent: {})",
        settings.bind_addr,
        settings.entry_agent
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await;
    if let Err(e) = served {
        tracing::error!(error = %e, "Server failed");
    }

    tracing::info!("Shutting down");
    let _ = shutdown_tx.send(true);
    broker.unsubscribe_all().await;
    if let Err(e) = sink_handle.await {
        tracing::error!(error = %e, "Response sink task failed");
    }
    for handle in workers {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Local agent task failed");
        }
    }
}

async fn state_repository(settings: &Settings) -> Result<Arc<dyn StateRepository>, StateError> {
    let Some(database_url) = &settings.database_url else {
        tracing::warn!("DATABASE_URL not set, keeping plans in memory");
        return Ok(Arc::new(MemoryStateRepository::new()));
    };

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(|e| StateError::Backend(format!("Failed to connect to database: {}", e)))?;
    tracing::info!("Database connected successfully");

    let repository = PostgresStateRepository::new(pool);
    repository.ensure_schema().await?;
    Ok(Arc::new(repository))
}
