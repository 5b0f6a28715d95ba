use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use relay_notification_service::broker::InMemoryBroker;
use relay_notification_service::channel::{LogSender, SenderRegistry};
use relay_notification_service::config::Settings;
use relay_notification_service::correlation::{ResponseCorrelator, StatusSubscriber};
use relay_notification_service::dispatcher::PriorityDispatcher;
use relay_notification_service::notification::Channel;
use relay_notification_service::orchestrator::NotificationOrchestrator;
use relay_notification_service::producer::PriorityRouter;
use relay_notification_service::resilience::ResiliencePolicy;
use relay_notification_service::server::{create_app, AppState};
use relay_notification_service::store::InMemoryStore;
use relay_notification_service::tasks::RetrySweeper;
use relay_notification_service::template::TemplateCatalog;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    init_tracing();

    // Load configuration
    let settings = Arc::new(Settings::new()?);
    tracing::info!("Configuration loaded");

    // Shared infrastructure
    let broker = Arc::new(InMemoryBroker::with_max_redeliveries(
        settings.broker.max_redeliveries,
    ));
    let store = Arc::new(InMemoryStore::new());
    let templates = Arc::new(TemplateCatalog::new());
    let resilience = Arc::new(ResiliencePolicy::with_breaker_config(
        settings.resilience.breaker_config(),
    ));

    let mut senders = SenderRegistry::new();
    senders.register(Arc::new(LogSender::new(Channel::Email)));
    senders.register(Arc::new(LogSender::new(Channel::Sms)));
    senders.register(Arc::new(LogSender::new(Channel::Push)));
    let senders = Arc::new(senders);

    // Producer side
    let router = Arc::new(PriorityRouter::new(
        broker.clone(),
        resilience.clone(),
        &settings.broker,
    ));

    // Correlation loop
    let correlator = Arc::new(ResponseCorrelator::new());
    let status_subscriber = Arc::new(StatusSubscriber::new(
        broker.clone(),
        correlator.clone(),
        settings.broker.status_topic.clone(),
        format!("{}-status", settings.broker.consumer_group),
    ));
    let status_shutdown = status_subscriber.shutdown_signal();
    let status_handle = {
        let status_subscriber = status_subscriber.clone();
        tokio::spawn(async move {
            if let Err(e) = status_subscriber.start().await {
                tracing::error!(error = %e, "Status subscriber failed");
            }
        })
    };

    // Consumer side: per-tier worker pools
    let dispatcher = PriorityDispatcher::new(
        broker.clone(),
        senders,
        store.clone(),
        templates,
        resilience.clone(),
        settings.broker.status_topic.clone(),
    );
    let dispatcher_shutdown = dispatcher.shutdown_signal();
    let worker_handles = dispatcher
        .start(&settings.broker, &settings.dispatcher)
        .await?;
    tracing::info!(workers = worker_handles.len(), "Dispatch worker pools started");

    // Failed-notification retry sweeper
    let sweeper = RetrySweeper::new(
        settings.retry.clone(),
        store.clone(),
        router.clone(),
        dispatcher_shutdown.subscribe(),
    );
    let sweeper_handle = tokio::spawn(async move {
        sweeper.run().await;
    });

    // Synchronous entry point
    let orchestrator = Arc::new(NotificationOrchestrator::new(
        router,
        correlator.clone(),
        store,
        settings.correlation.response_timeout(),
    ));

    // Create Axum app
    let state = AppState::new(settings.clone(), orchestrator, correlator);
    let app = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler())
        .await?;

    // Stop background tasks and wait for them to finish
    tracing::info!("Waiting for background tasks to finish...");
    let _ = dispatcher_shutdown.send(());
    let _ = status_shutdown.send(());
    join_all(worker_handles).await;
    let _ = tokio::join!(status_handle, sweeper_handle);

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal_handler() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, shutting down");
        }
    }
}
