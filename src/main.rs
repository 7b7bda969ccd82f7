use std::sync::Arc;

use tokio::{signal, sync::mpsc};
use tracing::{error, info};

use stateset_stock_ledger as ledger;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = ledger::config::load_config()?;
    ledger::config::init_tracing(cfg.log_level(), cfg.log_json);
    ledger::handlers::health::init_start_time();

    // Init DB
    let db_pool = ledger::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        ledger::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Init events
    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = ledger::events::EventSender::new(event_tx);
    let event_task = tokio::spawn(ledger::events::process_events(event_rx, Vec::new()));

    let engine = ledger::services::InventoryEngine::new(db_arc.clone(), cfg.inventory.clone())
        .with_event_sender(event_sender);

    let sweeper = if cfg.run_expiry_sweeper {
        Some(engine.expiry_sweeper().start())
    } else {
        info!("Expiry sweeper disabled by configuration");
        None
    };

    let app = ledger::handlers::router(engine);

    let addr = cfg.bind_address();
    info!("stock-ledger-server listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(sweeper) = sweeper {
        sweeper.stop().await;
    }
    // Every event sender is dropped by now; wait for the loop to drain.
    if let Err(e) = event_task.await {
        error!("Event processing task failed: {}", e);
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
