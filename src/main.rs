use std::sync::Arc;

use anyhow::Context;
use tokio::{signal, sync::mpsc};
use tracing::{error, info, warn};

use manuflow_api as api;
use api::events::{EventHandler, LowStockAlertHandler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);
    api::handlers::health::init_start_time();

    let db_pool = api::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to database")?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }

    let db_arc = Arc::new(db_pool);
    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = api::events::EventSender::new(event_tx);

    let handlers: Vec<Arc<dyn EventHandler>> = vec![Arc::new(LowStockAlertHandler)];
    tokio::spawn(api::events::process_events(event_rx, handlers));

    let mut cfg = cfg;
    if cfg.seed_demo_data {
        let catalog = api::services::catalog::CatalogService::new(
            db_arc.clone(),
            api::services::bom::BomService::new(db_arc.clone()),
        );
        match catalog.seed_demo_catalog().await {
            Ok(Some(demo)) => {
                info!(work_center_id = %demo.work_center.id, "Demo catalog seeded");
                if cfg.default_work_center_id.is_none() {
                    cfg.default_work_center_id = Some(demo.work_center.id);
                }
            }
            Ok(None) => info!("Demo catalog skipped; products already present"),
            Err(e) => warn!("Failed to seed demo catalog: {}", e),
        }
    }

    let app_state = api::AppState::new(db_arc.clone(), cfg.clone(), event_sender);

    let app = api::build_router(app_state);

    let addr = cfg.bind_address();
    info!("manuflow-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
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
