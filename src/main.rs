use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::info;

use storefront_api as api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);

    let db = Arc::new(
        api::db::establish_connection_from_app_config(&cfg)
            .await
            .context("failed to connect to database")?,
    );
    if cfg.auto_migrate {
        api::db::ensure_schema(&db)
            .await
            .context("failed to create schema")?;
    }

    let (event_sender, event_rx) = api::events::channel(1024);
    tokio::spawn(api::events::process_events(event_rx));

    let services = api::services::AppServices::new(db.clone(), event_sender.clone(), &cfg);

    // Periodic reconciliation of promotion and code state with the calendar.
    let sweeper = services.sweep_scheduler(db.clone(), event_sender.clone(), &cfg);
    tokio::spawn(sweeper.run());

    let state = api::AppState {
        db,
        config: cfg.clone(),
        event_sender,
        services,
    };
    let app = api::handlers::app_router(state);

    let addr = cfg.bind_addr();
    info!("storefront-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
