use std::sync::Arc;

use tracing::{error, info};

use tandem_api::auth::{AppState, AppStateInner};
use tandem_db::{ChatStore, Database};
use tandem_gateway::{Dispatcher, StoreHandle};
use tandem_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tandem=debug,tower_http=debug".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {e:#}");
            eprintln!("       Set it in your .env file and restart.");
            std::process::exit(1);
        }
    };

    // Init database. Nobody is connected yet, so nobody is online.
    let db = Database::open(&config.db_path)?;
    let cleared = db.reset_presence()?;
    if cleared > 0 {
        info!("Cleared stale online flag on {} users", cleared);
    }

    let dispatcher = Dispatcher::new(StoreHandle::new(Arc::new(db), config.store_timeout));
    let state: AppState = Arc::new(AppStateInner {
        dispatcher,
        jwt_secret: config.jwt_secret.clone(),
    });

    let app = tandem_server::app(state);

    let addr = config.addr()?;
    info!("Tandem server listening on {}", addr);
    info!("Store calls time out after {:?}", config.store_timeout);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                error!("Could not install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
