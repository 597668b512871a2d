mod app;
mod auth;
mod config;
mod db;
mod dispatch;
mod error;
mod handlers;
mod models;
mod posting;
mod progress;
mod qc;
mod regenerate;
mod service;
mod state;
mod status;
mod upgrade;

use agency_common::{bind_listener, init_tracing, shutdown_signal};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio_postgres::NoTls;

use crate::config::ServiceConfig;
use crate::dispatch::{spawn_posting_worker, PostingDispatcher};
use crate::state::AppState;

const INIT_SCHEMA: &str = include_str!("../migrations/0001_init.sql");

#[tokio::main]
async fn main() {
    let _guards = init_tracing("agency-service");

    if let Err(err) = run().await {
        tracing::error!(error = %err, "agency-service stopped");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = ServiceConfig::from_env();
    let database_url = std::env::var("DATABASE_URL").map_err(|_| "DATABASE_URL is required")?;

    let (db, connection) = tokio_postgres::connect(&database_url, NoTls).await?;
    tokio::spawn(async move {
        // Drive the connection in the background.
        if let Err(err) = connection.await {
            tracing::error!(error = %err, "database connection error");
        }
    });

    if config.run_migrations {
        db.batch_execute(INIT_SCHEMA).await?;
        tracing::info!("schema applied");
    }

    let (updates, _) = broadcast::channel(32);
    let (posting, posting_jobs) = PostingDispatcher::channel(config.posting_queue_depth);
    let port = config.port;
    let state = AppState {
        db: Arc::new(Mutex::new(db)),
        config: Arc::new(config),
        updates,
        posting,
    };
    spawn_posting_worker(state.clone(), posting_jobs);

    let app = app::build_router(state);
    let listener = bind_listener(port).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
