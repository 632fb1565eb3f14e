use std::sync::Arc;

use anyhow::{Context, Result};
use herbtrace_api::{routes, state::AppState};
use herbtrace_core::operations::CoreConfig;
use herbtrace_repository::PostgresStore;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    dotenvy::dotenv().ok();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    let moisture_threshold_pct = std::env::var("HERBTRACE_MOISTURE_THRESHOLD_PCT")
        .unwrap_or_else(|_| "12.0".to_string())
        .parse::<f64>()
        .context("HERBTRACE_MOISTURE_THRESHOLD_PCT is not a number")?;
    let qr_base_url = std::env::var("HERBTRACE_QR_BASE_URL").ok();
    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".to_string())
        .parse::<u16>()
        .context("PORT is not a number")?;

    let store = PostgresStore::connect(&database_url, 5).await?;
    store.run_migrations().await?;

    let config = CoreConfig {
        moisture_threshold_pct,
        qr_base_url,
    };
    let app_state = AppState::new(Arc::new(store), config);
    let router = routes::router(app_state);

    let listener = TcpListener::bind((std::net::Ipv4Addr::UNSPECIFIED, port)).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, router.into_make_service()).await?;

    Ok(())
}
