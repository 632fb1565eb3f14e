use std::env;

use anyhow::Result;
use herbtrace_repository::PostgresStore;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();
    let database_url = env::var("DATABASE_URL")?;
    let store = PostgresStore::connect(&database_url, 5).await?;
    store.run_migrations().await?;
    info!("migrations applied");
    Ok(())
}
