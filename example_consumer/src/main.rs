//! Demo server: loads table definitions and routers from `CONFIG_PATH` and serves them.
//!
//! Run from repo root: `cargo run -p example-consumer`

use std::sync::Arc;
use table_crud_router::{common_routes, load_from_path, resolve, table_routes, Database, PgStore};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("table_crud_router=info")),
        )
        .init();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/crud".into());
    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config".into());
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".into());

    let config = load_from_path(&config_path).await?;
    let routers = resolve(&config)?;
    let db: Arc<dyn Database> = Arc::new(PgStore::connect(&database_url, 5).await?);

    let (tables, schemas) = table_routes(db.clone(), routers);
    tracing::info!(operations = schemas.len(), "routers mounted");
    let app = common_routes(db).merge(tables);

    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
