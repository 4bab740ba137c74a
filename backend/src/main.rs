//! Inventory ledger HTTP server

use std::{net::SocketAddr, sync::Arc};

use stock_ledger::{
    config::Config, connect_database, create_app, external::SalesAnalyticsClient,
    init_tracing, services::CancellationFlag, AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    init_tracing("stock_ledger=debug,ledger_server=debug,tower_http=debug,sqlx=warn", config.log_json);

    tracing::info!("Starting inventory ledger server");
    tracing::info!("Environment: {}", config.environment);
    tracing::info!("Negative stock policy: {:?}", config.ledger.negative_stock);

    // Create database connection pool
    tracing::info!("Connecting to database...");
    let db_pool = connect_database(&config.database).await?;
    tracing::info!("Database connection established");

    // Run migrations in development
    if config.environment == "development" {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&db_pool).await?;
        tracing::info!("Migrations completed");
    }

    let sales_source = SalesAnalyticsClient::new(&config.analytics)?;
    let shutdown = CancellationFlag::new();

    // Create application state
    let state = AppState {
        db: db_pool,
        config: Arc::new(config.clone()),
        sales_source: Arc::new(sales_source),
        shutdown: shutdown.clone(),
    };

    // Build application
    let app = create_app(state);

    // Start server
    let host: std::net::IpAddr = config.server.host.parse()?;
    let addr = SocketAddr::from((host, config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested, stopping batch work between items");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
