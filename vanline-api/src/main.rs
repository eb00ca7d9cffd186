use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vanline_api::{app, sweep, AppState};
use vanline_store::{Config, DbClient, EventProducer, KafkaNotifier, PgLedger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load()?;

    let db = DbClient::new(&config.database.url).await?;
    db.migrate().await?;

    let producer = EventProducer::new(&config.kafka.brokers)?;
    let state = AppState::new(
        Arc::new(PgLedger::new(db.pool.clone())),
        Arc::new(KafkaNotifier::new(producer)),
    );

    tokio::spawn(sweep::start_request_expiry_sweep(
        state.negotiation.clone(),
        config.business_rules.request_expiry_days,
    ));

    let addr = format!("0.0.0.0:{}", config.server.port);
    info!("vanline dispatch engine listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}
