use std::sync::Arc;
use std::time::Duration;

use envconfig::Envconfig;
use eyre::Result;

use lead_engine::audit::PgAuditLedger;
use lead_engine::customer::PgCustomerDirectory;
use lead_engine::lead::TeamId;
use lead_engine::pipeline::{LeadPipeline, PipelineSettings};
use lead_engine::rules::PgRuleSource;

use config::Config;

mod api;
mod config;
mod metrics;
mod router;

async fn listen(app: axum::Router, bind: std::net::SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("listening on {}", bind);

    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("failed to load configuration from env");
    let query_timeout = Duration::from_millis(config.query_timeout_ms);

    let directory = PgCustomerDirectory::new(&config.database_url, query_timeout)
        .expect("failed to create customer directory");
    let rules = PgRuleSource::new(&config.database_url, query_timeout)
        .expect("failed to create rule source");
    let ledger = PgAuditLedger::new(&config.database_url, query_timeout)
        .expect("failed to create audit ledger");

    let pipeline = Arc::new(LeadPipeline::new(
        Arc::new(directory),
        Arc::new(rules),
        Arc::new(ledger),
        PipelineSettings {
            fallback_team: config.fallback_team_id.map(TeamId),
        },
    ));

    let app = router::router(pipeline, config.export_prometheus);

    if let Err(e) = listen(app, config.address).await {
        tracing::error!("failed to start lead-api server: {}", e);
    }
}
