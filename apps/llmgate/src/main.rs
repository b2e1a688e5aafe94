use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

mod cli;

use llmgate_core::{
    CoreState, GatewayConfig, GatewaySnapshot, HttpUpstreamClient, MemoryGatewayStore,
    UpstreamClientConfig, router,
};

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("llmgate failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();

    let raw = std::fs::read(&cli.gateways)?;
    let gateways: Vec<GatewayConfig> = serde_json::from_slice(&raw)?;
    info!(
        path = %cli.gateways.display(),
        gateways = gateways.len(),
        "gateway snapshot loaded"
    );

    let store = Arc::new(MemoryGatewayStore::new(GatewaySnapshot::new(gateways)));
    let upstream = Arc::new(HttpUpstreamClient::new(UpstreamClientConfig::default())?);
    let state = Arc::new(CoreState {
        gateways: store,
        upstream,
    });

    let app = axum::Router::new()
        .route("/health", axum::routing::get(health))
        .merge(router(state));

    let bind = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %bind, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({"status": "ok"}))
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("llmgate=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
