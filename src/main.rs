use anyhow::Context;
use card_advisor_gateway::{app, clock::SystemClock, config::Args};
use clap::Parser; // for cli
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // API keys usually live in a .env next to the binary
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let app = app::spawn(&args, Arc::new(SystemClock))?;

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;

    let limits = args.rate_limits();
    info!(port = args.port, completion_url = %args.completion_url, model = %args.model, "gateway running");
    info!(
        completion_quota = limits.completion.quota,
        completion_window_secs = limits.completion.window.as_secs(),
        search_quota = limits.search.quota,
        search_window_secs = limits.search.window.as_secs(),
        "rate limits per user"
    );

    axum::serve(listener, app).await.context("server stopped")?;
    Ok(())
}
