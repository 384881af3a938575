use anyhow::Context;
use courtside_feed::{Config, FeedController, FeedServices, InMemoryBackend, Snapshot};
use courtside_feed::models::FeedFilter;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays valid JSON
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env().context("Failed to load config")?;

    let mut args = std::env::args().skip(1);
    let path = match std::env::var("FEED_SNAPSHOT_PATH") {
        Ok(path) => path,
        Err(_) => args
            .next()
            .context("usage: feed-replay <snapshot.json> [filter] (or set FEED_SNAPSHOT_PATH)")?,
    };
    let filter: FeedFilter = match args.next().or_else(|| std::env::var("FEED_FILTER").ok()) {
        Some(raw) => raw.parse().context("Invalid feed filter")?,
        None => FeedFilter::All,
    };

    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read snapshot {}", path))?;
    let snapshot: Snapshot =
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse snapshot {}", path))?;

    info!(
        env = %config.app.env,
        path = %path,
        posts = snapshot.posts.len(),
        filter = %filter,
        "Replaying feed snapshot"
    );

    let backend = Arc::new(InMemoryBackend::from_snapshot(snapshot));
    let services = FeedServices::in_memory(backend, &config);
    let controller = FeedController::new(services, &config);

    let state = controller.load(0, &[], filter).await;
    let displayed = controller.displayed_posts().await;

    let report = json!({
        "status": state.status,
        "filter": state.current_filter,
        "has_more": state.has_more,
        "has_errors": state.has_errors,
        "error_details": state.error_details,
        "metrics": state.metrics,
        "posts": displayed,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to encode feed")?
    );

    Ok(())
}
