//! Replays stored cluster histories and rewrites their counters.
//!
//! Heals clusters whose counters went stale because a request died between
//! committing a report and recomputing its cluster. Safe to run at any time.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bikesignal_common::EngineConfig;
use bikesignal_engine::SignalService;
use bikesignal_events::EventStore;
use bikesignal_store::{PgSignalStore, SignalStore};

#[derive(Parser, Debug)]
#[command(name = "bikesignal-recompute", about = "Recompute bike group signal counters")]
struct Args {
    /// Postgres connection string.
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Only recompute this bike group.
    #[arg(long)]
    group: Option<i64>,

    /// Print the summary as JSON.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("bikesignal=info".parse()?))
        .init();

    let args = Args::parse();
    let config = EngineConfig::from_env()?;
    config.log_summary();

    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect(&args.database_url)
        .await
        .context("Failed to connect to Postgres")?;

    let store = PgSignalStore::new(pool.clone());
    store.migrate().await?;
    let events = EventStore::new(pool);
    events.migrate().await?;

    let store = Arc::new(store);
    let service = SignalService::new(store.clone(), Arc::new(events), config);

    let group_ids = match args.group {
        Some(id) => vec![id],
        None => store.bike_group_ids().await?,
    };
    info!(groups = group_ids.len(), "Recomputing bike groups");

    let now = Utc::now();
    let mut changed = 0usize;
    let mut failed = 0usize;
    for bike_group_id in &group_ids {
        match service.recompute_group(*bike_group_id, now).await {
            Ok(outcome) if outcome.strength_changed() => changed += 1,
            Ok(_) => {}
            Err(e) if e.is_corruption() => return Err(e.into()),
            Err(e) => {
                warn!(bike_group_id, error = %e, "Recompute failed");
                failed += 1;
            }
        }
    }

    if args.json {
        println!(
            "{}",
            json!({
                "groups": group_ids.len(),
                "strength_changed": changed,
                "failed": failed,
            })
        );
    } else {
        println!(
            "Recomputed {} bike groups: {} changed strength, {} failed",
            group_ids.len(),
            changed,
            failed
        );
    }

    Ok(())
}
