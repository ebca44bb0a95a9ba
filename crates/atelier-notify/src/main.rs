use std::sync::Arc;

use anyhow::{Context, Result, bail};
use atelier_core::{EmailSink, NotificationStore, OutboxStore};
use atelier_platform::{
    CONTRACTS_CHANGED_CHANNEL, OutboxConfig, PgStore, RedisBus, ServiceConfig, connect_database,
};
use atelier_workflow::{OutboxDispatcher, RetryPolicy};
use chrono::Utc;
use futures_util::StreamExt;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "atelier_notify=info".to_string()),
        )
        .init();

    let config = ServiceConfig::worker_from_env()?;
    let outbox_config = OutboxConfig::from_env()?;
    let pool = connect_database(config.database_url()?).await?;
    let redis = RedisBus::connect(&config.redis_url)?;

    let store = Arc::new(PgStore::new(pool));
    let outbox: Arc<dyn OutboxStore> = store.clone();
    let notifications: Arc<dyn NotificationStore> = store;
    let email: Arc<dyn EmailSink> = Arc::new(redis.clone());
    let dispatcher = OutboxDispatcher::new(
        outbox,
        notifications,
        email,
        retry_policy(&outbox_config)?,
    )
    .with_batch_size(outbox_config.batch_size)
    .with_lease(
        chrono::Duration::from_std(outbox_config.lease).context("OUTBOX_LEASE_SECS is out of range")?,
    );

    let mut pubsub = redis.client().get_async_pubsub().await?;
    pubsub.subscribe(CONTRACTS_CHANGED_CHANNEL).await?;
    let mut messages = pubsub.on_message();

    let mut ticker = tokio::time::interval(outbox_config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "notification worker subscribed to {} (polling every {:?})",
        CONTRACTS_CHANGED_CHANNEL, outbox_config.poll_interval
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            message = messages.next() => {
                if message.is_none() {
                    bail!("{CONTRACTS_CHANGED_CHANNEL} subscription closed");
                }
            }
        }

        match dispatcher.drain(Utc::now()).await {
            Ok(report) if report.claimed > 0 => info!(
                "outbox pass: {} claimed, {} delivered, {} retried, {} dead",
                report.claimed, report.delivered, report.retried, report.dead
            ),
            Ok(_) => {}
            Err(err) => error!("outbox pass failed: {err:#}"),
        }
    }
}

fn retry_policy(config: &OutboxConfig) -> Result<RetryPolicy> {
    RetryPolicy::from_std(config.max_attempts, config.base_delay, config.max_delay)
        .context("invalid outbox retry settings")
}
