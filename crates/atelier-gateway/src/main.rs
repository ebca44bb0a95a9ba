mod error;
mod feed;
mod handlers;

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result as AnyResult};
use atelier_core::{ChangeFeed, EmailSink};
use atelier_platform::{
    OutboxConfig, PgStore, RedisBus, ServiceConfig, StoreBackend, apply_schema, connect_database,
};
use atelier_store::InMemoryStore;
use atelier_workflow::{ContractService, OutboxDispatcher, RetryPolicy, ServiceSettings};
use axum::{
    Router,
    routing::{get, post},
};
use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use handlers::*;

#[derive(Clone)]
pub struct AppState {
    pub service: ContractService,
    /// Absent when no broker is wired in; the live feed then answers 503.
    pub redis: Option<RedisBus>,
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "atelier_gateway=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8080")?;
    let redis = RedisBus::connect(&config.redis_url)?;
    let feed: Arc<dyn ChangeFeed> = Arc::new(redis.clone());
    let settings = ServiceSettings {
        public_base_url: config.public_base_url.clone(),
    };

    let service = match config.store {
        StoreBackend::Postgres => {
            let pool = connect_database(config.database_url()?).await?;
            apply_schema(&pool).await?;
            ContractService::new(Arc::new(PgStore::new(pool)), feed, settings)
        }
        StoreBackend::Memory => {
            warn!("using the in-memory store; data is lost on restart");
            let store = Arc::new(InMemoryStore::new());
            let outbox_config = OutboxConfig::from_env()?;
            let dispatcher =
                memory_dispatcher(store.clone(), Arc::new(redis.clone()), &outbox_config)?;
            tokio::spawn(deliver_outbox(dispatcher, outbox_config.poll_interval));
            ContractService::new(store, feed, settings)
        }
    };

    if let Some(email) = &config.bootstrap_admin_email {
        if let Some(admin) = service.bootstrap_admin(email, "Administrator").await? {
            info!("bootstrapped admin {} ({})", admin.email, admin.id);
        }
    }

    let state = AppState {
        service,
        redis: Some(redis),
    };
    let router = router(state);

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

/// The notification worker cannot reach a process-local store, so the
/// gateway drains that outbox itself.
fn memory_dispatcher(
    store: Arc<InMemoryStore>,
    email: Arc<dyn EmailSink>,
    config: &OutboxConfig,
) -> AnyResult<OutboxDispatcher> {
    let policy = RetryPolicy::from_std(config.max_attempts, config.base_delay, config.max_delay)
        .context("invalid outbox retry settings")?;
    let lease =
        chrono::Duration::from_std(config.lease).context("OUTBOX_LEASE_SECS is out of range")?;
    Ok(
        OutboxDispatcher::new(store.clone(), store, email, policy)
            .with_batch_size(config.batch_size)
            .with_lease(lease),
    )
}

async fn deliver_outbox(dispatcher: OutboxDispatcher, poll_interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        deliver_pending(&dispatcher).await;
    }
}

async fn deliver_pending(dispatcher: &OutboxDispatcher) {
    match dispatcher.drain(Utc::now()).await {
        Ok(report) if report.claimed > 0 => info!(
            "outbox pass: {} claimed, {} delivered, {} retried, {} dead",
            report.claimed, report.delivered, report.retried, report.dead
        ),
        Ok(_) => {}
        Err(err) => error!("outbox pass failed: {err:#}"),
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/me", get(me))
        .route("/users", post(register_user))
        .route("/contracts", get(list_contracts).post(create_contract))
        .route("/contracts/{id}", get(get_contract))
        .route("/contracts/{id}/history", get(contract_history))
        .route("/contracts/{id}/document", get(contract_document))
        .route("/contracts/{id}/submit", post(submit_for_signature))
        .route("/contracts/{id}/sign/admin", post(sign_as_admin))
        .route("/contracts/{id}/sign/client", post(sign_as_client))
        .route("/contracts/{id}/cancel", post(cancel_contract))
        .route("/contracts/{id}/payment-proof", post(upload_payment_proof))
        .route(
            "/contracts/{id}/payment-proof/verify",
            post(verify_payment),
        )
        .route("/contracts/{id}/deletion-requests", post(request_deletion))
        .route("/deletion-requests", get(list_deletion_requests))
        .route("/deletion-requests/{id}/resolve", post(resolve_deletion))
        .route("/share/{token}", get(shared_contract))
        .route("/share/{token}/sign", post(sign_shared))
        .route(
            "/share/{token}/payment-proof",
            post(upload_shared_payment_proof),
        )
        .route("/notifications", get(list_notifications))
        .route("/notifications/read-all", post(mark_all_notifications_read))
        .route("/notifications/{id}/read", post(mark_notification_read))
        .route("/dashboard/summary", get(dashboard_summary))
        .route("/feed", get(feed::feed))
        .with_state(state)
}
