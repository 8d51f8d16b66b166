//! GigPay API server
//!
//! Boots the settlement engine and serves the REST surface plus the
//! payment-processor webhook.

mod error;
mod extract;
mod routes;
mod state;

use settlement_engine::audit::AuditLog;
use settlement_engine::config::Settings;
use settlement_engine::disputes::DisputeService;
use settlement_engine::escrow::{EscrowService, FeeSchedule};
use settlement_engine::gateway::{HttpProcessor, NotificationVerifier, PaymentProcessor};
use settlement_engine::guard::LockRegistry;
use settlement_engine::payouts::PayoutService;
use settlement_engine::store::SettlementStore;
use state::AppState;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = Settings::load()?;

    let store = Arc::new(SettlementStore::new());
    let audit = Arc::new(AuditLog::new());
    let locks = Arc::new(LockRegistry::new());
    let processor: Arc<dyn PaymentProcessor> =
        Arc::new(HttpProcessor::new(settings.gateway.clone())?);
    let verifier = Arc::new(NotificationVerifier::new(settings.gateway.server_key.as_str()));

    let escrow = Arc::new(EscrowService::new(
        store.clone(),
        processor,
        audit.clone(),
        locks.clone(),
        FeeSchedule::new(settings.fees.platform_fee_bps),
    ));
    let payouts = Arc::new(PayoutService::new(
        store.clone(),
        audit.clone(),
        locks.clone(),
    ));
    let disputes = Arc::new(DisputeService::new(
        store.clone(),
        escrow.clone(),
        audit.clone(),
    ));

    let app = routes::router(AppState {
        store,
        escrow,
        payouts,
        disputes,
        verifier,
    });

    let listener = tokio::net::TcpListener::bind(&settings.server.bind_addr).await?;
    info!("gigpay-api listening on {}", settings.server.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
