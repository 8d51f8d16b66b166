//! Shared application state

use settlement_engine::disputes::DisputeService;
use settlement_engine::escrow::EscrowService;
use settlement_engine::gateway::NotificationVerifier;
use settlement_engine::payouts::PayoutService;
use settlement_engine::store::SettlementStore;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SettlementStore>,
    pub escrow: Arc<EscrowService>,
    pub payouts: Arc<PayoutService>,
    pub disputes: Arc<DisputeService>,
    pub verifier: Arc<NotificationVerifier>,
}
