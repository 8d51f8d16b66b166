//! Payout ledger
//!
//! The available balance is derived fresh from escrow and payout history on
//! every call rather than kept as a running counter, so it cannot drift.
//! Requests reserve funds the moment they are inserted; admin transitions
//! advance them through processing to a terminal state.

use crate::{
    audit::AuditLog,
    error::EngineError,
    guard::{LockRegistry, LockScope},
    models::{Actor, BankSnapshot, Payout, PayoutStatus},
    store::{CasOutcome, SettlementStore},
    EngineResult,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Payout ledger service
pub struct PayoutService {
    store: Arc<SettlementStore>,
    audit: Arc<AuditLog>,
    locks: Arc<LockRegistry>,
}

impl PayoutService {
    pub fn new(
        store: Arc<SettlementStore>,
        audit: Arc<AuditLog>,
        locks: Arc<LockRegistry>,
    ) -> Self {
        Self {
            store,
            audit,
            locks,
        }
    }

    /// Released earnings minus reserved and completed payouts
    pub async fn available_balance(&self, freelancer_id: Uuid) -> i64 {
        self.store.available_balance(freelancer_id).await
    }

    /// Payout history for one freelancer, oldest first
    pub async fn history(&self, freelancer_id: Uuid) -> Vec<Payout> {
        self.store.payouts_for_freelancer(freelancer_id).await
    }

    pub async fn payout(&self, payout_id: Uuid) -> EngineResult<Payout> {
        self.store.payout(payout_id).await
    }

    /// Create a payout request against the current available balance
    pub async fn request(
        &self,
        freelancer_id: Uuid,
        amount: i64,
        bank_snapshot: BankSnapshot,
    ) -> EngineResult<Payout> {
        if amount <= 0 {
            return Err(EngineError::validation("payout amount must be positive"));
        }
        if bank_snapshot.account_number.trim().is_empty() {
            return Err(EngineError::validation("bank account number is required"));
        }

        let _lease = self.locks.acquire(LockScope::Freelancer, freelancer_id)?;

        // Balance check and insert share one store transaction
        let payout = self
            .store
            .create_payout(freelancer_id, amount, bank_snapshot)
            .await?;

        info!(
            payout_id = %payout.id,
            freelancer_id = %freelancer_id,
            amount,
            "payout requested"
        );

        Ok(payout)
    }

    /// Admin picks the request up for bank processing
    pub async fn process(&self, payout_id: Uuid, actor: &Actor) -> EngineResult<Payout> {
        self.require_admin(actor)?;

        let transition = self
            .store
            .transition_payout(payout_id, &[PayoutStatus::Requested], |p| {
                p.status = PayoutStatus::Processing;
                p.processed_at = Some(Utc::now());
            })
            .await?;

        match transition {
            CasOutcome::Applied(updated) => {
                self.audit
                    .append(
                        actor,
                        "payout.processing",
                        "payout",
                        updated.id,
                        serde_json::json!({
                            "freelancer_id": updated.freelancer_id,
                            "amount": updated.amount,
                        }),
                    )
                    .await;
                info!(payout_id = %updated.id, "payout processing");
                Ok(updated)
            }
            CasOutcome::Lost(current) => Err(EngineError::conflict(format!(
                "payout {} is {:?}; processing requires Requested",
                current.id, current.status
            ))),
        }
    }

    /// Admin confirms the bank transfer landed
    pub async fn complete(&self, payout_id: Uuid, actor: &Actor) -> EngineResult<Payout> {
        self.require_admin(actor)?;

        let transition = self
            .store
            .transition_payout(payout_id, &[PayoutStatus::Processing], |p| {
                p.status = PayoutStatus::Completed;
                p.completed_at = Some(Utc::now());
            })
            .await?;

        match transition {
            CasOutcome::Applied(updated) => {
                self.audit
                    .append(
                        actor,
                        "payout.completed",
                        "payout",
                        updated.id,
                        serde_json::json!({
                            "freelancer_id": updated.freelancer_id,
                            "amount": updated.amount,
                        }),
                    )
                    .await;
                info!(payout_id = %updated.id, amount = updated.amount, "payout completed");
                Ok(updated)
            }
            CasOutcome::Lost(current) => Err(EngineError::conflict(format!(
                "payout {} is {:?}; completion requires Processing",
                current.id, current.status
            ))),
        }
    }

    /// Admin records a failed transfer; the amount returns to the balance
    pub async fn fail(&self, payout_id: Uuid, actor: &Actor, reason: &str) -> EngineResult<Payout> {
        self.require_admin(actor)?;

        let transition = self
            .store
            .transition_payout(payout_id, &[PayoutStatus::Processing], |p| {
                p.status = PayoutStatus::Failed;
                p.completed_at = Some(Utc::now());
                p.failure_reason = Some(reason.to_string());
            })
            .await?;

        match transition {
            CasOutcome::Applied(updated) => {
                self.audit
                    .append(
                        actor,
                        "payout.failed",
                        "payout",
                        updated.id,
                        serde_json::json!({
                            "freelancer_id": updated.freelancer_id,
                            "amount": updated.amount,
                            "reason": reason,
                        }),
                    )
                    .await;
                info!(payout_id = %updated.id, reason, "payout failed");
                Ok(updated)
            }
            CasOutcome::Lost(current) => Err(EngineError::conflict(format!(
                "payout {} is {:?}; failure requires Processing",
                current.id, current.status
            ))),
        }
    }

    /// Freelancer withdraws a request that has not been picked up yet
    pub async fn cancel(&self, payout_id: Uuid, actor: &Actor) -> EngineResult<Payout> {
        let payout = self.store.payout(payout_id).await?;
        match actor {
            Actor::Freelancer(id) if *id == payout.freelancer_id => {}
            _ => {
                return Err(EngineError::validation(
                    "only the requesting freelancer may cancel a payout",
                ))
            }
        }

        let transition = self
            .store
            .transition_payout(payout_id, &[PayoutStatus::Requested], |p| {
                p.status = PayoutStatus::Cancelled;
            })
            .await?;

        match transition {
            CasOutcome::Applied(updated) => {
                info!(payout_id = %updated.id, "payout cancelled by freelancer");
                Ok(updated)
            }
            CasOutcome::Lost(current) => Err(EngineError::conflict(format!(
                "payout {} is {:?}; cancellation requires Requested",
                current.id, current.status
            ))),
        }
    }

    fn require_admin(&self, actor: &Actor) -> EngineResult<()> {
        if actor.is_admin() {
            Ok(())
        } else {
            Err(EngineError::validation(
                "payout processing requires admin authority",
            ))
        }
    }
}
