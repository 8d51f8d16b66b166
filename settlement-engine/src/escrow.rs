//! Escrow state machine
//!
//! Owns the escrow lifecycle: creation against an accepted bid, applying
//! payment confirmations from webhook and poll delivery, the delivery hop,
//! and release/refund settlement. Every transition is a conditional update
//! through the store, so concurrent callers are linearized and crediting
//! happens exactly once.

use crate::{
    audit::AuditLog,
    error::EngineError,
    gateway::{CheckoutToken, PaymentOutcome, PaymentProcessor},
    guard::{LockRegistry, LockScope},
    models::{Actor, Escrow, EscrowStatus},
    store::{CasOutcome, SettlementStore},
    EngineResult,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Platform fee policy, fixed at escrow creation
#[derive(Debug, Clone, Copy)]
pub struct FeeSchedule {
    /// Fee in basis points of the gross amount
    pub platform_fee_bps: u32,
}

impl FeeSchedule {
    pub fn new(platform_fee_bps: u32) -> Self {
        Self { platform_fee_bps }
    }

    /// Platform fee for a gross amount, rounded down
    pub fn fee_for(&self, gross_amount: i64) -> i64 {
        (gross_amount as i128 * self.platform_fee_bps as i128 / 10_000) as i64
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            platform_fee_bps: 1_000, // 10%
        }
    }
}

/// Escrow creation request, carrying the parties of the accepted bid
#[derive(Debug, Clone)]
pub struct CreateEscrowRequest {
    pub project_id: Uuid,
    pub client_id: Uuid,
    pub freelancer_id: Uuid,
    pub gross_amount: i64,
}

/// A freshly created escrow and the token the client pays with
#[derive(Debug, Clone)]
pub struct EscrowCheckout {
    pub escrow: Escrow,
    pub checkout: CheckoutToken,
}

/// Explicit result of applying a payment confirmation
///
/// Callers must distinguish a transition they performed from one another
/// delivery already performed; a lost race is not an error.
#[derive(Debug, Clone)]
pub enum ConfirmationResult {
    /// This call performed the transition
    Applied(Escrow),
    /// An equivalent confirmation was already applied
    AlreadyApplied(Escrow),
    /// Nothing to apply (e.g. the processor still reports pending)
    NoChange(Escrow),
}

impl ConfirmationResult {
    pub fn escrow(&self) -> &Escrow {
        match self {
            Self::Applied(e) | Self::AlreadyApplied(e) | Self::NoChange(e) => e,
        }
    }

    /// Whether this call mutated state
    pub fn updated(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Outcome of a poll reconciliation
#[derive(Debug, Clone)]
pub struct StatusCheck {
    pub escrow: Escrow,
    pub updated: bool,
}

/// Main escrow state machine service
pub struct EscrowService {
    store: Arc<SettlementStore>,
    processor: Arc<dyn PaymentProcessor>,
    audit: Arc<AuditLog>,
    locks: Arc<LockRegistry>,
    fees: FeeSchedule,
}

impl EscrowService {
    pub fn new(
        store: Arc<SettlementStore>,
        processor: Arc<dyn PaymentProcessor>,
        audit: Arc<AuditLog>,
        locks: Arc<LockRegistry>,
        fees: FeeSchedule,
    ) -> Self {
        Self {
            store,
            processor,
            audit,
            locks,
            fees,
        }
    }

    /// Create an escrow for an accepted bid and issue its checkout token
    pub async fn create(&self, request: CreateEscrowRequest) -> EngineResult<EscrowCheckout> {
        if request.gross_amount <= 0 {
            return Err(EngineError::validation("gross amount must be positive"));
        }

        // Single-flight per project; the insert's unique check arbitrates
        // across instances
        let _lease = self.locks.acquire(LockScope::Project, request.project_id)?;

        if let Some(existing) = self.store.current_escrow_for_project(request.project_id).await {
            if !existing.status.is_terminal() {
                return Err(EngineError::conflict(format!(
                    "project {} already has escrow {} in state {:?}",
                    request.project_id, existing.id, existing.status
                )));
            }
        }

        let fee = self.fees.fee_for(request.gross_amount);
        let external_order_id = format!("GIG-{}", Uuid::new_v4());

        let checkout = self
            .processor
            .create_checkout(
                &external_order_id,
                request.gross_amount,
                &format!("GigPay project {}", request.project_id),
            )
            .await?;

        let escrow = self
            .store
            .insert_escrow(Escrow::new(
                request.project_id,
                request.client_id,
                request.freelancer_id,
                request.gross_amount,
                fee,
                external_order_id,
            ))
            .await?;

        info!(
            escrow_id = %escrow.id,
            project_id = %escrow.project_id,
            gross = escrow.gross_amount,
            net = escrow.net_amount,
            "created escrow awaiting payment"
        );

        Ok(EscrowCheckout { escrow, checkout })
    }

    /// Apply one payment confirmation, exactly once
    ///
    /// Shared by the webhook handler and the status poll. Delivery is
    /// at-least-once; the conditional update makes application exactly-once,
    /// and a caller that loses the race observes the post-condition instead
    /// of an error.
    pub async fn apply_payment_confirmation(
        &self,
        external_order_id: &str,
        transaction_id: Option<&str>,
        outcome: PaymentOutcome,
    ) -> EngineResult<ConfirmationResult> {
        let escrow = self.store.escrow_by_order(external_order_id).await?;

        match outcome {
            PaymentOutcome::Captured => {
                let transaction_id = transaction_id.ok_or_else(|| {
                    EngineError::validation("captured confirmation is missing a transaction id")
                })?;
                self.apply_capture(escrow, transaction_id).await
            }
            PaymentOutcome::Denied | PaymentOutcome::Expired | PaymentOutcome::Cancelled => {
                self.apply_failure(escrow, outcome).await
            }
            PaymentOutcome::Pending => Ok(ConfirmationResult::NoChange(escrow)),
        }
    }

    async fn apply_capture(
        &self,
        escrow: Escrow,
        transaction_id: &str,
    ) -> EngineResult<ConfirmationResult> {
        if escrow.status != EscrowStatus::PendingPayment {
            return if escrow.external_transaction_id.as_deref() == Some(transaction_id) {
                Ok(ConfirmationResult::AlreadyApplied(escrow))
            } else {
                Err(EngineError::conflict(format!(
                    "escrow {} is {:?} under transaction {:?}; refusing capture for {}",
                    escrow.id, escrow.status, escrow.external_transaction_id, transaction_id
                )))
            };
        }

        let transition = self
            .store
            .transition_escrow(escrow.id, &[EscrowStatus::PendingPayment], |e| {
                e.status = EscrowStatus::Active;
                e.paid_at = Some(Utc::now());
                e.external_transaction_id = Some(transaction_id.to_string());
            })
            .await?;

        match transition {
            CasOutcome::Applied(updated) => {
                self.audit
                    .append(
                        &Actor::System,
                        "escrow.activated",
                        "escrow",
                        updated.id,
                        serde_json::json!({
                            "external_order_id": updated.external_order_id,
                            "external_transaction_id": transaction_id,
                            "gross_amount": updated.gross_amount,
                        }),
                    )
                    .await;
                info!(escrow_id = %updated.id, transaction_id, "escrow activated");
                Ok(ConfirmationResult::Applied(updated))
            }
            // A concurrent delivery won between our read and the update
            CasOutcome::Lost(current) => {
                if current.external_transaction_id.as_deref() == Some(transaction_id) {
                    Ok(ConfirmationResult::AlreadyApplied(current))
                } else {
                    Err(EngineError::conflict(format!(
                        "escrow {} moved to {:?} under transaction {:?}; refusing capture for {}",
                        current.id, current.status, current.external_transaction_id, transaction_id
                    )))
                }
            }
        }
    }

    async fn apply_failure(
        &self,
        escrow: Escrow,
        outcome: PaymentOutcome,
    ) -> EngineResult<ConfirmationResult> {
        if escrow.status == EscrowStatus::Cancelled {
            return Ok(ConfirmationResult::AlreadyApplied(escrow));
        }
        if escrow.status != EscrowStatus::PendingPayment {
            // A stale failure signal after capture never undoes custody
            warn!(
                escrow_id = %escrow.id,
                status = ?escrow.status,
                signal = ?outcome,
                "ignoring failure signal for settled escrow"
            );
            return Ok(ConfirmationResult::NoChange(escrow));
        }

        let transition = self
            .store
            .transition_escrow(escrow.id, &[EscrowStatus::PendingPayment], |e| {
                e.status = EscrowStatus::Cancelled;
            })
            .await?;

        match transition {
            CasOutcome::Applied(updated) => {
                self.audit
                    .append(
                        &Actor::System,
                        "escrow.cancelled",
                        "escrow",
                        updated.id,
                        serde_json::json!({
                            "external_order_id": updated.external_order_id,
                            "signal": outcome,
                        }),
                    )
                    .await;
                info!(escrow_id = %updated.id, signal = ?outcome, "escrow cancelled before capture");
                Ok(ConfirmationResult::Applied(updated))
            }
            CasOutcome::Lost(current) => {
                if current.status == EscrowStatus::Cancelled {
                    Ok(ConfirmationResult::AlreadyApplied(current))
                } else {
                    warn!(
                        escrow_id = %current.id,
                        status = ?current.status,
                        "capture won the race; dropping failure signal"
                    );
                    Ok(ConfirmationResult::NoChange(current))
                }
            }
        }
    }

    /// Reconcile against the processor's authoritative status
    pub async fn check_status(&self, escrow_id: Uuid) -> EngineResult<StatusCheck> {
        let escrow = self.store.escrow(escrow_id).await?;
        if escrow.status.is_terminal() {
            return Ok(StatusCheck {
                escrow,
                updated: false,
            });
        }

        let snapshot = self
            .processor
            .transaction_status(&escrow.external_order_id)
            .await?;

        let result = self
            .apply_payment_confirmation(
                &snapshot.order_id,
                snapshot.transaction_id.as_deref(),
                snapshot.outcome,
            )
            .await?;

        Ok(StatusCheck {
            updated: result.updated(),
            escrow: result.escrow().clone(),
        })
    }

    /// Record the external delivery signal
    pub async fn mark_delivered(&self, escrow_id: Uuid) -> EngineResult<Escrow> {
        let transition = self
            .store
            .transition_escrow(escrow_id, &[EscrowStatus::Active], |e| {
                e.status = EscrowStatus::Delivered;
                e.delivered_at = Some(Utc::now());
            })
            .await?;

        match transition {
            CasOutcome::Applied(updated) => {
                info!(escrow_id = %updated.id, "escrow marked delivered");
                Ok(updated)
            }
            CasOutcome::Lost(current) => Err(EngineError::conflict(format!(
                "escrow {} is {:?}; delivery requires Active",
                current.id, current.status
            ))),
        }
    }

    /// Release the full net amount to the freelancer, exactly once
    pub async fn release(&self, escrow_id: Uuid, actor: &Actor) -> EngineResult<Escrow> {
        let escrow = self.store.escrow(escrow_id).await?;
        self.authorize_settlement(&escrow, actor, "release")?;

        let _lease = self.locks.acquire(LockScope::Escrow, escrow_id)?;

        let transition = self
            .store
            .transition_escrow(
                escrow_id,
                &[EscrowStatus::Active, EscrowStatus::Delivered],
                |e| {
                    e.status = EscrowStatus::Released;
                    e.released_at = Some(Utc::now());
                    e.released_amount = e.net_amount;
                },
            )
            .await?;

        match transition {
            CasOutcome::Applied(updated) => {
                self.audit
                    .append(
                        actor,
                        "escrow.released",
                        "escrow",
                        updated.id,
                        serde_json::json!({
                            "freelancer_id": updated.freelancer_id,
                            "credited": updated.released_amount,
                        }),
                    )
                    .await;
                info!(
                    escrow_id = %updated.id,
                    credited = updated.released_amount,
                    "escrow released"
                );
                Ok(updated)
            }
            CasOutcome::Lost(current) => Err(if current.status == EscrowStatus::Released {
                EngineError::conflict(format!("escrow {} already released", current.id))
            } else {
                EngineError::conflict(format!(
                    "escrow {} is {:?}; release requires Active or Delivered",
                    current.id, current.status
                ))
            }),
        }
    }

    /// Cancel an abandoned checkout
    pub async fn cancel(&self, escrow_id: Uuid, actor: &Actor) -> EngineResult<Escrow> {
        let escrow = self.store.escrow(escrow_id).await?;
        self.authorize_settlement(&escrow, actor, "cancel")?;

        let transition = self
            .store
            .transition_escrow(escrow_id, &[EscrowStatus::PendingPayment], |e| {
                e.status = EscrowStatus::Cancelled;
            })
            .await?;

        match transition {
            CasOutcome::Applied(updated) => {
                self.audit
                    .append(
                        actor,
                        "escrow.cancelled",
                        "escrow",
                        updated.id,
                        serde_json::json!({
                            "external_order_id": updated.external_order_id,
                            "signal": "abandoned",
                        }),
                    )
                    .await;
                info!(escrow_id = %updated.id, "escrow cancelled");
                Ok(updated)
            }
            CasOutcome::Lost(current) => Err(EngineError::conflict(format!(
                "escrow {} is {:?}; cancel requires PendingPayment",
                current.id, current.status
            ))),
        }
    }

    /// Settle a disputed escrow with an explicit freelancer credit
    ///
    /// Reachable only through dispute resolution, which has already won the
    /// dispute's own conditional update.
    pub(crate) async fn settle_disputed(
        &self,
        escrow_id: Uuid,
        actor: &Actor,
        freelancer_credit: i64,
    ) -> EngineResult<Escrow> {
        let transition = self
            .store
            .transition_escrow(escrow_id, &[EscrowStatus::Disputed], |e| {
                if freelancer_credit > 0 {
                    e.status = EscrowStatus::Released;
                    e.released_at = Some(Utc::now());
                    e.released_amount = freelancer_credit;
                } else {
                    e.status = EscrowStatus::Refunded;
                    e.released_amount = 0;
                }
            })
            .await?;

        match transition {
            CasOutcome::Applied(updated) => {
                let (action, refunded) = if freelancer_credit > 0 {
                    ("escrow.released", updated.net_amount - freelancer_credit)
                } else {
                    ("escrow.refunded", updated.net_amount)
                };
                self.audit
                    .append(
                        actor,
                        action,
                        "escrow",
                        updated.id,
                        serde_json::json!({
                            "via": "dispute",
                            "credited": freelancer_credit,
                            "refunded": refunded,
                        }),
                    )
                    .await;
                info!(
                    escrow_id = %updated.id,
                    credited = freelancer_credit,
                    "disputed escrow settled"
                );
                Ok(updated)
            }
            CasOutcome::Lost(current) => Err(EngineError::conflict(format!(
                "escrow {} is {:?}; dispute settlement requires Disputed",
                current.id, current.status
            ))),
        }
    }

    /// Clients settle their own escrows; admins and the system timeout may
    /// settle any
    fn authorize_settlement(
        &self,
        escrow: &Escrow,
        actor: &Actor,
        operation: &str,
    ) -> EngineResult<()> {
        match actor {
            Actor::Client(id) if *id == escrow.client_id => Ok(()),
            Actor::Admin(_) | Actor::System => Ok(()),
            Actor::Client(_) => Err(EngineError::validation(format!(
                "only the escrow's client may {operation} it"
            ))),
            Actor::Freelancer(_) => Err(EngineError::validation(format!(
                "freelancers may not {operation} an escrow"
            ))),
        }
    }
}
