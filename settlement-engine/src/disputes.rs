//! Dispute resolution engine
//!
//! Filing freezes the project's escrow under admin arbitration; resolving is
//! the only path out of the frozen state and is terminal. The dispute's own
//! conditional update is the arbitration point for racing resolvers, so the
//! escrow settlement behind it runs exactly once.

use crate::{
    audit::AuditLog,
    error::EngineError,
    escrow::EscrowService,
    models::{Actor, Dispute, DisputeOutcome, DisputeReason, DisputeStatus, EscrowStatus},
    store::{CasOutcome, SettlementStore},
    EngineResult,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Dispute filing request
#[derive(Debug, Clone)]
pub struct FileDisputeRequest {
    pub project_id: Uuid,
    pub filed_by: Actor,
    pub reason: DisputeReason,
    pub description: String,
}

/// Dispute resolution engine
pub struct DisputeService {
    store: Arc<SettlementStore>,
    escrow: Arc<EscrowService>,
    audit: Arc<AuditLog>,
}

impl DisputeService {
    pub fn new(
        store: Arc<SettlementStore>,
        escrow: Arc<EscrowService>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            store,
            escrow,
            audit,
        }
    }

    pub async fn dispute(&self, dispute_id: Uuid) -> EngineResult<Dispute> {
        self.store.dispute(dispute_id).await
    }

    pub async fn open_dispute_for_project(&self, project_id: Uuid) -> Option<Dispute> {
        self.store.open_dispute_for_project(project_id).await
    }

    /// File a dispute against the project's current escrow, freezing it
    pub async fn file(&self, request: FileDisputeRequest) -> EngineResult<Dispute> {
        match request.filed_by {
            Actor::Client(_) | Actor::Freelancer(_) => {}
            Actor::Admin(_) | Actor::System => {
                return Err(EngineError::validation(
                    "disputes are filed by a project party",
                ))
            }
        }
        if request.description.trim().is_empty() {
            return Err(EngineError::validation("dispute description is required"));
        }

        let escrow = self
            .store
            .current_escrow_for_project(request.project_id)
            .await
            .ok_or_else(|| EngineError::not_found("escrow for project", request.project_id))?;

        if !escrow.status.can_dispute() {
            return Err(EngineError::conflict(format!(
                "escrow {} is {:?}; disputes require Active or Delivered",
                escrow.id, escrow.status
            )));
        }

        if let Some(open) = self.store.open_dispute_for_project(request.project_id).await {
            return Err(EngineError::conflict(format!(
                "dispute {} for project {} is still open",
                open.id, request.project_id
            )));
        }

        // The freeze arbitrates racing filers; the loser sees a conflict
        let transition = self
            .store
            .transition_escrow(
                escrow.id,
                &[EscrowStatus::Active, EscrowStatus::Delivered],
                |e| e.status = EscrowStatus::Disputed,
            )
            .await?;

        let frozen = match transition {
            CasOutcome::Applied(frozen) => frozen,
            CasOutcome::Lost(current) => {
                return Err(EngineError::conflict(format!(
                    "escrow {} moved to {:?} before the dispute could be filed",
                    current.id, current.status
                )))
            }
        };

        let dispute = self
            .store
            .insert_dispute(Dispute::new(
                request.project_id,
                frozen.id,
                request.filed_by,
                request.reason,
                request.description,
            ))
            .await?;

        self.audit
            .append(
                &request.filed_by,
                "dispute.filed",
                "dispute",
                dispute.id,
                serde_json::json!({
                    "project_id": dispute.project_id,
                    "escrow_id": dispute.escrow_id,
                    "reason": dispute.reason,
                }),
            )
            .await;

        warn!(
            dispute_id = %dispute.id,
            escrow_id = %frozen.id,
            reason = ?dispute.reason,
            "dispute filed, escrow frozen"
        );

        Ok(dispute)
    }

    /// Resolve an open dispute; terminal and non-reversible
    pub async fn resolve(
        &self,
        dispute_id: Uuid,
        resolved_by: &Actor,
        outcome: DisputeOutcome,
        resolution_notes: Option<String>,
    ) -> EngineResult<Dispute> {
        let admin_id = match resolved_by {
            Actor::Admin(id) => *id,
            _ => {
                return Err(EngineError::validation(
                    "dispute resolution requires admin authority",
                ))
            }
        };

        let dispute = self.store.dispute(dispute_id).await?;
        if dispute.status == DisputeStatus::Resolved {
            return Err(EngineError::conflict(format!(
                "dispute {} already resolved with {:?}",
                dispute.id, dispute.outcome
            )));
        }

        let escrow = self.store.escrow(dispute.escrow_id).await?;

        // Validate the whole outcome before mutating anything
        let freelancer_credit = match &outcome {
            DisputeOutcome::ReleaseToFreelancer => escrow.net_amount,
            DisputeOutcome::RefundToClient => 0,
            DisputeOutcome::Split {
                freelancer_amount,
                client_amount,
            } => {
                if *freelancer_amount < 0 || *client_amount < 0 {
                    return Err(EngineError::validation(
                        "split amounts must be non-negative",
                    ));
                }
                if freelancer_amount + client_amount != escrow.net_amount {
                    return Err(EngineError::validation(format!(
                        "split amounts {} + {} must sum to the net amount {}",
                        freelancer_amount, client_amount, escrow.net_amount
                    )));
                }
                *freelancer_amount
            }
        };

        // Arbitration point: only one resolver wins this update
        let transition = self
            .store
            .transition_dispute(dispute_id, |d| {
                d.status = DisputeStatus::Resolved;
                d.outcome = Some(outcome.clone());
                d.resolution_notes = resolution_notes.clone();
                d.resolved_by = Some(admin_id);
                d.resolved_at = Some(Utc::now());
            })
            .await?;

        let resolved = match transition {
            CasOutcome::Applied(resolved) => resolved,
            CasOutcome::Lost(current) => {
                return Err(EngineError::conflict(format!(
                    "dispute {} already resolved with {:?}",
                    current.id, current.outcome
                )))
            }
        };

        let settled = self
            .escrow
            .settle_disputed(dispute.escrow_id, resolved_by, freelancer_credit)
            .await?;

        self.audit
            .append(
                resolved_by,
                "dispute.resolved",
                "dispute",
                resolved.id,
                serde_json::json!({
                    "project_id": resolved.project_id,
                    "escrow_id": resolved.escrow_id,
                    "outcome": resolved.outcome,
                    "escrow_status": settled.status,
                    "credited": freelancer_credit,
                }),
            )
            .await;

        info!(
            dispute_id = %resolved.id,
            outcome = ?resolved.outcome,
            "dispute resolved"
        );

        Ok(resolved)
    }
}
