//! Settlement store - single source of truth and arbiter of races
//!
//! All financial state lives behind one write lock whose guard scope is the
//! transaction scope: a conditional update reads the current row, checks the
//! expected status and mutates without releasing the guard, which is what
//! linearizes concurrent transitions on the same escrow or payout. The same
//! API maps onto Postgres as `UPDATE ... WHERE status = $expected` plus
//! unique indexes (see the sqlx TODO in Cargo.toml); callers never get a
//! weaker contract than the database would give them.

use crate::{
    error::EngineError,
    models::{BankSnapshot, Dispute, DisputeStatus, Escrow, EscrowStatus, Payout, PayoutStatus},
    EngineResult,
};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Result of a conditional update
///
/// `Lost` carries the current row so callers can decide whether the race was
/// benign (confirmation already applied) or a user-visible conflict.
#[derive(Debug, Clone)]
pub enum CasOutcome<T> {
    Applied(T),
    Lost(T),
}

#[derive(Default)]
struct Tables {
    escrows: HashMap<Uuid, Escrow>,
    escrows_by_order: HashMap<String, Uuid>,
    payouts: HashMap<Uuid, Payout>,
    disputes: HashMap<Uuid, Dispute>,
}

impl Tables {
    fn released_total(&self, freelancer_id: Uuid) -> i64 {
        self.escrows
            .values()
            .filter(|e| e.freelancer_id == freelancer_id && e.status == EscrowStatus::Released)
            .map(|e| e.released_amount)
            .sum()
    }

    fn reserved_total(&self, freelancer_id: Uuid) -> i64 {
        self.payouts
            .values()
            .filter(|p| p.freelancer_id == freelancer_id && p.status.reserves_funds())
            .map(|p| p.amount)
            .sum()
    }

    fn available_balance(&self, freelancer_id: Uuid) -> i64 {
        self.released_total(freelancer_id) - self.reserved_total(freelancer_id)
    }
}

/// Relational tables for escrows, payouts and disputes
///
/// In-memory backing; in production this is the database.
pub struct SettlementStore {
    tables: RwLock<Tables>,
}

impl SettlementStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    // ---- escrows ----

    /// Insert a new escrow, enforcing one non-terminal escrow per project and
    /// a globally unique external order id
    pub async fn insert_escrow(&self, escrow: Escrow) -> EngineResult<Escrow> {
        let mut tables = self.tables.write().await;

        if let Some(existing) = tables
            .escrows
            .values()
            .find(|e| e.project_id == escrow.project_id && !e.status.is_terminal())
        {
            return Err(EngineError::conflict(format!(
                "project {} already has escrow {} in state {:?}",
                escrow.project_id, existing.id, existing.status
            )));
        }

        if tables.escrows_by_order.contains_key(&escrow.external_order_id) {
            return Err(EngineError::conflict(format!(
                "external order id {} already exists",
                escrow.external_order_id
            )));
        }

        tables
            .escrows_by_order
            .insert(escrow.external_order_id.clone(), escrow.id);
        tables.escrows.insert(escrow.id, escrow.clone());

        Ok(escrow)
    }

    pub async fn escrow(&self, id: Uuid) -> EngineResult<Escrow> {
        self.tables
            .read()
            .await
            .escrows
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("escrow", id))
    }

    pub async fn escrow_by_order(&self, external_order_id: &str) -> EngineResult<Escrow> {
        let tables = self.tables.read().await;
        tables
            .escrows_by_order
            .get(external_order_id)
            .and_then(|id| tables.escrows.get(id))
            .cloned()
            .ok_or_else(|| EngineError::not_found("escrow", external_order_id))
    }

    /// The project's current escrow: its non-terminal one if any, otherwise
    /// the most recently created
    pub async fn current_escrow_for_project(&self, project_id: Uuid) -> Option<Escrow> {
        let tables = self.tables.read().await;
        let mut candidates: Vec<&Escrow> = tables
            .escrows
            .values()
            .filter(|e| e.project_id == project_id)
            .collect();

        if let Some(open) = candidates.iter().find(|e| !e.status.is_terminal()) {
            return Some((*open).clone());
        }

        candidates.sort_by_key(|e| e.created_at);
        candidates.last().map(|e| (*e).clone())
    }

    /// Conditionally transition an escrow: the mutation runs only if the
    /// current status is one of `allowed_from`, all under a single guard
    pub async fn transition_escrow<F>(
        &self,
        id: Uuid,
        allowed_from: &[EscrowStatus],
        mutate: F,
    ) -> EngineResult<CasOutcome<Escrow>>
    where
        F: FnOnce(&mut Escrow),
    {
        let mut tables = self.tables.write().await;
        let escrow = tables
            .escrows
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("escrow", id))?;

        if !allowed_from.contains(&escrow.status) {
            return Ok(CasOutcome::Lost(escrow.clone()));
        }

        mutate(escrow);
        Ok(CasOutcome::Applied(escrow.clone()))
    }

    // ---- payouts ----

    /// Available balance computed fresh from escrow and payout history
    pub async fn available_balance(&self, freelancer_id: Uuid) -> i64 {
        self.tables.read().await.available_balance(freelancer_id)
    }

    /// Create a payout request
    ///
    /// The balance read, the open-payout check and the insert all happen
    /// under one write guard, so two racing requests cannot both observe
    /// sufficient balance before either commits.
    pub async fn create_payout(
        &self,
        freelancer_id: Uuid,
        amount: i64,
        bank_snapshot: BankSnapshot,
    ) -> EngineResult<Payout> {
        let mut tables = self.tables.write().await;

        if let Some(open) = tables
            .payouts
            .values()
            .find(|p| p.freelancer_id == freelancer_id && p.status.is_open())
        {
            return Err(EngineError::conflict(format!(
                "payout {} for freelancer {} is still {:?}",
                open.id, freelancer_id, open.status
            )));
        }

        let available = tables.available_balance(freelancer_id);
        if amount > available {
            return Err(EngineError::validation(format!(
                "payout amount {} exceeds available balance {}",
                amount, available
            )));
        }

        let payout = Payout::new(freelancer_id, amount, bank_snapshot);
        tables.payouts.insert(payout.id, payout.clone());

        Ok(payout)
    }

    pub async fn payout(&self, id: Uuid) -> EngineResult<Payout> {
        self.tables
            .read()
            .await
            .payouts
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("payout", id))
    }

    pub async fn payouts_for_freelancer(&self, freelancer_id: Uuid) -> Vec<Payout> {
        let tables = self.tables.read().await;
        let mut payouts: Vec<Payout> = tables
            .payouts
            .values()
            .filter(|p| p.freelancer_id == freelancer_id)
            .cloned()
            .collect();
        payouts.sort_by_key(|p| p.requested_at);
        payouts
    }

    /// Conditionally transition a payout, mirroring `transition_escrow`
    pub async fn transition_payout<F>(
        &self,
        id: Uuid,
        allowed_from: &[PayoutStatus],
        mutate: F,
    ) -> EngineResult<CasOutcome<Payout>>
    where
        F: FnOnce(&mut Payout),
    {
        let mut tables = self.tables.write().await;
        let payout = tables
            .payouts
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("payout", id))?;

        if !allowed_from.contains(&payout.status) {
            return Ok(CasOutcome::Lost(payout.clone()));
        }

        mutate(payout);
        Ok(CasOutcome::Applied(payout.clone()))
    }

    // ---- disputes ----

    /// Insert a dispute, enforcing at most one OPEN dispute per project
    pub async fn insert_dispute(&self, dispute: Dispute) -> EngineResult<Dispute> {
        let mut tables = self.tables.write().await;

        if let Some(open) = tables
            .disputes
            .values()
            .find(|d| d.project_id == dispute.project_id && d.status == DisputeStatus::Open)
        {
            return Err(EngineError::conflict(format!(
                "dispute {} for project {} is still open",
                open.id, dispute.project_id
            )));
        }

        tables.disputes.insert(dispute.id, dispute.clone());
        Ok(dispute)
    }

    pub async fn dispute(&self, id: Uuid) -> EngineResult<Dispute> {
        self.tables
            .read()
            .await
            .disputes
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("dispute", id))
    }

    pub async fn open_dispute_for_project(&self, project_id: Uuid) -> Option<Dispute> {
        let tables = self.tables.read().await;
        tables
            .disputes
            .values()
            .find(|d| d.project_id == project_id && d.status == DisputeStatus::Open)
            .cloned()
    }

    /// Conditionally resolve a dispute; the mutation runs only while OPEN
    pub async fn transition_dispute<F>(
        &self,
        id: Uuid,
        mutate: F,
    ) -> EngineResult<CasOutcome<Dispute>>
    where
        F: FnOnce(&mut Dispute),
    {
        let mut tables = self.tables.write().await;
        let dispute = tables
            .disputes
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("dispute", id))?;

        if dispute.status != DisputeStatus::Open {
            return Ok(CasOutcome::Lost(dispute.clone()));
        }

        mutate(dispute);
        Ok(CasOutcome::Applied(dispute.clone()))
    }
}

impl Default for SettlementStore {
    fn default() -> Self {
        Self::new()
    }
}
