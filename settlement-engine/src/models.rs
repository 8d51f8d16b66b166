//! Core data models for the settlement engine
//!
//! This module contains the escrow, payout, dispute and audit records, their
//! state machines, and the actor type used for authority checks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Escrow state machine enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowStatus {
    /// Checkout token issued, awaiting capture by the processor
    PendingPayment,
    /// Funds captured and held in custody
    Active,
    /// Project marked delivered by its collaborator
    Delivered,
    /// Frozen pending admin arbitration
    Disputed,
    /// Funds credited to the freelancer
    Released,
    /// Funds returned to the client
    Refunded,
    /// Checkout abandoned or denied before capture
    Cancelled,
}

impl EscrowStatus {
    /// Check if this is a terminal state (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Refunded | Self::Cancelled)
    }

    /// Check if this state allows a payment confirmation to apply
    pub fn can_confirm(&self) -> bool {
        matches!(self, Self::PendingPayment)
    }

    /// Check if this state allows release
    pub fn can_release(&self) -> bool {
        matches!(self, Self::Active | Self::Delivered)
    }

    /// Check if this state allows filing a dispute
    pub fn can_dispute(&self) -> bool {
        matches!(self, Self::Active | Self::Delivered)
    }
}

/// Payout state machine enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayoutStatus {
    /// Created by the freelancer, awaiting admin pickup
    Requested,
    /// Admin is executing the bank transfer
    Processing,
    /// Transfer confirmed
    Completed,
    /// Transfer failed; amount returns to the available balance
    Failed,
    /// Withdrawn by the freelancer before processing
    Cancelled,
}

impl PayoutStatus {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Check if this payout still blocks new requests for the freelancer
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Requested | Self::Processing)
    }

    /// Check if this payout reserves funds against the available balance
    pub fn reserves_funds(&self) -> bool {
        matches!(self, Self::Requested | Self::Processing | Self::Completed)
    }
}

/// Dispute status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeStatus {
    Open,
    Resolved,
}

/// Enumerated reasons a party can file a dispute under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeReason {
    WorkNotDelivered,
    QualityRejected,
    ScopeDisagreement,
    Unresponsive,
    Other,
}

/// Admin-chosen resolution for a dispute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DisputeOutcome {
    /// Full net amount to the freelancer
    ReleaseToFreelancer,
    /// Nothing to the freelancer; client refunded out of band
    RefundToClient,
    /// Explicit amounts; must sum exactly to the escrow net amount
    Split {
        freelancer_amount: i64,
        client_amount: i64,
    },
}

/// Party performing an operation, matched exhaustively at authority checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "id", rename_all = "snake_case")]
pub enum Actor {
    Client(Uuid),
    Freelancer(Uuid),
    Admin(Uuid),
    System,
}

impl Actor {
    /// User id behind the actor, if any
    pub fn id(&self) -> Option<Uuid> {
        match self {
            Self::Client(id) | Self::Freelancer(id) | Self::Admin(id) => Some(*id),
            Self::System => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin(_))
    }
}

/// Escrow model holding a client's payment for one project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escrow {
    pub id: Uuid,
    pub project_id: Uuid,
    pub client_id: Uuid,
    pub freelancer_id: Uuid,

    // Amounts in minor currency units; net is fixed at creation
    pub gross_amount: i64,
    pub platform_fee_amount: i64,
    pub net_amount: i64,
    /// Portion of the net amount credited to the freelancer on settlement
    pub released_amount: i64,

    pub status: EscrowStatus,

    // Processor references; the order id is the idempotency key
    pub external_order_id: String,
    pub external_transaction_id: Option<String>,

    // Timestamps
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
}

impl Escrow {
    /// Create a new escrow awaiting payment
    pub fn new(
        project_id: Uuid,
        client_id: Uuid,
        freelancer_id: Uuid,
        gross_amount: i64,
        platform_fee_amount: i64,
        external_order_id: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            client_id,
            freelancer_id,
            gross_amount,
            platform_fee_amount,
            net_amount: gross_amount - platform_fee_amount,
            released_amount: 0,
            status: EscrowStatus::PendingPayment,
            external_order_id,
            external_transaction_id: None,
            created_at: Utc::now(),
            paid_at: None,
            delivered_at: None,
            released_at: None,
        }
    }
}

/// Bank account details captured at payout request time, immutable thereafter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankSnapshot {
    pub bank_name: String,
    pub account_number: String,
    pub account_holder: String,
}

/// Payout model representing a freelancer withdrawal request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payout {
    pub id: Uuid,
    pub freelancer_id: Uuid,
    pub amount: i64,
    pub status: PayoutStatus,
    pub bank_snapshot: BankSnapshot,

    pub requested_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl Payout {
    /// Create a new requested payout
    pub fn new(freelancer_id: Uuid, amount: i64, bank_snapshot: BankSnapshot) -> Self {
        Self {
            id: Uuid::new_v4(),
            freelancer_id,
            amount,
            status: PayoutStatus::Requested,
            bank_snapshot,
            requested_at: Utc::now(),
            processed_at: None,
            completed_at: None,
            failure_reason: None,
        }
    }
}

/// Dispute model tied 1:1 to a project's current escrow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispute {
    pub id: Uuid,
    pub project_id: Uuid,
    pub escrow_id: Uuid,

    pub filed_by: Actor,
    pub reason: DisputeReason,
    pub description: String,

    pub status: DisputeStatus,
    pub outcome: Option<DisputeOutcome>,
    pub resolution_notes: Option<String>,
    pub resolved_by: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Dispute {
    /// Create a new open dispute
    pub fn new(
        project_id: Uuid,
        escrow_id: Uuid,
        filed_by: Actor,
        reason: DisputeReason,
        description: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            escrow_id,
            filed_by,
            reason,
            description,
            status: DisputeStatus::Open,
            outcome: None,
            resolution_notes: None,
            resolved_by: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }
}

/// Append-only audit record for privileged or irreversible transitions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub actor: Actor,
    pub action_type: String,
    pub target_type: String,
    pub target_id: Uuid,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
