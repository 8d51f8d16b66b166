//! End-to-end settlement flows against a scripted payment processor.

use async_trait::async_trait;
use chrono::Utc;
use settlement_engine::audit::AuditLog;
use settlement_engine::disputes::{DisputeService, FileDisputeRequest};
use settlement_engine::error::EngineError;
use settlement_engine::escrow::{
    ConfirmationResult, CreateEscrowRequest, EscrowService, FeeSchedule,
};
use settlement_engine::gateway::{
    CheckoutToken, PaymentOutcome, PaymentProcessor, StatusSnapshot,
};
use settlement_engine::guard::LockRegistry;
use settlement_engine::models::{
    Actor, BankSnapshot, DisputeOutcome, DisputeReason, DisputeStatus, Escrow, EscrowStatus,
    PayoutStatus,
};
use settlement_engine::payouts::PayoutService;
use settlement_engine::store::SettlementStore;
use settlement_engine::EngineResult;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Processor double whose status answers are scripted per order id
struct MockProcessor {
    statuses: RwLock<HashMap<String, StatusSnapshot>>,
}

impl MockProcessor {
    fn new() -> Self {
        Self {
            statuses: RwLock::new(HashMap::new()),
        }
    }

    async fn script_status(&self, order_id: &str, transaction_id: Option<&str>, outcome: PaymentOutcome) {
        self.statuses.write().await.insert(
            order_id.to_string(),
            StatusSnapshot {
                order_id: order_id.to_string(),
                transaction_id: transaction_id.map(str::to_string),
                outcome,
            },
        );
    }
}

#[async_trait]
impl PaymentProcessor for MockProcessor {
    async fn create_checkout(
        &self,
        order_id: &str,
        _gross_amount: i64,
        _description: &str,
    ) -> EngineResult<CheckoutToken> {
        Ok(CheckoutToken {
            token: format!("tok-{order_id}"),
            redirect_url: format!("https://pay.example/{order_id}"),
            expires_at: Utc::now() + chrono::Duration::hours(24),
        })
    }

    async fn transaction_status(&self, order_id: &str) -> EngineResult<StatusSnapshot> {
        self.statuses
            .read()
            .await
            .get(order_id)
            .cloned()
            .ok_or_else(|| EngineError::gateway(format!("no scripted status for {order_id}")))
    }
}

struct Harness {
    store: Arc<SettlementStore>,
    audit: Arc<AuditLog>,
    processor: Arc<MockProcessor>,
    escrow: Arc<EscrowService>,
    payouts: Arc<PayoutService>,
    disputes: Arc<DisputeService>,
}

fn harness() -> Harness {
    let store = Arc::new(SettlementStore::new());
    let audit = Arc::new(AuditLog::new());
    let locks = Arc::new(LockRegistry::new());
    let processor = Arc::new(MockProcessor::new());

    let escrow = Arc::new(EscrowService::new(
        store.clone(),
        processor.clone(),
        audit.clone(),
        locks.clone(),
        FeeSchedule::default(),
    ));
    let payouts = Arc::new(PayoutService::new(store.clone(), audit.clone(), locks.clone()));
    let disputes = Arc::new(DisputeService::new(store.clone(), escrow.clone(), audit.clone()));

    Harness {
        store,
        audit,
        processor,
        escrow,
        payouts,
        disputes,
    }
}

fn bank() -> BankSnapshot {
    BankSnapshot {
        bank_name: "First National".to_string(),
        account_number: "0001112223".to_string(),
        account_holder: "A. Freelancer".to_string(),
    }
}

/// Create an escrow and confirm its capture, returning the ACTIVE row
async fn funded_escrow(
    h: &Harness,
    client_id: Uuid,
    freelancer_id: Uuid,
    gross_amount: i64,
) -> Escrow {
    let created = h
        .escrow
        .create(CreateEscrowRequest {
            project_id: Uuid::new_v4(),
            client_id,
            freelancer_id,
            gross_amount,
        })
        .await
        .expect("create escrow");

    let result = h
        .escrow
        .apply_payment_confirmation(
            &created.escrow.external_order_id,
            Some(&format!("txn-{}", created.escrow.external_order_id)),
            PaymentOutcome::Captured,
        )
        .await
        .expect("apply capture");
    assert!(result.updated());

    result.escrow().clone()
}

#[tokio::test]
async fn scenario_a_release_credits_net_amount() {
    let h = harness();
    let client = Uuid::new_v4();
    let freelancer = Uuid::new_v4();

    let escrow = funded_escrow(&h, client, freelancer, 1_000_000).await;
    assert_eq!(escrow.platform_fee_amount, 100_000);
    assert_eq!(escrow.net_amount, 900_000);
    assert_eq!(escrow.status, EscrowStatus::Active);
    assert!(escrow.paid_at.is_some());

    let released = h
        .escrow
        .release(escrow.id, &Actor::Client(client))
        .await
        .expect("release");
    assert_eq!(released.status, EscrowStatus::Released);
    assert!(released.released_at.is_some());
    assert_eq!(released.released_amount, 900_000);

    assert_eq!(h.payouts.available_balance(freelancer).await, 900_000);
}

#[tokio::test]
async fn scenario_b_duplicate_webhook_applies_once() {
    let h = harness();
    let escrow = funded_escrow(&h, Uuid::new_v4(), Uuid::new_v4(), 500_000).await;
    let transaction_id = escrow.external_transaction_id.clone().expect("txn id");

    // The second delivery of the same notification is a successful no-op
    let second = h
        .escrow
        .apply_payment_confirmation(
            &escrow.external_order_id,
            Some(&transaction_id),
            PaymentOutcome::Captured,
        )
        .await
        .expect("second delivery");
    assert!(matches!(second, ConfirmationResult::AlreadyApplied(_)));
    assert_eq!(second.escrow().status, EscrowStatus::Active);
    assert_eq!(second.escrow().paid_at, escrow.paid_at);

    // Exactly one audit entry despite two deliveries
    assert_eq!(h.audit.for_action("escrow.activated").await.len(), 1);
}

#[tokio::test]
async fn scenario_c_payout_respects_available_balance() {
    let h = harness();
    let client = Uuid::new_v4();
    let freelancer = Uuid::new_v4();

    // 555,555 gross at 10% fee nets exactly 500,000
    let escrow = funded_escrow(&h, client, freelancer, 555_555).await;
    h.escrow
        .release(escrow.id, &Actor::Client(client))
        .await
        .expect("release");
    assert_eq!(h.payouts.available_balance(freelancer).await, 500_000);

    let err = h
        .payouts
        .request(freelancer, 600_000, bank())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let payout = h
        .payouts
        .request(freelancer, 400_000, bank())
        .await
        .expect("affordable payout");
    assert_eq!(payout.status, PayoutStatus::Requested);
    assert_eq!(h.payouts.available_balance(freelancer).await, 100_000);
}

#[tokio::test]
async fn scenario_d_bad_split_leaves_dispute_open() {
    let h = harness();
    let client = Uuid::new_v4();
    let freelancer = Uuid::new_v4();
    let admin = Actor::Admin(Uuid::new_v4());

    let escrow = funded_escrow(&h, client, freelancer, 1_000_000).await;
    h.escrow.mark_delivered(escrow.id).await.expect("delivered");

    let dispute = h
        .disputes
        .file(FileDisputeRequest {
            project_id: escrow.project_id,
            filed_by: Actor::Client(client),
            reason: DisputeReason::QualityRejected,
            description: "deliverable rejected".to_string(),
        })
        .await
        .expect("file dispute");

    // Sum is 100 short of the 900,000 net amount
    let err = h
        .disputes
        .resolve(
            dispute.id,
            &admin,
            DisputeOutcome::Split {
                freelancer_amount: 600_000,
                client_amount: 299_900,
            },
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let unchanged = h.disputes.dispute(dispute.id).await.expect("dispute");
    assert_eq!(unchanged.status, DisputeStatus::Open);
    assert!(unchanged.outcome.is_none());
    let frozen = h.store.escrow(escrow.id).await.expect("escrow");
    assert_eq!(frozen.status, EscrowStatus::Disputed);

    // A correct split settles the escrow and credits the freelancer share
    let resolved = h
        .disputes
        .resolve(
            dispute.id,
            &admin,
            DisputeOutcome::Split {
                freelancer_amount: 600_000,
                client_amount: 300_000,
            },
            Some("partial delivery".to_string()),
        )
        .await
        .expect("resolve");
    assert_eq!(resolved.status, DisputeStatus::Resolved);

    let settled = h.store.escrow(escrow.id).await.expect("escrow");
    assert_eq!(settled.status, EscrowStatus::Released);
    assert_eq!(settled.released_amount, 600_000);
    assert_eq!(h.payouts.available_balance(freelancer).await, 600_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_releases_credit_exactly_once() {
    let h = harness();
    let client = Uuid::new_v4();
    let freelancer = Uuid::new_v4();
    let escrow = funded_escrow(&h, client, freelancer, 1_000_000).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = h.escrow.clone();
        let actor = Actor::Client(client);
        let escrow_id = escrow.id;
        handles.push(tokio::spawn(async move {
            service.release(escrow_id, &actor).await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.expect("join") {
            Ok(released) => {
                successes += 1;
                assert_eq!(released.status, EscrowStatus::Released);
            }
            Err(EngineError::Conflict(_)) | Err(EngineError::Concurrency(_)) => {}
            Err(other) => panic!("unexpected error kind: {other}"),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(h.payouts.available_balance(freelancer).await, 900_000);
    assert_eq!(h.audit.for_action("escrow.released").await.len(), 1);

    let released = h.store.escrow(escrow.id).await.expect("escrow");
    assert_eq!(released.status, EscrowStatus::Released);
    assert!(released.released_at.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_payout_requests_never_overdraw() {
    let h = harness();
    let client = Uuid::new_v4();
    let freelancer = Uuid::new_v4();

    let escrow = funded_escrow(&h, client, freelancer, 555_555).await; // nets 500,000
    h.escrow
        .release(escrow.id, &Actor::Client(client))
        .await
        .expect("release");

    let mut handles = Vec::new();
    for _ in 0..4 {
        let service = h.payouts.clone();
        handles.push(tokio::spawn(async move {
            service.request(freelancer, 300_000, bank()).await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.expect("join") {
            Ok(_) => successes += 1,
            Err(EngineError::Conflict(_))
            | Err(EngineError::Concurrency(_))
            | Err(EngineError::Validation(_)) => {}
            Err(other) => panic!("unexpected error kind: {other}"),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(h.payouts.available_balance(freelancer).await, 200_000);

    let open: Vec<_> = h
        .payouts
        .history(freelancer)
        .await
        .into_iter()
        .filter(|p| p.status.is_open())
        .collect();
    assert_eq!(open.len(), 1);
}

#[tokio::test]
async fn poll_reconciliation_applies_missing_webhook() {
    let h = harness();
    let created = h
        .escrow
        .create(CreateEscrowRequest {
            project_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            freelancer_id: Uuid::new_v4(),
            gross_amount: 750_000,
        })
        .await
        .expect("create");
    let order_id = created.escrow.external_order_id.clone();

    h.processor
        .script_status(&order_id, None, PaymentOutcome::Pending)
        .await;
    let check = h.escrow.check_status(created.escrow.id).await.expect("poll");
    assert!(!check.updated);
    assert_eq!(check.escrow.status, EscrowStatus::PendingPayment);

    // Processor settles; the webhook never arrives, the poll reconciles
    h.processor
        .script_status(&order_id, Some("txn-poll"), PaymentOutcome::Captured)
        .await;
    let check = h.escrow.check_status(created.escrow.id).await.expect("poll");
    assert!(check.updated);
    assert_eq!(check.escrow.status, EscrowStatus::Active);

    // Polling again is a successful no-op
    let again = h.escrow.check_status(created.escrow.id).await.expect("poll");
    assert!(!again.updated);
    assert_eq!(again.escrow.status, EscrowStatus::Active);
}

#[tokio::test]
async fn expiry_cancels_pending_escrow_but_never_a_funded_one() {
    let h = harness();
    let created = h
        .escrow
        .create(CreateEscrowRequest {
            project_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            freelancer_id: Uuid::new_v4(),
            gross_amount: 250_000,
        })
        .await
        .expect("create");

    let result = h
        .escrow
        .apply_payment_confirmation(&created.escrow.external_order_id, None, PaymentOutcome::Expired)
        .await
        .expect("expiry");
    assert!(result.updated());
    assert_eq!(result.escrow().status, EscrowStatus::Cancelled);

    // A funded escrow ignores stale failure signals
    let funded = funded_escrow(&h, Uuid::new_v4(), Uuid::new_v4(), 250_000).await;
    let ignored = h
        .escrow
        .apply_payment_confirmation(&funded.external_order_id, None, PaymentOutcome::Expired)
        .await
        .expect("stale expiry");
    assert!(matches!(ignored, ConfirmationResult::NoChange(_)));
    assert_eq!(ignored.escrow().status, EscrowStatus::Active);
}

#[tokio::test]
async fn one_escrow_per_project_and_release_authority() {
    let h = harness();
    let client = Uuid::new_v4();
    let freelancer = Uuid::new_v4();
    let project = Uuid::new_v4();

    h.escrow
        .create(CreateEscrowRequest {
            project_id: project,
            client_id: client,
            freelancer_id: freelancer,
            gross_amount: 100_000,
        })
        .await
        .expect("first escrow");

    let err = h
        .escrow
        .create(CreateEscrowRequest {
            project_id: project,
            client_id: client,
            freelancer_id: freelancer,
            gross_amount: 100_000,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    let escrow = funded_escrow(&h, client, freelancer, 100_000).await;

    // Neither the freelancer nor an unrelated client may release
    let err = h
        .escrow
        .release(escrow.id, &Actor::Freelancer(freelancer))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    let err = h
        .escrow
        .release(escrow.id, &Actor::Client(Uuid::new_v4()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    // The system timeout path may
    let released = h
        .escrow
        .release(escrow.id, &Actor::System)
        .await
        .expect("system release");
    assert_eq!(released.status, EscrowStatus::Released);
}

#[tokio::test]
async fn payout_admin_lifecycle_and_authority() {
    let h = harness();
    let client = Uuid::new_v4();
    let freelancer = Uuid::new_v4();
    let admin = Actor::Admin(Uuid::new_v4());

    let escrow = funded_escrow(&h, client, freelancer, 1_000_000).await;
    h.escrow
        .release(escrow.id, &Actor::Client(client))
        .await
        .expect("release");

    let payout = h
        .payouts
        .request(freelancer, 500_000, bank())
        .await
        .expect("request");

    let err = h
        .payouts
        .process(payout.id, &Actor::Freelancer(freelancer))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let processing = h.payouts.process(payout.id, &admin).await.expect("process");
    assert_eq!(processing.status, PayoutStatus::Processing);
    assert!(processing.processed_at.is_some());

    // Too late for a freelancer cancel once processing started
    let err = h
        .payouts
        .cancel(payout.id, &Actor::Freelancer(freelancer))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    let completed = h.payouts.complete(payout.id, &admin).await.expect("complete");
    assert_eq!(completed.status, PayoutStatus::Completed);
    assert!(completed.completed_at.is_some());

    // Completed payouts stay deducted
    assert_eq!(h.payouts.available_balance(freelancer).await, 400_000);
    assert_eq!(h.audit.for_action("payout.processing").await.len(), 1);
    assert_eq!(h.audit.for_action("payout.completed").await.len(), 1);
}

#[tokio::test]
async fn failed_payout_returns_funds() {
    let h = harness();
    let client = Uuid::new_v4();
    let freelancer = Uuid::new_v4();
    let admin = Actor::Admin(Uuid::new_v4());

    let escrow = funded_escrow(&h, client, freelancer, 1_000_000).await;
    h.escrow
        .release(escrow.id, &Actor::Client(client))
        .await
        .expect("release");

    let payout = h
        .payouts
        .request(freelancer, 900_000, bank())
        .await
        .expect("request");
    h.payouts.process(payout.id, &admin).await.expect("process");
    assert_eq!(h.payouts.available_balance(freelancer).await, 0);

    let failed = h
        .payouts
        .fail(payout.id, &admin, "account closed")
        .await
        .expect("fail");
    assert_eq!(failed.status, PayoutStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("account closed"));

    assert_eq!(h.payouts.available_balance(freelancer).await, 900_000);
}

#[tokio::test]
async fn dispute_requires_active_or_delivered_and_resolves_once() {
    let h = harness();
    let client = Uuid::new_v4();
    let freelancer = Uuid::new_v4();
    let admin = Actor::Admin(Uuid::new_v4());

    // Filing against a pending escrow is rejected
    let created = h
        .escrow
        .create(CreateEscrowRequest {
            project_id: Uuid::new_v4(),
            client_id: client,
            freelancer_id: freelancer,
            gross_amount: 300_000,
        })
        .await
        .expect("create");
    let err = h
        .disputes
        .file(FileDisputeRequest {
            project_id: created.escrow.project_id,
            filed_by: Actor::Client(client),
            reason: DisputeReason::WorkNotDelivered,
            description: "nothing delivered".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    // Refund resolution empties the freelancer's claim
    let escrow = funded_escrow(&h, client, freelancer, 300_000).await;
    let dispute = h
        .disputes
        .file(FileDisputeRequest {
            project_id: escrow.project_id,
            filed_by: Actor::Freelancer(freelancer),
            reason: DisputeReason::Unresponsive,
            description: "client unreachable".to_string(),
        })
        .await
        .expect("file");

    // The frozen escrow can no longer be released directly
    let err = h
        .escrow
        .release(escrow.id, &Actor::Client(client))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    let resolved = h
        .disputes
        .resolve(dispute.id, &admin, DisputeOutcome::RefundToClient, None)
        .await
        .expect("resolve");
    assert_eq!(resolved.status, DisputeStatus::Resolved);
    assert_eq!(resolved.outcome, Some(DisputeOutcome::RefundToClient));

    let refunded = h.store.escrow(escrow.id).await.expect("escrow");
    assert_eq!(refunded.status, EscrowStatus::Refunded);
    assert_eq!(refunded.released_amount, 0);
    assert_eq!(h.payouts.available_balance(freelancer).await, 0);

    // Resolution is terminal
    let err = h
        .disputes
        .resolve(
            dispute.id,
            &admin,
            DisputeOutcome::ReleaseToFreelancer,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
    let unchanged = h.disputes.dispute(dispute.id).await.expect("dispute");
    assert_eq!(unchanged.outcome, Some(DisputeOutcome::RefundToClient));
}

#[tokio::test]
async fn confirmation_is_idempotent_across_paths() {
    let h = harness();
    let created = h
        .escrow
        .create(CreateEscrowRequest {
            project_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            freelancer_id: Uuid::new_v4(),
            gross_amount: 820_000,
        })
        .await
        .expect("create");
    let order_id = created.escrow.external_order_id.clone();

    // Webhook applies first
    let first = h
        .escrow
        .apply_payment_confirmation(&order_id, Some("txn-1"), PaymentOutcome::Captured)
        .await
        .expect("webhook");
    assert!(first.updated());

    // A racing poll for the same transaction observes the post-condition
    h.processor
        .script_status(&order_id, Some("txn-1"), PaymentOutcome::Captured)
        .await;
    let check = h.escrow.check_status(created.escrow.id).await.expect("poll");
    assert!(!check.updated);
    assert_eq!(check.escrow.status, EscrowStatus::Active);

    // A capture under a different transaction id is refused loudly
    let err = h
        .escrow
        .apply_payment_confirmation(&order_id, Some("txn-2"), PaymentOutcome::Captured)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
}
