//! REST surface for the settlement engine
//!
//! Collaborator-facing routes plus the inbound payment-processor webhook.
//! Handlers stay thin: extract the actor, deserialize the body, call the
//! engine, map the result.

use crate::error::ApiError;
use crate::extract::ActorIdentity;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use settlement_engine::disputes::FileDisputeRequest;
use settlement_engine::escrow::CreateEscrowRequest;
use settlement_engine::gateway::PaymentNotification;
use settlement_engine::models::{Actor, DisputeOutcome, DisputeReason};
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/escrow/create", post(create_escrow))
        .route("/escrow/:id/check-status", get(check_escrow_status))
        .route("/escrow/:id/release", post(release_escrow))
        .route("/escrow/project/:project_id", get(escrow_for_project))
        .route("/payouts/request", post(request_payout))
        .route("/payouts/balance", get(payout_balance))
        .route("/payouts/:id/cancel", put(cancel_payout))
        .route("/payouts/:id/process", put(process_payout))
        .route("/payouts/:id/complete", put(complete_payout))
        .route("/payouts/:id/fail", put(fail_payout))
        .route("/disputes", post(file_dispute))
        .route("/disputes/:id/resolve", put(resolve_dispute))
        .route("/payments/notification", post(payment_notification))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---- escrow ----

#[derive(Debug, Deserialize)]
struct CreateEscrowBody {
    project_id: Uuid,
    freelancer_id: Uuid,
    gross_amount: i64,
}

async fn create_escrow(
    State(state): State<AppState>,
    ActorIdentity(actor): ActorIdentity,
    Json(body): Json<CreateEscrowBody>,
) -> Result<Json<Value>, ApiError> {
    let client_id = match actor {
        Actor::Client(id) => id,
        _ => return Err(ApiError::Unauthorized("escrow creation is a client action")),
    };

    let checkout = state
        .escrow
        .create(CreateEscrowRequest {
            project_id: body.project_id,
            client_id,
            freelancer_id: body.freelancer_id,
            gross_amount: body.gross_amount,
        })
        .await?;

    Ok(Json(json!({
        "escrow": checkout.escrow,
        "checkout_token": checkout.checkout,
    })))
}

async fn check_escrow_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let check = state.escrow.check_status(id).await?;
    Ok(Json(json!({
        "status": check.escrow.status,
        "updated": check.updated,
    })))
}

async fn release_escrow(
    State(state): State<AppState>,
    ActorIdentity(actor): ActorIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let escrow = state.escrow.release(id, &actor).await?;
    Ok(Json(json!({ "escrow": escrow })))
}

async fn escrow_for_project(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let escrow = state.store.current_escrow_for_project(project_id).await;
    Ok(Json(json!({ "escrow": escrow })))
}

// ---- payouts ----

#[derive(Debug, Deserialize)]
struct RequestPayoutBody {
    amount: i64,
    bank_name: String,
    account_number: String,
    account_holder: String,
}

async fn request_payout(
    State(state): State<AppState>,
    ActorIdentity(actor): ActorIdentity,
    Json(body): Json<RequestPayoutBody>,
) -> Result<Json<Value>, ApiError> {
    let freelancer_id = match actor {
        Actor::Freelancer(id) => id,
        _ => return Err(ApiError::Unauthorized("payouts are a freelancer action")),
    };

    let payout = state
        .payouts
        .request(
            freelancer_id,
            body.amount,
            settlement_engine::models::BankSnapshot {
                bank_name: body.bank_name,
                account_number: body.account_number,
                account_holder: body.account_holder,
            },
        )
        .await?;

    Ok(Json(json!({ "payout": payout })))
}

async fn payout_balance(
    State(state): State<AppState>,
    ActorIdentity(actor): ActorIdentity,
) -> Result<Json<Value>, ApiError> {
    let freelancer_id = match actor {
        Actor::Freelancer(id) => id,
        _ => return Err(ApiError::Unauthorized("balance is a freelancer view")),
    };

    let available = state.payouts.available_balance(freelancer_id).await;
    Ok(Json(json!({ "available_balance": available })))
}

async fn cancel_payout(
    State(state): State<AppState>,
    ActorIdentity(actor): ActorIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let payout = state.payouts.cancel(id, &actor).await?;
    Ok(Json(json!({ "payout": payout })))
}

async fn process_payout(
    State(state): State<AppState>,
    ActorIdentity(actor): ActorIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let payout = state.payouts.process(id, &actor).await?;
    Ok(Json(json!({ "payout": payout })))
}

async fn complete_payout(
    State(state): State<AppState>,
    ActorIdentity(actor): ActorIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let payout = state.payouts.complete(id, &actor).await?;
    Ok(Json(json!({ "payout": payout })))
}

#[derive(Debug, Deserialize)]
struct FailPayoutBody {
    reason: String,
}

async fn fail_payout(
    State(state): State<AppState>,
    ActorIdentity(actor): ActorIdentity,
    Path(id): Path<Uuid>,
    Json(body): Json<FailPayoutBody>,
) -> Result<Json<Value>, ApiError> {
    let payout = state.payouts.fail(id, &actor, &body.reason).await?;
    Ok(Json(json!({ "payout": payout })))
}

// ---- disputes ----

#[derive(Debug, Deserialize)]
struct FileDisputeBody {
    project_id: Uuid,
    reason: DisputeReason,
    description: String,
}

async fn file_dispute(
    State(state): State<AppState>,
    ActorIdentity(actor): ActorIdentity,
    Json(body): Json<FileDisputeBody>,
) -> Result<Json<Value>, ApiError> {
    let dispute = state
        .disputes
        .file(FileDisputeRequest {
            project_id: body.project_id,
            filed_by: actor,
            reason: body.reason,
            description: body.description,
        })
        .await?;

    Ok(Json(json!({ "dispute": dispute })))
}

#[derive(Debug, Deserialize)]
struct ResolveDisputeBody {
    outcome: DisputeOutcome,
    #[serde(default)]
    resolution_notes: Option<String>,
}

async fn resolve_dispute(
    State(state): State<AppState>,
    ActorIdentity(actor): ActorIdentity,
    Path(id): Path<Uuid>,
    Json(body): Json<ResolveDisputeBody>,
) -> Result<Json<Value>, ApiError> {
    let dispute = state
        .disputes
        .resolve(id, &actor, body.outcome, body.resolution_notes)
        .await?;

    Ok(Json(json!({ "dispute": dispute })))
}

// ---- processor webhook ----

async fn payment_notification(
    State(state): State<AppState>,
    Json(notification): Json<PaymentNotification>,
) -> Result<Json<Value>, ApiError> {
    // Verification failures become a bare 403 via the error mapping
    let snapshot = state.verifier.verify(&notification)?;

    let result = state
        .escrow
        .apply_payment_confirmation(
            &snapshot.order_id,
            snapshot.transaction_id.as_deref(),
            snapshot.outcome,
        )
        .await?;

    info!(
        order_id = %snapshot.order_id,
        updated = result.updated(),
        "processed payment notification"
    );

    Ok(Json(json!({
        "status": "ok",
        "escrow_status": result.escrow().status,
        "updated": result.updated(),
    })))
}
