// 🌐 HTTP API - the chat commands as JSON endpoints
//
// A chat front-end (or any trusted adapter) posts the actor it authenticated
// together with each command. Responses use one wrapper:
//   { "success": bool, "data": ..., "error": "..." }

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::commands::{Actor, CommandService, Outcome, RosterEntry};
use crate::error::{LedgerError, LedgerResult};
use crate::period::PeriodId;
use crate::rates::SharedRate;
use crate::scheduler::{Reminder, ReminderFeed};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub commands: CommandService,
    pub feed: ReminderFeed,
    pub rate: SharedRate,
}

/// API Response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Outcome plus its plain-text rendering
#[derive(Debug, Serialize)]
pub struct CommandReply {
    pub message: String,
    pub outcome: Outcome,
}

impl From<Outcome> for CommandReply {
    fn from(outcome: Outcome) -> Self {
        CommandReply {
            message: outcome.to_string(),
            outcome,
        }
    }
}

fn status_code(error: &LedgerError) -> StatusCode {
    match error {
        LedgerError::InvalidDueDay(_) => StatusCode::BAD_REQUEST,
        LedgerError::NotFound { .. } => StatusCode::NOT_FOUND,
        LedgerError::Link(_) => StatusCode::CONFLICT,
        LedgerError::Unauthorized { .. } => StatusCode::FORBIDDEN,
        LedgerError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
        LedgerError::RateUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn reply(result: LedgerResult<Outcome>) -> Response {
    match result {
        Ok(outcome) => (StatusCode::OK, Json(ApiResponse::ok(CommandReply::from(outcome)))).into_response(),
        Err(e) => {
            let status = status_code(&e);
            if status.is_server_error() {
                warn!(error = %e, "command failed");
            }
            (status, Json(ApiResponse::<()>::err(e.to_string()))).into_response()
        }
    }
}

// ============================================================================
// Request bodies
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    pub actor: Actor,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
pub struct LinkRequest {
    pub actor: Actor,
    pub primary: String,
    pub secondary: String,
}

#[derive(Debug, Deserialize)]
pub struct DueDayRequest {
    pub actor: Actor,
    pub day: u32,
}

#[derive(Debug, Deserialize)]
pub struct AutoPayRequest {
    pub actor: Actor,
    pub member_id: String,
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct MarkPaidRequest {
    pub actor: Actor,
    pub member_id: String,
    #[serde(default)]
    pub period: Option<PeriodId>,
}

#[derive(Debug, Deserialize)]
pub struct RateRequest {
    pub actor: Actor,
    /// `null` clears the quote
    pub rate: Option<f64>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/status - Everyone's status for the active period
async fn get_status(State(state): State<AppState>) -> Response {
    reply(Ok(state.commands.query_status()))
}

/// GET /api/history/:id - Payment history of a member (aliases resolved)
async fn get_history(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    reply(state.commands.query_history(&id))
}

/// GET /api/price - Price breakdown and payment instructions
async fn get_price(State(state): State<AppState>) -> Response {
    price_reply(state.commands).await
}

/// The live quote is a blocking HTTP call; keep it off the async workers
async fn price_reply(commands: CommandService) -> Response {
    match tokio::task::spawn_blocking(move || commands.show_price()).await {
        Ok(outcome) => reply(Ok(outcome)),
        Err(e) => {
            warn!(error = %e, "price lookup task failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ApiResponse::<()>::err("price lookup failed"))).into_response()
        }
    }
}

/// POST /api/payments - Register the actor's payment
async fn register_payment(State(state): State<AppState>, Json(req): Json<ActorRequest>) -> Response {
    reply(state.commands.register_payment(&req.actor))
}

/// DELETE /api/payments - Undo the actor's payment
async fn unregister_payment(State(state): State<AppState>, Json(req): Json<ActorRequest>) -> Response {
    reply(state.commands.unregister_payment(&req.actor))
}

/// POST /api/members - Enroll a member for the active period
async fn add_member(State(state): State<AppState>, Json(req): Json<AddMemberRequest>) -> Response {
    reply(state.commands.add_member(&req.id, &req.display_name))
}

/// DELETE /api/members/:id - Remove a member (admin)
async fn remove_member(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ActorRequest>,
) -> Response {
    reply(state.commands.remove_member(&req.actor, &id))
}

/// POST /api/links - Bill a secondary account under a primary (admin)
async fn link_accounts(State(state): State<AppState>, Json(req): Json<LinkRequest>) -> Response {
    reply(state.commands.link_accounts(&req.actor, &req.primary, &req.secondary))
}

/// PUT /api/config/due-day - Change the payment day (admin)
async fn set_due_day(State(state): State<AppState>, Json(req): Json<DueDayRequest>) -> Response {
    reply(state.commands.set_due_day(&req.actor, req.day))
}

/// PUT /api/auto-pay - Toggle auto-pay for a member (admin)
async fn set_auto_pay(State(state): State<AppState>, Json(req): Json<AutoPayRequest>) -> Response {
    reply(state.commands.set_auto_pay(&req.actor, &req.member_id, req.enabled))
}

/// POST /api/admin/mark-paid - Mark someone else paid (admin)
async fn mark_paid(State(state): State<AppState>, Json(req): Json<MarkPaidRequest>) -> Response {
    reply(state.commands.mark_paid_admin(&req.actor, &req.member_id, req.period))
}

/// POST /api/roster - Enroll the chat's member list
async fn sync_roster(State(state): State<AppState>, Json(roster): Json<Vec<RosterEntry>>) -> Response {
    reply(state.commands.sync_roster(&roster))
}

/// POST /api/proofs/:actor - Upload a payment proof (raw body)
async fn submit_proof(State(state): State<AppState>, Path(actor_id): Path<String>, body: Bytes) -> Response {
    if body.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(ApiResponse::<()>::err("empty proof"))).into_response();
    }
    let actor = Actor::member(actor_id.clone(), actor_id);
    reply(state.commands.submit_proof(&actor, &body))
}

/// GET /api/reminders - Recently delivered reminders
async fn get_reminders(State(state): State<AppState>) -> Json<ApiResponse<Vec<Reminder>>> {
    Json(ApiResponse::ok(state.feed.recent()))
}

/// PUT /api/rate - Push a USD exchange rate (admin)
async fn set_rate(State(state): State<AppState>, Json(req): Json<RateRequest>) -> Response {
    if !req.actor.is_admin {
        let e = LedgerError::unauthorized(&req.actor.id, "update the exchange rate");
        return (status_code(&e), Json(ApiResponse::<()>::err(e.to_string()))).into_response();
    }
    match state.rate.set(req.rate) {
        Ok(()) => price_reply(state.commands).await,
        Err(e) => (StatusCode::BAD_REQUEST, Json(ApiResponse::<()>::err(e.to_string()))).into_response(),
    }
}

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/status", get(get_status))
        .route("/history/:id", get(get_history))
        .route("/price", get(get_price))
        .route("/payments", post(register_payment).delete(unregister_payment))
        .route("/members", post(add_member))
        .route("/members/:id", delete(remove_member))
        .route("/links", post(link_accounts))
        .route("/config/due-day", put(set_due_day))
        .route("/auto-pay", put(set_auto_pay))
        .route("/admin/mark-paid", post(mark_paid))
        .route("/roster", post(sync_roster))
        .route("/proofs/:actor", post(submit_proof))
        .route("/reminders", get(get_reminders))
        .route("/rate", put(set_rate))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

// ============================================================================
// TESTS
// ============================================================================
