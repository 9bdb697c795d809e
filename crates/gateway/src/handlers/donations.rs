//! Donation queue handlers
//!
//! Admin-only routes check the role before touching the engine; member
//! routes act on the caller's own queue entry only.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use t513_common::{
    auth::AuthContext,
    donation::{DonationStatus, QueueEntryView, Standing},
    errors::{AppError, Result},
};

/// Start session response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionResponse {
    pub session_id: Uuid,
    pub start_time: DateTime<Utc>,
}

/// Generate code response
#[derive(Serialize)]
pub struct CodeResponse {
    pub code: String,
}

/// Pause request
#[derive(Debug, Deserialize)]
pub struct PauseRequest {
    pub paused: bool,
}

/// Redeem request. Codes are six characters; the bound leaves room for
/// surrounding whitespace and rejects oversized bodies before any query.
#[derive(Debug, Deserialize, Validate)]
pub struct RedeemRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 16))]
    pub code: String,
}

/// Join queue response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinQueueResponse {
    pub entry_id: Uuid,
    pub joined_at: DateTime<Utc>,
}

/// Final standings
#[derive(Serialize)]
pub struct StandingsResponse {
    pub standings: Vec<Standing>,
}

/// Open a donation session
pub async fn start_session(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<(StatusCode, Json<StartSessionResponse>)> {
    auth.require_admin()?;

    let donation = state.engine.start_session().await?;

    tracing::info!(
        session_id = %donation.id,
        admin = %auth.nickname,
        "Donation session opened"
    );

    Ok((StatusCode::CREATED, Json(StartSessionResponse {
        session_id: donation.id,
        start_time: donation.start_time.with_timezone(&Utc),
    })))
}

/// Issue a new redemption code
pub async fn generate_code(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<CodeResponse>> {
    auth.require_admin()?;

    let code = state.engine.generate_code().await?;
    Ok(Json(CodeResponse { code }))
}

/// Pause or resume new joins
pub async fn pause_queue(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<PauseRequest>,
) -> Result<StatusCode> {
    auth.require_admin()?;

    state.engine.pause_queue(request.paused).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Join the queue as the caller
pub async fn join_queue(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<(StatusCode, Json<JoinQueueResponse>)> {
    let entry = state.engine.join_queue(auth.user_id).await?;

    Ok((StatusCode::CREATED, Json(JoinQueueResponse {
        entry_id: entry.id,
        joined_at: entry.joined_at.with_timezone(&Utc),
    })))
}

/// Leave the queue as the caller
pub async fn leave_queue(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<StatusCode> {
    state.engine.leave_queue(auth.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Redeem the active code
pub async fn redeem_code(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<RedeemRequest>,
) -> Result<StatusCode> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: Some("code".to_string()),
    })?;

    state.engine.redeem_code(auth.user_id, &request.code).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Stop the queue and return the frozen standings
pub async fn stop_queue(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<StandingsResponse>> {
    auth.require_admin()?;

    let standings = state.engine.stop_queue().await?;
    Ok(Json(StandingsResponse { standings }))
}

/// End the session
pub async fn end_session(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<StandingsResponse>> {
    auth.require_admin()?;

    let standings = state.engine.end_session().await?;
    Ok(Json(StandingsResponse { standings }))
}

/// Public status, polled by every client
pub async fn status(State(state): State<AppState>) -> Result<Json<DonationStatus>> {
    let status = state.engine.status().await?;
    Ok(Json(status.without_code()))
}

/// Status including the redemption code
pub async fn admin_status(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<DonationStatus>> {
    auth.require_admin()?;

    let status = state.engine.status().await?;
    Ok(Json(status))
}

/// The caller's own queue entry, or null
pub async fn my_entry(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<Option<QueueEntryView>>> {
    let entry = state.engine.my_entry(auth.user_id).await?;
    Ok(Json(entry))
}
