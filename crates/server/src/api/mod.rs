//! JSON handlers over the coordinator. Every failure is answered with an
//! `ApiError` body and a status derived from its code.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use control_api::{CommandOutcome, CoordinatorError};
use serde::{Deserialize, Serialize};
use shared::{
    domain::{
        ImageDirection, ItemId, ItemOverrides, ProductId, SessionCursor, SessionId, SessionItem,
        SessionSummary,
    },
    error::{ApiError, ErrorCode},
    protocol::ProducerCommand,
};
use tracing::{error, warn};

use crate::app_state::AppState;

pub(crate) mod ws;

pub(crate) type Rejection = (StatusCode, Json<ApiError>);
type ApiResult<T> = Result<Json<T>, Rejection>;

#[derive(Debug, Deserialize)]
pub(crate) struct CreateSessionRequest {
    title: String,
    #[serde(default)]
    product_ids: Vec<ProductId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CreateSessionResponse {
    pub(crate) session: SessionSummary,
    pub(crate) items: Vec<SessionItem>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AddItemRequest {
    product_id: ProductId,
    #[serde(default)]
    position: Option<i64>,
    #[serde(default)]
    overrides: ItemOverrides,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SwapRequest {
    item_a: ItemId,
    item_b: ItemId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JumpRequest {
    position: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CycleImageRequest {
    direction: ImageDirection,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OverlayRequest {
    text: String,
    color: String,
}

pub(crate) fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCode::InvalidPosition
        | ErrorCode::EndOfSession
        | ErrorCode::StartOfSession
        | ErrorCode::NoImages
        | ErrorCode::NoProducts
        | ErrorCode::DifferentSessions => StatusCode::CONFLICT,
        ErrorCode::Busy => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn reject(err: CoordinatorError) -> Rejection {
    match &err {
        CoordinatorError::Store(_) => error!(error = %err, "request failed in storage"),
        CoordinatorError::StoreBusy(_) => warn!(error = %err, "storage lock wait expired"),
        _ => {}
    }
    let api_error = ApiError::from(err);
    (status_for(api_error.code), Json(api_error))
}

fn internal(err: anyhow::Error) -> Rejection {
    reject(CoordinatorError::from(err))
}

pub(crate) async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), Rejection> {
    let (session, items) = state
        .coordinator
        .create_session(&req.title, &req.product_ids)
        .await
        .map_err(reject)?;
    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse { session, items }),
    ))
}

pub(crate) async fn list_sessions(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<SessionSummary>> {
    let sessions = state
        .coordinator
        .storage()
        .list_sessions()
        .await
        .map_err(internal)?;
    Ok(Json(sessions))
}

pub(crate) async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<i64>,
) -> Result<StatusCode, Rejection> {
    state
        .coordinator
        .delete_session(SessionId(session_id))
        .await
        .map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn list_items(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<i64>,
) -> ApiResult<Vec<SessionItem>> {
    let items = state
        .coordinator
        .list_items(SessionId(session_id))
        .await
        .map_err(reject)?;
    Ok(Json(items))
}

pub(crate) async fn add_item(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<i64>,
    Json(req): Json<AddItemRequest>,
) -> Result<(StatusCode, Json<SessionItem>), Rejection> {
    let item = state
        .coordinator
        .add_item(
            SessionId(session_id),
            req.product_id,
            req.position,
            req.overrides,
        )
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(item)))
}

pub(crate) async fn remove_item(
    State(state): State<Arc<AppState>>,
    Path(item_id): Path<i64>,
) -> ApiResult<Vec<SessionItem>> {
    let items = state
        .coordinator
        .remove_item(ItemId(item_id))
        .await
        .map_err(reject)?;
    Ok(Json(items))
}

pub(crate) async fn swap_items(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SwapRequest>,
) -> ApiResult<Vec<SessionItem>> {
    let items = state
        .coordinator
        .swap_positions(req.item_a, req.item_b)
        .await
        .map_err(reject)?;
    Ok(Json(items))
}

pub(crate) async fn get_cursor(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<i64>,
) -> ApiResult<SessionCursor> {
    let cursor = state
        .coordinator
        .current_cursor(SessionId(session_id))
        .await
        .map_err(reject)?;
    Ok(Json(cursor))
}

pub(crate) async fn initialize_cursor(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<i64>,
) -> ApiResult<SessionCursor> {
    let cursor = state
        .coordinator
        .initialize_cursor(SessionId(session_id))
        .await
        .map_err(reject)?;
    Ok(Json(cursor))
}

pub(crate) async fn jump_to_product(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<i64>,
    Json(req): Json<JumpRequest>,
) -> ApiResult<SessionCursor> {
    let cursor = state
        .coordinator
        .jump_to_product(SessionId(session_id), req.position)
        .await
        .map_err(reject)?;
    Ok(Json(cursor))
}

pub(crate) async fn advance_to_next(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<i64>,
) -> ApiResult<SessionCursor> {
    let cursor = state
        .coordinator
        .advance_to_next(SessionId(session_id))
        .await
        .map_err(reject)?;
    Ok(Json(cursor))
}

pub(crate) async fn go_to_previous(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<i64>,
) -> ApiResult<SessionCursor> {
    let cursor = state
        .coordinator
        .go_to_previous(SessionId(session_id))
        .await
        .map_err(reject)?;
    Ok(Json(cursor))
}

pub(crate) async fn cycle_image(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<i64>,
    Json(req): Json<CycleImageRequest>,
) -> ApiResult<SessionCursor> {
    let cursor = state
        .coordinator
        .cycle_image(SessionId(session_id), req.direction)
        .await
        .map_err(reject)?;
    Ok(Json(cursor))
}

pub(crate) async fn set_overlay(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<i64>,
    Json(req): Json<OverlayRequest>,
) -> ApiResult<SessionCursor> {
    let cursor = state
        .coordinator
        .set_overlay_message(SessionId(session_id), &req.text, &req.color)
        .await
        .map_err(reject)?;
    Ok(Json(cursor))
}

pub(crate) async fn clear_overlay(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<i64>,
) -> ApiResult<SessionCursor> {
    let cursor = state
        .coordinator
        .clear_overlay_message(SessionId(session_id))
        .await
        .map_err(reject)?;
    Ok(Json(cursor))
}

pub(crate) async fn apply_command(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<i64>,
    Json(command): Json<ProducerCommand>,
) -> ApiResult<CommandOutcome> {
    let outcome = state
        .coordinator
        .apply(SessionId(session_id), command)
        .await
        .map_err(reject)?;
    Ok(Json(outcome))
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
