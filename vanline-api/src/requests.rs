use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vanline_core::auth::ensure_can_manage_load;
use vanline_core::repository::LedgerStore;
use vanline_core::{LoadRequest, ProposedDates, RequestStatus, RequestType};

use crate::error::ApiError;
use crate::loads::{actor, LoadResponse};
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct RequestResponse {
    pub id: Uuid,
    pub load_id: Uuid,
    pub carrier_id: Uuid,
    pub status: RequestStatus,
    pub request_type: RequestType,
    pub offered_rate: Option<f64>,
    pub proposed_dates: ProposedDates,
    pub note: Option<String>,
    pub decline_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<LoadRequest> for RequestResponse {
    fn from(request: LoadRequest) -> Self {
        Self {
            id: request.id,
            load_id: request.load_id,
            carrier_id: request.carrier_id,
            status: request.status,
            request_type: request.request_type,
            offered_rate: request.offered_rate,
            proposed_dates: request.proposed_dates,
            note: request.note,
            decline_reason: request.decline_reason,
            created_at: request.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequestBody {
    pub request_type: RequestType,
    pub offered_rate: Option<f64>,
    #[serde(default)]
    pub proposed_dates: ProposedDates,
    pub note: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AcceptResponse {
    pub request: RequestResponse,
    pub load: LoadResponse,
    pub declined_request_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct DeclineRequestBody {
    pub reason: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn submit_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(load_id): Path<Uuid>,
    Json(body): Json<SubmitRequestBody>,
) -> Result<(StatusCode, Json<RequestResponse>), ApiError> {
    let carrier = actor(&headers)?;
    let request = state
        .negotiation
        .submit_request(
            carrier,
            load_id,
            body.request_type,
            body.offered_rate,
            body.proposed_dates,
            body.note,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(request.into())))
}

pub async fn list_requests(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(load_id): Path<Uuid>,
) -> Result<Json<Vec<RequestResponse>>, ApiError> {
    let actor = actor(&headers)?;
    let load = state.store.load(load_id).await?;
    ensure_can_manage_load(actor, &load)?;
    let requests = state.store.requests_for_load(load_id).await?;
    Ok(Json(requests.into_iter().map(Into::into).collect()))
}

pub async fn accept_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
) -> Result<Json<AcceptResponse>, ApiError> {
    let actor = actor(&headers)?;
    let outcome = state.negotiation.accept_request(actor, request_id).await?;
    Ok(Json(AcceptResponse {
        request: outcome.request.into(),
        load: outcome.load.into(),
        declined_request_ids: outcome.declined.iter().map(|r| r.id).collect(),
    }))
}

pub async fn decline_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
    Json(body): Json<DeclineRequestBody>,
) -> Result<Json<RequestResponse>, ApiError> {
    let actor = actor(&headers)?;
    let request = state
        .negotiation
        .decline_request(actor, request_id, body.reason)
        .await?;
    Ok(Json(request.into()))
}

pub async fn withdraw_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
) -> Result<Json<RequestResponse>, ApiError> {
    let carrier = actor(&headers)?;
    let request = state
        .negotiation
        .withdraw_request(carrier, request_id)
        .await?;
    Ok(Json(request.into()))
}
