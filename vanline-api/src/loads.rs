use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vanline_core::auth::ensure_can_operate_load;
use vanline_core::repository::LedgerStore;
use vanline_core::{Load, LoadDraft, LoadStatus, PostingStatus, PostingType};
use vanline_shared::Masked;

use crate::error::ApiError;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct LoadResponse {
    pub id: Uuid,
    pub company_id: Uuid,
    pub posted_by_company_id: Option<Uuid>,
    pub posting_status: PostingStatus,
    pub visible: bool,
    pub posting_type: Option<PostingType>,
    pub posted_at: Option<DateTime<Utc>>,
    pub status: LoadStatus,
    pub origin_city: Option<String>,
    pub destination_city: Option<String>,
    pub cubic_feet: Option<f64>,
    pub weight_lbs: Option<f64>,
    pub rate: Option<f64>,
    pub rate_negotiable: bool,
    pub agreed_rate: Option<f64>,
    pub rfd_date: Option<NaiveDate>,
    pub assigned_carrier_id: Option<Uuid>,
    pub assigned_driver_id: Option<Uuid>,
    pub assigned_driver_name: Option<String>,
    pub assigned_driver_phone: Option<Masked<String>>,
    pub assigned_truck_id: Option<Uuid>,
    pub assigned_trailer_id: Option<Uuid>,
    pub delivery_order: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl From<Load> for LoadResponse {
    fn from(load: Load) -> Self {
        Self {
            id: load.id,
            company_id: load.company_id,
            posted_by_company_id: load.posted_by_company_id,
            posting_status: load.posting_status,
            visible: load.visible,
            posting_type: load.posting_type,
            posted_at: load.posted_at,
            status: load.status,
            origin_city: load.origin_city,
            destination_city: load.destination_city,
            cubic_feet: load.cubic_feet,
            weight_lbs: load.weight_lbs,
            rate: load.rate,
            rate_negotiable: load.rate_negotiable,
            agreed_rate: load.agreed_rate,
            rfd_date: load.rfd_date,
            assigned_carrier_id: load.assigned_carrier_id,
            assigned_driver_id: load.assigned_driver_id,
            assigned_driver_name: load.assigned_driver_name,
            assigned_driver_phone: load.assigned_driver_phone.map(Masked),
            assigned_truck_id: load.assigned_truck_id,
            assigned_trailer_id: load.assigned_trailer_id,
            delivery_order: load.delivery_order,
            created_at: load.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PostLoadRequest {
    pub posting_type: PostingType,
}

#[derive(Debug, Deserialize)]
pub struct AdvanceStatusRequest {
    pub status: LoadStatus,
}

#[derive(Debug, Deserialize)]
pub struct CancelAssignmentRequest {
    pub acting_owner_id: Uuid,
    pub reason_code: String,
    pub note: Option<String>,
    #[serde(default)]
    pub repost_to_marketplace: bool,
}

/// Acting company, from the pre-authenticated `x-company-id` header.
pub fn actor(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    headers
        .get("x-company-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value).ok())
        .ok_or_else(|| ApiError::auth("missing or invalid x-company-id header"))
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn create_load(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(draft): Json<LoadDraft>,
) -> Result<(StatusCode, Json<LoadResponse>), ApiError> {
    let actor = actor(&headers)?;
    let load = state.lifecycle.create_load(actor, draft).await?;
    Ok((StatusCode::CREATED, Json(load.into())))
}

pub async fn get_load(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(load_id): Path<Uuid>,
) -> Result<Json<LoadResponse>, ApiError> {
    let actor = actor(&headers)?;
    let load = state.store.load(load_id).await?;
    ensure_can_operate_load(actor, &load)?;
    Ok(Json(load.into()))
}

pub async fn post_load(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(load_id): Path<Uuid>,
    Json(body): Json<PostLoadRequest>,
) -> Result<Json<LoadResponse>, ApiError> {
    let actor = actor(&headers)?;
    let load = state
        .lifecycle
        .post_to_marketplace(actor, load_id, body.posting_type)
        .await?;
    Ok(Json(load.into()))
}

pub async fn unpost_load(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(load_id): Path<Uuid>,
) -> Result<Json<LoadResponse>, ApiError> {
    let actor = actor(&headers)?;
    let load = state
        .lifecycle
        .unpost_from_marketplace(actor, load_id)
        .await?;
    Ok(Json(load.into()))
}

pub async fn advance_load_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(load_id): Path<Uuid>,
    Json(body): Json<AdvanceStatusRequest>,
) -> Result<Json<LoadResponse>, ApiError> {
    let actor = actor(&headers)?;
    let load = state
        .lifecycle
        .advance_status(actor, load_id, body.status)
        .await?;
    Ok(Json(load.into()))
}

pub async fn cancel_assignment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(load_id): Path<Uuid>,
    Json(body): Json<CancelAssignmentRequest>,
) -> Result<Json<LoadResponse>, ApiError> {
    let actor = actor(&headers)?;
    let outcome = state
        .cancellation
        .cancel_carrier_assignment(
            actor,
            body.acting_owner_id,
            load_id,
            body.reason_code,
            body.note,
            body.repost_to_marketplace,
        )
        .await?;
    Ok(Json(outcome.load.into()))
}
