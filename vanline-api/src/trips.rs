use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vanline_core::auth::ensure_can_manage_trip;
use vanline_core::repository::LedgerStore;
use vanline_core::{
    PaidBy, PayTerms, StopRole, Trip, TripDraft, TripExpense, TripLoad, TripStatus, TruckKind,
};
use vanline_shared::Masked;

use crate::error::ApiError;
use crate::loads::{actor, LoadResponse};
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct TripResponse {
    pub id: Uuid,
    pub company_id: Uuid,
    pub trip_number: String,
    pub status: TripStatus,
    pub driver_id: Option<Uuid>,
    pub driver_name: Option<String>,
    pub driver_phone: Option<Masked<String>>,
    pub truck_id: Option<Uuid>,
    pub truck_kind: Option<TruckKind>,
    pub trailer_id: Option<Uuid>,
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub total_miles: Option<f64>,
    pub total_revenue: Option<f64>,
    pub driver_pay: Option<f64>,
    pub profit: Option<f64>,
    pub pay: PayTerms,
    pub created_at: DateTime<Utc>,
}

impl From<Trip> for TripResponse {
    fn from(trip: Trip) -> Self {
        Self {
            id: trip.id,
            company_id: trip.company_id,
            trip_number: trip.trip_number,
            status: trip.status,
            driver_id: trip.driver_id,
            driver_name: trip.driver_name,
            driver_phone: trip.driver_phone.map(Masked),
            truck_id: trip.truck_id,
            truck_kind: trip.truck_kind,
            trailer_id: trip.trailer_id,
            origin: trip.origin,
            destination: trip.destination,
            start_date: trip.start_date,
            end_date: trip.end_date,
            total_miles: trip.total_miles,
            total_revenue: trip.total_revenue,
            driver_pay: trip.driver_pay,
            profit: trip.profit,
            pay: trip.pay,
            created_at: trip.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TripLoadResponse {
    pub trip_id: Uuid,
    pub load_id: Uuid,
    pub sequence_index: i32,
    pub role: StopRole,
}

impl From<TripLoad> for TripLoadResponse {
    fn from(row: TripLoad) -> Self {
        Self {
            trip_id: row.trip_id,
            load_id: row.load_id,
            sequence_index: row.sequence_index,
            role: row.role,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AssignLoadBody {
    pub load_id: Uuid,
    #[serde(default)]
    pub role: StopRole,
}

#[derive(Debug, Deserialize)]
pub struct TripStatusBody {
    pub status: TripStatus,
}

#[derive(Debug, Deserialize)]
pub struct EquipmentBody {
    pub truck_id: Option<Uuid>,
    pub truck_kind: Option<TruckKind>,
    pub trailer_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ExpenseBody {
    pub category: String,
    pub amount: f64,
    pub paid_by: PaidBy,
    pub note: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn create_trip(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(draft): Json<TripDraft>,
) -> Result<(StatusCode, Json<TripResponse>), ApiError> {
    let actor = actor(&headers)?;
    let trip = state.assignment.create_trip(actor, draft).await?;
    Ok((StatusCode::CREATED, Json(trip.into())))
}

pub async fn get_trip(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(trip_id): Path<Uuid>,
) -> Result<Json<TripResponse>, ApiError> {
    let actor = actor(&headers)?;
    let trip = state.store.trip(trip_id).await?;
    ensure_can_manage_trip(actor, &trip)?;
    Ok(Json(trip.into()))
}

pub async fn list_trip_loads(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(trip_id): Path<Uuid>,
) -> Result<Json<Vec<LoadResponse>>, ApiError> {
    let actor = actor(&headers)?;
    let trip = state.store.trip(trip_id).await?;
    ensure_can_manage_trip(actor, &trip)?;
    let loads = state.store.loads_for_trip(trip_id).await?;
    Ok(Json(loads.into_iter().map(Into::into).collect()))
}

pub async fn set_trip_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(trip_id): Path<Uuid>,
    Json(body): Json<TripStatusBody>,
) -> Result<Json<TripResponse>, ApiError> {
    let actor = actor(&headers)?;
    let trip = state
        .assignment
        .set_trip_status(actor, trip_id, body.status)
        .await?;
    Ok(Json(trip.into()))
}

pub async fn update_equipment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(trip_id): Path<Uuid>,
    Json(body): Json<EquipmentBody>,
) -> Result<Json<TripResponse>, ApiError> {
    let actor = actor(&headers)?;
    let trip = state
        .assignment
        .update_trip_equipment(actor, trip_id, body.truck_id, body.truck_kind, body.trailer_id)
        .await?;
    Ok(Json(trip.into()))
}

pub async fn assign_load(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(trip_id): Path<Uuid>,
    Json(body): Json<AssignLoadBody>,
) -> Result<(StatusCode, Json<TripLoadResponse>), ApiError> {
    let actor = actor(&headers)?;
    let row = state
        .assignment
        .assign_load_to_trip(actor, body.load_id, trip_id, body.role)
        .await?;
    Ok((StatusCode::CREATED, Json(row.into())))
}

pub async fn remove_load(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((trip_id, load_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    let actor = actor(&headers)?;
    state
        .assignment
        .remove_load_from_trip(actor, load_id, trip_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_expense(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(trip_id): Path<Uuid>,
    Json(body): Json<ExpenseBody>,
) -> Result<(StatusCode, Json<TripExpense>), ApiError> {
    let actor = actor(&headers)?;
    let trip = state.store.trip(trip_id).await?;
    ensure_can_manage_trip(actor, &trip)?;

    let mut expense = TripExpense::new(trip_id, body.category, body.amount, body.paid_by);
    expense.note = body.note;
    state.store.insert_expense(&expense).await?;
    Ok((StatusCode::CREATED, Json(expense)))
}

pub async fn settle_trip(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(trip_id): Path<Uuid>,
) -> Result<Json<TripResponse>, ApiError> {
    let actor = actor(&headers)?;
    let trip = state.settlement.settle_trip(actor, trip_id).await?;
    Ok(Json(trip.into()))
}
