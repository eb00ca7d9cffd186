use crate::error::EngineError;
use crate::expense::TripExpense;
use crate::load::{Load, LoadStatus, PostingStatus, PostingType};
use crate::request::{LoadRequest, RequestStatus};
use crate::trip::{StopRole, Trip, TripDraft, TripLoad, TripStatus, TruckKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;
use vanline_shared::DomainEvent;

/// Posting-side fields updated together when a load is (un)posted.
#[derive(Debug, Clone, Copy)]
pub struct PostingUpdate {
    pub posting_status: PostingStatus,
    pub visible: bool,
    pub posting_type: Option<PostingType>,
    pub posted_at: Option<DateTime<Utc>>,
}

impl PostingUpdate {
    pub fn posted(posting_type: PostingType) -> Self {
        Self {
            posting_status: PostingStatus::Posted,
            visible: true,
            posting_type: Some(posting_type),
            posted_at: Some(Utc::now()),
        }
    }

    pub fn unposted() -> Self {
        Self {
            posting_status: PostingStatus::Draft,
            visible: false,
            posting_type: None,
            posted_at: None,
        }
    }
}

/// Result of the accept transaction: the accepted request, the load it
/// claimed, and every sibling request that was cascade-declined with it.
#[derive(Debug, Clone)]
pub struct AcceptOutcome {
    pub request: LoadRequest,
    pub load: Load,
    pub declined: Vec<LoadRequest>,
}

/// Audit fields recorded when a carrier assignment is cancelled.
#[derive(Debug, Clone)]
pub struct CancellationRecord {
    pub acting_owner_id: Uuid,
    pub company_id: Uuid,
    pub reason_code: String,
    pub note: Option<String>,
}

/// Result of the cancel transaction.
#[derive(Debug, Clone)]
pub struct CancelOutcome {
    pub load: Load,
    /// The previously accepted request, now declined, if one existed.
    pub invalidated_request: Option<LoadRequest>,
}

/// Finalized settlement figures persisted onto a trip.
#[derive(Debug, Clone, Copy)]
pub struct SettlementUpdate {
    pub total_revenue: f64,
    pub driver_pay: f64,
    pub profit: f64,
}

/// Per-company load counts by lifecycle status plus open request volume,
/// for UI badge projections.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BoardCounts {
    pub pending: i64,
    pub accepted: i64,
    pub loading: i64,
    pub loaded: i64,
    pub in_transit: i64,
    pub delivered: i64,
    pub cancelled: i64,
    pub posted: i64,
    pub pending_requests: i64,
}

/// Durable relational storage for loads, requests, trips and expenses.
///
/// Multi-row operations (`accept_request`, `assign_load_to_trip`,
/// `remove_load_from_trip`, `cancel_carrier_assignment`) execute inside a
/// single transaction; partial application is a correctness bug, not a
/// degraded state. Status-conditional writes re-check state inside the
/// transaction so concurrent callers race safely.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // ------------------------------------------------------------------
    // Loads
    // ------------------------------------------------------------------

    async fn insert_load(&self, load: &Load) -> Result<(), EngineError>;

    async fn load(&self, id: Uuid) -> Result<Load, EngineError>;

    async fn update_posting(
        &self,
        load_id: Uuid,
        update: PostingUpdate,
    ) -> Result<Load, EngineError>;

    /// Conditional status write: applies only while the row still holds
    /// `from`, otherwise reports `InvalidTransition` with the current
    /// status.
    async fn advance_load_status(
        &self,
        load_id: Uuid,
        from: LoadStatus,
        to: LoadStatus,
    ) -> Result<Load, EngineError>;

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    async fn insert_request(&self, request: &LoadRequest) -> Result<(), EngineError>;

    async fn request(&self, id: Uuid) -> Result<LoadRequest, EngineError>;

    async fn requests_for_load(&self, load_id: Uuid) -> Result<Vec<LoadRequest>, EngineError>;

    /// The accept transaction: target request to `accepted`, every other
    /// pending request on the load to `declined`, and the load updated
    /// (carrier set, status `accepted`, visibility off, rate locked in),
    /// all or nothing. A request no longer pending at commit time loses
    /// with `RequestNotPending`/`RequestTerminal`.
    async fn accept_request(&self, request_id: Uuid) -> Result<AcceptOutcome, EngineError>;

    /// Conditional pending → `to` transition for decline/withdraw.
    async fn close_request(
        &self,
        request_id: Uuid,
        to: RequestStatus,
        reason: Option<String>,
    ) -> Result<LoadRequest, EngineError>;

    /// Sweep support for the external expiration job: `pending` requests
    /// created before `cutoff` become `expired`. Returns how many.
    async fn expire_stale_requests(&self, cutoff: DateTime<Utc>) -> Result<u64, EngineError>;

    // ------------------------------------------------------------------
    // Trips
    // ------------------------------------------------------------------

    /// Insert a trip, allocating the next `TRP-%04d` number for the owner
    /// when the draft carries none. Allocation is serialized per owner.
    async fn create_trip(&self, company_id: Uuid, draft: TripDraft) -> Result<Trip, EngineError>;

    async fn trip(&self, id: Uuid) -> Result<Trip, EngineError>;

    async fn trip_loads(&self, trip_id: Uuid) -> Result<Vec<TripLoad>, EngineError>;

    async fn trip_load_for_load(&self, load_id: Uuid) -> Result<Option<TripLoad>, EngineError>;

    async fn loads_for_trip(&self, trip_id: Uuid) -> Result<Vec<Load>, EngineError>;

    /// The assignment transaction: removes any existing trip membership
    /// (renumbering that trip), appends to the destination at index =
    /// row count, sets the load's `delivery_order` and equipment snapshot
    /// from the trip. Refuses loads with an external carrier.
    async fn assign_load_to_trip(
        &self,
        load_id: Uuid,
        trip_id: Uuid,
        role: StopRole,
    ) -> Result<TripLoad, EngineError>;

    /// The removal transaction: deletes the membership row, renumbers the
    /// remaining rows dense-from-0, clears the load's ordering and
    /// driver/equipment fields.
    async fn remove_load_from_trip(&self, load_id: Uuid, trip_id: Uuid)
        -> Result<(), EngineError>;

    /// Plain trip status write for the operational stages; `settled` is
    /// reserved for `record_settlement`.
    async fn set_trip_status(&self, trip_id: Uuid, to: TripStatus) -> Result<Trip, EngineError>;

    /// Swap the truck/trailer pairing on a trip. Compatibility is checked
    /// by the caller before the write.
    async fn update_trip_equipment(
        &self,
        trip_id: Uuid,
        truck_id: Option<Uuid>,
        truck_kind: Option<TruckKind>,
        trailer_id: Option<Uuid>,
    ) -> Result<Trip, EngineError>;

    /// Persist settlement figures and move the trip `completed` →
    /// `settled`; any other starting status is rejected.
    async fn record_settlement(
        &self,
        trip_id: Uuid,
        update: SettlementUpdate,
    ) -> Result<Trip, EngineError>;

    // ------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------

    /// The cancel transaction: verifies stage (`accepted`/`loading`),
    /// clears carrier and equipment fields, resets status to `pending`
    /// (re-posting when asked), declines the previously accepted request,
    /// and writes the audit row, all or nothing.
    async fn cancel_carrier_assignment(
        &self,
        load_id: Uuid,
        record: CancellationRecord,
        repost: bool,
    ) -> Result<CancelOutcome, EngineError>;

    // ------------------------------------------------------------------
    // Expenses & projections
    // ------------------------------------------------------------------

    async fn insert_expense(&self, expense: &TripExpense) -> Result<(), EngineError>;

    async fn expenses_for_trip(&self, trip_id: Uuid) -> Result<Vec<TripExpense>, EngineError>;

    async fn board_counts(&self, company_id: Uuid) -> Result<BoardCounts, EngineError>;
}

/// Realtime event bus the engine emits to after each committed mutation.
/// Subscriptions and delivery guarantees are downstream concerns.
#[async_trait]
pub trait ChangeNotifier: Send + Sync {
    async fn publish(&self, event: DomainEvent) -> Result<(), EngineError>;
}
