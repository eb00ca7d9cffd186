use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;
use vanline_core::repository::{
    AcceptOutcome, BoardCounts, CancelOutcome, CancellationRecord, ChangeNotifier, LedgerStore,
    PostingUpdate, SettlementUpdate,
};
use vanline_core::request::effective_rate;
use vanline_core::{
    EngineError, Load, LoadRequest, LoadStatus, PostingStatus, RequestStatus, StopRole, Trip,
    TripDraft, TripExpense, TripLoad, TripStatus, TruckKind,
};
use vanline_shared::DomainEvent;

/// Abort point injected into a composite write, after its first effect has
/// been applied to the working snapshot. Used by tests to prove that a
/// failed transaction leaves no partial state behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    /// Fail the accept transaction after the request flips to `accepted`
    /// but before the cascade and the load update.
    AcceptBeforeLoadWrite,
    /// Fail the cancel transaction after the carrier fields clear but
    /// before the accepted request is invalidated.
    CancelBeforeRequestInvalidation,
}

/// Audit row mirrored from the `assignment_cancellations` table.
#[derive(Debug, Clone)]
pub struct CancellationAudit {
    pub load_id: Uuid,
    pub acting_owner_id: Uuid,
    pub company_id: Uuid,
    pub cancelled_carrier_id: Uuid,
    pub reason_code: String,
    pub note: Option<String>,
    pub reposted: bool,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Default, Clone)]
struct State {
    loads: HashMap<Uuid, Load>,
    requests: HashMap<Uuid, LoadRequest>,
    trips: HashMap<Uuid, Trip>,
    trip_loads: Vec<TripLoad>,
    expenses: HashMap<Uuid, TripExpense>,
    cancellations: Vec<CancellationAudit>,
}

impl State {
    fn load(&self, id: Uuid) -> Result<Load, EngineError> {
        self.loads
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("load", id))
    }

    fn request(&self, id: Uuid) -> Result<LoadRequest, EngineError> {
        self.requests
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("request", id))
    }

    fn trip(&self, id: Uuid) -> Result<Trip, EngineError> {
        self.trips
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("trip", id))
    }

    /// Delete a membership row and renumber the trip's remaining stops
    /// dense-from-0.
    fn detach_and_renumber(&mut self, load_id: Uuid, trip_id: Uuid) -> Option<i32> {
        let position = self
            .trip_loads
            .iter()
            .position(|tl| tl.load_id == load_id && tl.trip_id == trip_id)?;
        let removed = self.trip_loads.remove(position);
        for row in self
            .trip_loads
            .iter_mut()
            .filter(|tl| tl.trip_id == trip_id && tl.sequence_index > removed.sequence_index)
        {
            row.sequence_index -= 1;
        }
        Some(removed.sequence_index)
    }
}

/// In-memory `LedgerStore` with the same commit-or-discard semantics as
/// the Postgres implementation: every composite write mutates a snapshot
/// and swaps it in only on success. One mutex doubles as the per-owner
/// serialization the trip-number allocator needs.
pub struct MemoryLedger {
    state: Mutex<State>,
    fail_next: Mutex<Option<FailPoint>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            fail_next: Mutex::new(None),
        }
    }

    /// Arm a one-shot mid-transaction failure for the next matching write.
    pub fn fail_next(&self, point: FailPoint) {
        *self.fail_next.lock().unwrap() = Some(point);
    }

    /// Audit rows recorded against a load, oldest first.
    pub fn cancellations_for_load(&self, load_id: Uuid) -> Vec<CancellationAudit> {
        self.state
            .lock()
            .unwrap()
            .cancellations
            .iter()
            .filter(|c| c.load_id == load_id)
            .cloned()
            .collect()
    }

    fn take_fail_point(&self, point: FailPoint) -> bool {
        let mut guard = self.fail_next.lock().unwrap();
        if *guard == Some(point) {
            *guard = None;
            true
        } else {
            false
        }
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn insert_load(&self, load: &Load) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.loads.insert(load.id, load.clone());
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Load, EngineError> {
        self.state.lock().unwrap().load(id)
    }

    async fn update_posting(
        &self,
        load_id: Uuid,
        update: PostingUpdate,
    ) -> Result<Load, EngineError> {
        let mut state = self.state.lock().unwrap();
        let load = state
            .loads
            .get_mut(&load_id)
            .ok_or_else(|| EngineError::not_found("load", load_id))?;
        load.posting_status = update.posting_status;
        load.visible = update.visible;
        if update.posting_type.is_some() {
            load.posting_type = update.posting_type;
        }
        load.posted_at = update.posted_at.or(load.posted_at);
        load.updated_at = Utc::now();
        Ok(load.clone())
    }

    async fn advance_load_status(
        &self,
        load_id: Uuid,
        from: LoadStatus,
        to: LoadStatus,
    ) -> Result<Load, EngineError> {
        let mut state = self.state.lock().unwrap();
        let load = state
            .loads
            .get_mut(&load_id)
            .ok_or_else(|| EngineError::not_found("load", load_id))?;
        if load.status != from {
            return Err(EngineError::InvalidTransition {
                from: load.status,
                to,
            });
        }
        load.status = to;
        load.updated_at = Utc::now();
        Ok(load.clone())
    }

    async fn insert_request(&self, request: &LoadRequest) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        if !state.loads.contains_key(&request.load_id) {
            return Err(EngineError::not_found("load", request.load_id));
        }
        state.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn request(&self, id: Uuid) -> Result<LoadRequest, EngineError> {
        self.state.lock().unwrap().request(id)
    }

    async fn requests_for_load(&self, load_id: Uuid) -> Result<Vec<LoadRequest>, EngineError> {
        let state = self.state.lock().unwrap();
        let mut requests: Vec<LoadRequest> = state
            .requests
            .values()
            .filter(|r| r.load_id == load_id)
            .cloned()
            .collect();
        requests.sort_by_key(|r| r.created_at);
        Ok(requests)
    }

    async fn accept_request(&self, request_id: Uuid) -> Result<AcceptOutcome, EngineError> {
        let mut state = self.state.lock().unwrap();
        let mut work = state.clone();

        let mut request = work.request(request_id)?;
        request.ensure_pending()?;
        let load_snapshot = work.load(request.load_id)?;

        request.status = RequestStatus::Accepted;
        request.updated_at = Utc::now();
        work.requests.insert(request.id, request.clone());

        if self.take_fail_point(FailPoint::AcceptBeforeLoadWrite) {
            return Err(EngineError::StoreUnavailable(
                "injected failure before load write".to_string(),
            ));
        }

        let mut declined = Vec::new();
        for sibling in work.requests.values_mut() {
            if sibling.load_id == request.load_id
                && sibling.id != request.id
                && sibling.status == RequestStatus::Pending
            {
                sibling.status = RequestStatus::Declined;
                sibling.decline_reason = Some("another request accepted".to_string());
                sibling.updated_at = Utc::now();
                declined.push(sibling.clone());
            }
        }
        declined.sort_by_key(|r| r.created_at);

        let agreed = effective_rate(&request, &load_snapshot);
        let load = work
            .loads
            .get_mut(&request.load_id)
            .ok_or_else(|| EngineError::not_found("load", request.load_id))?;
        load.assigned_carrier_id = Some(request.carrier_id);
        load.status = LoadStatus::Accepted;
        load.visible = false;
        load.agreed_rate = agreed;
        load.updated_at = Utc::now();
        let load = load.clone();

        *state = work;
        Ok(AcceptOutcome {
            request,
            load,
            declined,
        })
    }

    async fn close_request(
        &self,
        request_id: Uuid,
        to: RequestStatus,
        reason: Option<String>,
    ) -> Result<LoadRequest, EngineError> {
        let mut state = self.state.lock().unwrap();
        let request = state
            .requests
            .get_mut(&request_id)
            .ok_or_else(|| EngineError::not_found("request", request_id))?;
        request.ensure_pending()?;
        request.status = to;
        if to == RequestStatus::Declined {
            request.decline_reason = reason.or(request.decline_reason.take());
        }
        request.updated_at = Utc::now();
        Ok(request.clone())
    }

    async fn expire_stale_requests(&self, cutoff: DateTime<Utc>) -> Result<u64, EngineError> {
        let mut state = self.state.lock().unwrap();
        let mut expired = 0;
        for request in state.requests.values_mut() {
            if request.status == RequestStatus::Pending && request.created_at < cutoff {
                request.status = RequestStatus::Expired;
                request.updated_at = Utc::now();
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn create_trip(&self, company_id: Uuid, draft: TripDraft) -> Result<Trip, EngineError> {
        let mut state = self.state.lock().unwrap();

        let number = match draft.trip_number.clone() {
            Some(number) => {
                let taken = state
                    .trips
                    .values()
                    .any(|t| t.company_id == company_id && t.trip_number == number);
                if taken {
                    return Err(EngineError::Validation(format!(
                        "trip number {} already in use",
                        number
                    )));
                }
                number
            }
            None => {
                let highest = state
                    .trips
                    .values()
                    .filter(|t| t.company_id == company_id)
                    .filter_map(|t| t.trip_number.strip_prefix("TRP-"))
                    .filter_map(|suffix| suffix.parse::<u32>().ok())
                    .max()
                    .unwrap_or(0);
                format!("TRP-{:04}", highest + 1)
            }
        };

        let trip = Trip::new(company_id, number, draft);
        state.trips.insert(trip.id, trip.clone());
        Ok(trip)
    }

    async fn trip(&self, id: Uuid) -> Result<Trip, EngineError> {
        self.state.lock().unwrap().trip(id)
    }

    async fn trip_loads(&self, trip_id: Uuid) -> Result<Vec<TripLoad>, EngineError> {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<TripLoad> = state
            .trip_loads
            .iter()
            .filter(|tl| tl.trip_id == trip_id)
            .cloned()
            .collect();
        rows.sort_by_key(|tl| tl.sequence_index);
        Ok(rows)
    }

    async fn trip_load_for_load(&self, load_id: Uuid) -> Result<Option<TripLoad>, EngineError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .trip_loads
            .iter()
            .find(|tl| tl.load_id == load_id)
            .cloned())
    }

    async fn loads_for_trip(&self, trip_id: Uuid) -> Result<Vec<Load>, EngineError> {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<&TripLoad> = state
            .trip_loads
            .iter()
            .filter(|tl| tl.trip_id == trip_id)
            .collect();
        rows.sort_by_key(|tl| tl.sequence_index);
        rows.into_iter().map(|tl| state.load(tl.load_id)).collect()
    }

    async fn assign_load_to_trip(
        &self,
        load_id: Uuid,
        trip_id: Uuid,
        role: StopRole,
    ) -> Result<TripLoad, EngineError> {
        let mut state = self.state.lock().unwrap();
        let mut work = state.clone();

        let load_snapshot = work.load(load_id)?;
        if load_snapshot.assigned_carrier_id.is_some() {
            return Err(EngineError::CarrierAlreadyAssigned(load_id));
        }
        let trip = work.trip(trip_id)?;

        // Moving between trips: detach from the old one first.
        let current_trip = work
            .trip_loads
            .iter()
            .find(|tl| tl.load_id == load_id)
            .map(|tl| tl.trip_id);
        if let Some(old_trip_id) = current_trip {
            work.detach_and_renumber(load_id, old_trip_id);
        }

        let sequence_index = work
            .trip_loads
            .iter()
            .filter(|tl| tl.trip_id == trip_id)
            .count() as i32;
        let trip_load = TripLoad::new(trip_id, load_id, sequence_index, role);
        work.trip_loads.push(trip_load.clone());

        let load = work
            .loads
            .get_mut(&load_id)
            .ok_or_else(|| EngineError::not_found("load", load_id))?;
        load.delivery_order = Some(sequence_index + 1);
        load.assigned_driver_id = trip.driver_id;
        load.assigned_driver_name = trip.driver_name.clone();
        load.assigned_driver_phone = trip.driver_phone.clone();
        load.assigned_truck_id = trip.truck_id;
        load.assigned_trailer_id = trip.trailer_id;
        load.updated_at = Utc::now();

        *state = work;
        Ok(trip_load)
    }

    async fn remove_load_from_trip(
        &self,
        load_id: Uuid,
        trip_id: Uuid,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        let mut work = state.clone();

        if work.detach_and_renumber(load_id, trip_id).is_none() {
            return Err(EngineError::NotFound(format!(
                "load {} is not on trip {}",
                load_id, trip_id
            )));
        }
        let load = work
            .loads
            .get_mut(&load_id)
            .ok_or_else(|| EngineError::not_found("load", load_id))?;
        load.clear_assignment();

        *state = work;
        Ok(())
    }

    async fn update_trip_equipment(
        &self,
        trip_id: Uuid,
        truck_id: Option<Uuid>,
        truck_kind: Option<TruckKind>,
        trailer_id: Option<Uuid>,
    ) -> Result<Trip, EngineError> {
        let mut state = self.state.lock().unwrap();
        let trip = state
            .trips
            .get_mut(&trip_id)
            .ok_or_else(|| EngineError::not_found("trip", trip_id))?;
        trip.truck_id = truck_id;
        trip.truck_kind = truck_kind;
        trip.trailer_id = trailer_id;
        trip.updated_at = Utc::now();
        Ok(trip.clone())
    }

    async fn set_trip_status(&self, trip_id: Uuid, to: TripStatus) -> Result<Trip, EngineError> {
        let mut state = self.state.lock().unwrap();
        let trip = state
            .trips
            .get_mut(&trip_id)
            .ok_or_else(|| EngineError::not_found("trip", trip_id))?;
        trip.status = to;
        trip.updated_at = Utc::now();
        Ok(trip.clone())
    }

    async fn record_settlement(
        &self,
        trip_id: Uuid,
        update: SettlementUpdate,
    ) -> Result<Trip, EngineError> {
        let mut state = self.state.lock().unwrap();
        let trip = state
            .trips
            .get_mut(&trip_id)
            .ok_or_else(|| EngineError::not_found("trip", trip_id))?;
        if trip.status != TripStatus::Completed {
            return Err(EngineError::Validation(format!(
                "trip {} must be completed before settlement, is {}",
                trip_id, trip.status
            )));
        }
        trip.total_revenue = Some(update.total_revenue);
        trip.driver_pay = Some(update.driver_pay);
        trip.profit = Some(update.profit);
        trip.status = TripStatus::Settled;
        trip.updated_at = Utc::now();
        Ok(trip.clone())
    }

    async fn cancel_carrier_assignment(
        &self,
        load_id: Uuid,
        record: CancellationRecord,
        repost: bool,
    ) -> Result<CancelOutcome, EngineError> {
        let mut state = self.state.lock().unwrap();
        let mut work = state.clone();

        let load_snapshot = work.load(load_id)?;
        let carrier_id = load_snapshot
            .assigned_carrier_id
            .ok_or_else(|| {
                EngineError::Validation(format!(
                    "load {} has no carrier assignment to cancel",
                    load_id
                ))
            })?;
        if !load_snapshot.assignment_cancellable() {
            return Err(EngineError::CannotCancelAtStage {
                load_id,
                status: load_snapshot.status,
            });
        }

        {
            let load = work
                .loads
                .get_mut(&load_id)
                .ok_or_else(|| EngineError::not_found("load", load_id))?;
            load.assigned_carrier_id = None;
            load.agreed_rate = None;
            load.clear_assignment();
            load.status = LoadStatus::Pending;
            if repost {
                load.posting_status = PostingStatus::Posted;
                load.visible = true;
                load.posted_at = Some(Utc::now());
            }
        }

        if self.take_fail_point(FailPoint::CancelBeforeRequestInvalidation) {
            return Err(EngineError::StoreUnavailable(
                "injected failure before request invalidation".to_string(),
            ));
        }

        let mut invalidated = None;
        for request in work.requests.values_mut() {
            if request.load_id == load_id && request.status == RequestStatus::Accepted {
                request.status = RequestStatus::Declined;
                request.decline_reason = Some("assignment_cancelled".to_string());
                request.updated_at = Utc::now();
                invalidated = Some(request.clone());
            }
        }

        work.cancellations.push(CancellationAudit {
            load_id,
            acting_owner_id: record.acting_owner_id,
            company_id: record.company_id,
            cancelled_carrier_id: carrier_id,
            reason_code: record.reason_code,
            note: record.note,
            reposted: repost,
            cancelled_at: Utc::now(),
        });

        let load = work.load(load_id)?;
        *state = work;
        Ok(CancelOutcome {
            load,
            invalidated_request: invalidated,
        })
    }

    async fn insert_expense(&self, expense: &TripExpense) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        if !state.trips.contains_key(&expense.trip_id) {
            return Err(EngineError::not_found("trip", expense.trip_id));
        }
        state.expenses.insert(expense.id, expense.clone());
        Ok(())
    }

    async fn expenses_for_trip(&self, trip_id: Uuid) -> Result<Vec<TripExpense>, EngineError> {
        let state = self.state.lock().unwrap();
        let mut expenses: Vec<TripExpense> = state
            .expenses
            .values()
            .filter(|e| e.trip_id == trip_id)
            .cloned()
            .collect();
        expenses.sort_by_key(|e| e.incurred_at);
        Ok(expenses)
    }

    async fn board_counts(&self, company_id: Uuid) -> Result<BoardCounts, EngineError> {
        let state = self.state.lock().unwrap();
        let mut counts = BoardCounts::default();
        for load in state.loads.values().filter(|l| l.company_id == company_id) {
            match load.status {
                LoadStatus::Pending => counts.pending += 1,
                LoadStatus::Accepted => counts.accepted += 1,
                LoadStatus::Loading => counts.loading += 1,
                LoadStatus::Loaded => counts.loaded += 1,
                LoadStatus::InTransit => counts.in_transit += 1,
                LoadStatus::Delivered => counts.delivered += 1,
                LoadStatus::Cancelled => counts.cancelled += 1,
            }
            if load.accepts_requests() {
                counts.posted += 1;
            }
        }
        counts.pending_requests = state
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Pending)
            .filter(|r| {
                state
                    .loads
                    .get(&r.load_id)
                    .map(|l| l.company_id == company_id)
                    .unwrap_or(false)
            })
            .count() as i64;
        Ok(counts)
    }
}

/// Notifier that drops every event; for tests and local tooling.
#[derive(Default)]
pub struct NullNotifier;

#[async_trait]
impl ChangeNotifier for NullNotifier {
    async fn publish(&self, _event: DomainEvent) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Notifier that records every event; tests assert on the capture.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<DomainEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChangeNotifier for RecordingNotifier {
    async fn publish(&self, event: DomainEvent) -> Result<(), EngineError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}
