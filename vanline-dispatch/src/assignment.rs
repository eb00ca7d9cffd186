use crate::emit;
use std::sync::Arc;
use uuid::Uuid;
use vanline_core::auth::{ensure_can_manage_load, ensure_can_manage_trip};
use vanline_core::equipment::normalize_trailer;
use vanline_core::repository::{ChangeNotifier, LedgerStore};
use vanline_core::{EngineError, StopRole, Trip, TripDraft, TripLoad, TripStatus, TruckKind};
use vanline_shared::DomainEvent;

/// Owns the ordered association of loads to trips.
pub struct AssignmentService {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn ChangeNotifier>,
}

impl AssignmentService {
    pub fn new(store: Arc<dyn LedgerStore>, notifier: Arc<dyn ChangeNotifier>) -> Self {
        Self { store, notifier }
    }

    /// Create a trip, validating equipment compatibility and allocating a
    /// sequential `TRP-%04d` number when the draft carries none.
    pub async fn create_trip(&self, actor: Uuid, draft: TripDraft) -> Result<Trip, EngineError> {
        let mut draft = draft;
        draft.trailer_id = normalize_trailer(draft.truck_kind, draft.trailer_id)?;
        if let Some(number) = &draft.trip_number {
            if number.trim().is_empty() {
                return Err(EngineError::Validation("trip number may not be blank".into()));
            }
        }

        let trip = self.store.create_trip(actor, draft).await?;

        tracing::info!(trip_id = %trip.id, trip_number = %trip.trip_number, "trip created");
        emit(
            self.notifier.as_ref(),
            DomainEvent::trip_changed(trip.id, trip.company_id, trip.status.as_str()),
        )
        .await;
        Ok(trip)
    }

    /// Append a load to a trip's stop sequence. A load already on another
    /// trip is moved: the old membership row is removed (with its side
    /// effects) in the same transaction, so a load is never attached to
    /// two trips at once. Loads fulfilled through an external carrier are
    /// refused.
    pub async fn assign_load_to_trip(
        &self,
        actor: Uuid,
        load_id: Uuid,
        trip_id: Uuid,
        role: StopRole,
    ) -> Result<TripLoad, EngineError> {
        let load = self.store.load(load_id).await?;
        ensure_can_manage_load(actor, &load)?;
        let trip = self.store.trip(trip_id).await?;
        ensure_can_manage_trip(actor, &trip)?;

        // Early gate; the store re-checks inside the transaction.
        if load.has_carrier() {
            return Err(EngineError::CarrierAlreadyAssigned(load_id));
        }

        let trip_load = self.store.assign_load_to_trip(load_id, trip_id, role).await?;

        tracing::info!(
            load_id = %load_id,
            trip_id = %trip_id,
            sequence_index = trip_load.sequence_index,
            "load assigned to trip"
        );
        emit(
            self.notifier.as_ref(),
            DomainEvent::trip_changed(trip.id, trip.company_id, trip.status.as_str()),
        )
        .await;
        emit(
            self.notifier.as_ref(),
            DomainEvent::load_changed(load.id, load.company_id, "assigned"),
        )
        .await;
        Ok(trip_load)
    }

    /// Swap the truck/trailer pairing on a trip, enforcing the same
    /// compatibility rule as creation.
    pub async fn update_trip_equipment(
        &self,
        actor: Uuid,
        trip_id: Uuid,
        truck_id: Option<Uuid>,
        truck_kind: Option<TruckKind>,
        trailer_id: Option<Uuid>,
    ) -> Result<Trip, EngineError> {
        let trailer_id = normalize_trailer(truck_kind, trailer_id)?;
        let trip = self.store.trip(trip_id).await?;
        ensure_can_manage_trip(actor, &trip)?;

        let trip = self
            .store
            .update_trip_equipment(trip_id, truck_id, truck_kind, trailer_id)
            .await?;

        tracing::info!(trip_id = %trip_id, "trip equipment updated");
        emit(
            self.notifier.as_ref(),
            DomainEvent::trip_changed(trip.id, trip.company_id, trip.status.as_str()),
        )
        .await;
        Ok(trip)
    }

    /// Move a trip through its operational stages. `settled` is reserved
    /// for the settlement path.
    pub async fn set_trip_status(
        &self,
        actor: Uuid,
        trip_id: Uuid,
        to: TripStatus,
    ) -> Result<Trip, EngineError> {
        if to == TripStatus::Settled {
            return Err(EngineError::Validation(
                "trips reach settled through settlement, not a status write".to_string(),
            ));
        }
        let trip = self.store.trip(trip_id).await?;
        ensure_can_manage_trip(actor, &trip)?;

        let trip = self.store.set_trip_status(trip_id, to).await?;

        tracing::info!(trip_id = %trip_id, status = to.as_str(), "trip status updated");
        emit(
            self.notifier.as_ref(),
            DomainEvent::trip_changed(trip.id, trip.company_id, to.as_str()),
        )
        .await;
        Ok(trip)
    }

    /// Drop a load from a trip: the membership row is deleted, remaining
    /// stops renumber dense-from-0, and the load's ordering and
    /// driver/equipment fields clear.
    pub async fn remove_load_from_trip(
        &self,
        actor: Uuid,
        load_id: Uuid,
        trip_id: Uuid,
    ) -> Result<(), EngineError> {
        let load = self.store.load(load_id).await?;
        ensure_can_manage_load(actor, &load)?;
        let trip = self.store.trip(trip_id).await?;
        ensure_can_manage_trip(actor, &trip)?;

        self.store.remove_load_from_trip(load_id, trip_id).await?;

        tracing::info!(load_id = %load_id, trip_id = %trip_id, "load removed from trip");
        emit(
            self.notifier.as_ref(),
            DomainEvent::trip_changed(trip.id, trip.company_id, trip.status.as_str()),
        )
        .await;
        emit(
            self.notifier.as_ref(),
            DomainEvent::load_changed(load.id, load.company_id, "unassigned"),
        )
        .await;
        Ok(())
    }
}
