use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use uuid::Uuid;
use vanline_core::repository::{ChangeNotifier, LedgerStore};
use vanline_core::{
    EngineError, LoadDraft, LoadStatus, PaidBy, PayMode, PayTerms, PostingType, ProposedDates,
    RequestStatus, RequestType, StopRole, TripDraft, TripExpense, TripStatus, TruckKind,
};
use vanline_dispatch::{
    AssignmentService, CancellationService, LifecycleService, NegotiationService,
    SettlementService,
};
use vanline_shared::DomainEvent;
use vanline_store::{FailPoint, MemoryLedger, NullNotifier, RecordingNotifier};

struct Harness {
    store: Arc<MemoryLedger>,
    lifecycle: LifecycleService,
    negotiation: NegotiationService,
    assignment: AssignmentService,
    cancellation: CancellationService,
    settlement: SettlementService,
}

fn harness_with_notifier(notifier: Arc<dyn ChangeNotifier>) -> Harness {
    let store = Arc::new(MemoryLedger::new());
    let ledger: Arc<dyn LedgerStore> = store.clone();
    Harness {
        store,
        lifecycle: LifecycleService::new(ledger.clone(), notifier.clone()),
        negotiation: NegotiationService::new(ledger.clone(), notifier.clone()),
        assignment: AssignmentService::new(ledger.clone(), notifier.clone()),
        cancellation: CancellationService::new(ledger.clone(), notifier.clone()),
        settlement: SettlementService::new(ledger, notifier),
    }
}

fn harness() -> Harness {
    harness_with_notifier(Arc::new(NullNotifier))
}

async fn posted_load(h: &Harness, owner: Uuid, rate: f64, cubic_feet: f64) -> Uuid {
    let load = h
        .lifecycle
        .create_load(
            owner,
            LoadDraft {
                rate: Some(rate),
                cubic_feet: Some(cubic_feet),
                ..LoadDraft::default()
            },
        )
        .await
        .unwrap();
    h.lifecycle
        .post_to_marketplace(owner, load.id, PostingType::LiveLoad)
        .await
        .unwrap();
    load.id
}

async fn submit(h: &Harness, carrier: Uuid, load_id: Uuid, offered: Option<f64>) -> Uuid {
    let request_type = if offered.is_some() {
        RequestType::CounterOffer
    } else {
        RequestType::AcceptListed
    };
    h.negotiation
        .submit_request(
            carrier,
            load_id,
            request_type,
            offered,
            ProposedDates::default(),
            None,
        )
        .await
        .unwrap()
        .id
}

// ---------------------------------------------------------------------------
// Negotiation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_accept_cascades_and_updates_load() {
    let h = harness();
    let owner = Uuid::new_v4();
    let load_id = posted_load(&h, owner, 4.0, 500.0).await;

    let carrier_a = Uuid::new_v4();
    let carrier_b = Uuid::new_v4();
    let listed = submit(&h, carrier_a, load_id, None).await;
    let counter = submit(&h, carrier_b, load_id, Some(3.5)).await;

    let outcome = h.negotiation.accept_request(owner, counter).await.unwrap();

    // The winner carries the counter rate; the load leaves the marketplace
    assert_eq!(outcome.request.status, RequestStatus::Accepted);
    assert_eq!(outcome.load.assigned_carrier_id, Some(carrier_b));
    assert_eq!(outcome.load.status, LoadStatus::Accepted);
    assert_eq!(outcome.load.agreed_rate, Some(3.5));
    assert!(!outcome.load.visible);

    // The sibling was declined in the same transaction
    assert_eq!(outcome.declined.len(), 1);
    assert_eq!(outcome.declined[0].id, listed);
    let listed_request = h.store.request(listed).await.unwrap();
    assert_eq!(listed_request.status, RequestStatus::Declined);

    // The declined sibling is terminal now
    let err = h.negotiation.accept_request(owner, listed).await.unwrap_err();
    assert!(matches!(err, EngineError::RequestTerminal { .. }));
}

#[tokio::test]
async fn test_accept_listed_locks_in_posted_rate() {
    let h = harness();
    let owner = Uuid::new_v4();
    let load_id = posted_load(&h, owner, 4.25, 500.0).await;
    let request = submit(&h, Uuid::new_v4(), load_id, None).await;

    let outcome = h.negotiation.accept_request(owner, request).await.unwrap();
    assert_eq!(outcome.load.agreed_rate, Some(4.25));
}

#[tokio::test]
async fn test_submit_requires_marketplace_visibility() {
    let h = harness();
    let owner = Uuid::new_v4();
    let load = h
        .lifecycle
        .create_load(owner, LoadDraft::default())
        .await
        .unwrap();

    let err = h
        .negotiation
        .submit_request(
            Uuid::new_v4(),
            load.id,
            RequestType::AcceptListed,
            None,
            ProposedDates::default(),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotPostable(_)));

    // Unposting closes the window again
    h.lifecycle
        .post_to_marketplace(owner, load.id, PostingType::Rfd)
        .await
        .unwrap();
    h.lifecycle
        .unpost_from_marketplace(owner, load.id)
        .await
        .unwrap();
    let err = h
        .negotiation
        .submit_request(
            Uuid::new_v4(),
            load.id,
            RequestType::AcceptListed,
            None,
            ProposedDates::default(),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotPostable(_)));
}

#[tokio::test]
async fn test_posting_requires_ownership() {
    let h = harness();
    let owner = Uuid::new_v4();
    let load = h
        .lifecycle
        .create_load(owner, LoadDraft::default())
        .await
        .unwrap();

    let err = h
        .lifecycle
        .post_to_marketplace(Uuid::new_v4(), load.id, PostingType::LiveLoad)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized { .. }));
}

#[tokio::test]
async fn test_withdraw_is_carrier_only_and_pending_only() {
    let h = harness();
    let owner = Uuid::new_v4();
    let carrier = Uuid::new_v4();
    let load_id = posted_load(&h, owner, 4.0, 500.0).await;
    let request = submit(&h, carrier, load_id, None).await;

    let err = h
        .negotiation
        .withdraw_request(Uuid::new_v4(), request)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized { .. }));

    let withdrawn = h.negotiation.withdraw_request(carrier, request).await.unwrap();
    assert_eq!(withdrawn.status, RequestStatus::Withdrawn);

    // Withdrawn is terminal; nothing resurrects it
    let err = h
        .negotiation
        .withdraw_request(carrier, request)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RequestTerminal { .. }));
    let err = h
        .negotiation
        .accept_request(owner, request)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RequestTerminal { .. }));
}

#[tokio::test]
async fn test_racing_accepts_have_one_winner() {
    let h = harness();
    let owner = Uuid::new_v4();
    let load_id = posted_load(&h, owner, 4.0, 500.0).await;
    let first = submit(&h, Uuid::new_v4(), load_id, None).await;
    let second = submit(&h, Uuid::new_v4(), load_id, Some(3.0)).await;

    let h = Arc::new(h);
    let (a, b) = tokio::join!(
        {
            let h = h.clone();
            async move { h.negotiation.accept_request(owner, first).await }
        },
        {
            let h = h.clone();
            async move { h.negotiation.accept_request(owner, second).await }
        }
    );

    let winners = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    let loser = if a.is_ok() { b } else { a };
    assert!(matches!(
        loser.unwrap_err(),
        EngineError::RequestNotPending(_) | EngineError::RequestTerminal { .. }
    ));

    // Exactly one accepted request remains on the load
    let requests = h.store.requests_for_load(load_id).await.unwrap();
    let accepted: Vec<_> = requests
        .iter()
        .filter(|r| r.status == RequestStatus::Accepted)
        .collect();
    assert_eq!(accepted.len(), 1);
    let load = h.store.load(load_id).await.unwrap();
    assert_eq!(load.assigned_carrier_id, Some(accepted[0].carrier_id));
}

#[tokio::test]
async fn test_random_sequences_never_yield_two_accepted() {
    let h = harness();
    let owner = Uuid::new_v4();
    let load_id = posted_load(&h, owner, 4.0, 500.0).await;

    let mut rng = StdRng::seed_from_u64(7);
    let mut requests: Vec<(Uuid, Uuid)> = Vec::new();

    for _ in 0..300 {
        match rng.gen_range(0..4u8) {
            0 => {
                let carrier = Uuid::new_v4();
                if let Ok(request) = h
                    .negotiation
                    .submit_request(
                        carrier,
                        load_id,
                        RequestType::AcceptListed,
                        None,
                        ProposedDates::default(),
                        None,
                    )
                    .await
                {
                    requests.push((request.id, carrier));
                }
            }
            1 if !requests.is_empty() => {
                let (id, _) = requests[rng.gen_range(0..requests.len())];
                let _ = h.negotiation.accept_request(owner, id).await;
            }
            2 if !requests.is_empty() => {
                let (id, _) = requests[rng.gen_range(0..requests.len())];
                let _ = h.negotiation.decline_request(owner, id, None).await;
            }
            3 if !requests.is_empty() => {
                let (id, carrier) = requests[rng.gen_range(0..requests.len())];
                let _ = h.negotiation.withdraw_request(carrier, id).await;
            }
            _ => {}
        }

        let accepted = h
            .store
            .requests_for_load(load_id)
            .await
            .unwrap()
            .iter()
            .filter(|r| r.status == RequestStatus::Accepted)
            .count();
        assert!(accepted <= 1, "load held {} accepted requests", accepted);
    }
}

#[tokio::test]
async fn test_accept_atomicity_under_injected_failure() {
    let h = harness();
    let owner = Uuid::new_v4();
    let load_id = posted_load(&h, owner, 4.0, 500.0).await;
    let request = submit(&h, Uuid::new_v4(), load_id, None).await;

    h.store.fail_next(FailPoint::AcceptBeforeLoadWrite);
    let err = h.negotiation.accept_request(owner, request).await.unwrap_err();
    assert!(matches!(err, EngineError::StoreUnavailable(_)));

    // No partial state: request still pending, load untouched
    let load = h.store.load(load_id).await.unwrap();
    assert!(load.assigned_carrier_id.is_none());
    assert_eq!(load.status, LoadStatus::Pending);
    assert_eq!(
        h.store.request(request).await.unwrap().status,
        RequestStatus::Pending
    );

    // A fresh read-and-retry wins cleanly
    let outcome = h.negotiation.accept_request(owner, request).await.unwrap();
    assert_eq!(outcome.load.status, LoadStatus::Accepted);
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_status_advancement_is_forward_only() {
    let h = harness();
    let owner = Uuid::new_v4();
    let load = h
        .lifecycle
        .create_load(owner, LoadDraft::default())
        .await
        .unwrap();

    h.lifecycle
        .advance_status(owner, load.id, LoadStatus::Loading)
        .await
        .unwrap();
    h.lifecycle
        .advance_status(owner, load.id, LoadStatus::InTransit)
        .await
        .unwrap();

    let err = h
        .lifecycle
        .advance_status(owner, load.id, LoadStatus::Loaded)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));

    h.lifecycle
        .advance_status(owner, load.id, LoadStatus::Delivered)
        .await
        .unwrap();

    // Delivered is terminal, even for cancellation
    let err = h
        .lifecycle
        .advance_status(owner, load.id, LoadStatus::Cancelled)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_cancelled_is_reachable_from_any_live_stage() {
    let h = harness();
    let owner = Uuid::new_v4();
    let load = h
        .lifecycle
        .create_load(owner, LoadDraft::default())
        .await
        .unwrap();
    h.lifecycle
        .advance_status(owner, load.id, LoadStatus::InTransit)
        .await
        .unwrap();
    let load = h
        .lifecycle
        .advance_status(owner, load.id, LoadStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(load.status, LoadStatus::Cancelled);
}

// ---------------------------------------------------------------------------
// Trip assignment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_equipment_rules_on_trip_creation() {
    let h = harness();
    let owner = Uuid::new_v4();

    let err = h
        .assignment
        .create_trip(
            owner,
            TripDraft {
                truck_id: Some(Uuid::new_v4()),
                truck_kind: Some(TruckKind::Tractor),
                trailer_id: None,
                ..TripDraft::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::EquipmentMismatch(_)));

    // A box truck silently drops the trailer selection
    let trip = h
        .assignment
        .create_trip(
            owner,
            TripDraft {
                truck_id: Some(Uuid::new_v4()),
                truck_kind: Some(TruckKind::BoxTruck),
                trailer_id: Some(Uuid::new_v4()),
                ..TripDraft::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(trip.trailer_id, None);

    // The same rule gates equipment swaps after creation
    let err = h
        .assignment
        .update_trip_equipment(
            owner,
            trip.id,
            Some(Uuid::new_v4()),
            Some(TruckKind::Tractor),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::EquipmentMismatch(_)));

    let trailer = Uuid::new_v4();
    let updated = h
        .assignment
        .update_trip_equipment(
            owner,
            trip.id,
            Some(Uuid::new_v4()),
            Some(TruckKind::Tractor),
            Some(trailer),
        )
        .await
        .unwrap();
    assert_eq!(updated.trailer_id, Some(trailer));
}

#[tokio::test]
async fn test_concurrent_trip_creation_never_duplicates_numbers() {
    let h = Arc::new(harness());
    let owner = Uuid::new_v4();

    let mut handles = Vec::new();
    for _ in 0..6 {
        let h = h.clone();
        handles.push(tokio::spawn(async move {
            h.assignment
                .create_trip(owner, TripDraft::default())
                .await
                .unwrap()
                .trip_number
        }));
    }

    let mut numbers = Vec::new();
    for handle in handles {
        numbers.push(handle.await.unwrap());
    }
    numbers.sort();
    numbers.dedup();
    assert_eq!(numbers.len(), 6);
}

#[tokio::test]
async fn test_move_between_trips_keeps_single_membership() {
    let h = harness();
    let owner = Uuid::new_v4();
    let first = h
        .assignment
        .create_trip(owner, TripDraft::default())
        .await
        .unwrap();
    let second = h
        .assignment
        .create_trip(owner, TripDraft::default())
        .await
        .unwrap();

    let load = h
        .lifecycle
        .create_load(owner, LoadDraft::default())
        .await
        .unwrap();
    let filler = h
        .lifecycle
        .create_load(owner, LoadDraft::default())
        .await
        .unwrap();

    h.assignment
        .assign_load_to_trip(owner, filler.id, second.id, StopRole::Delivery)
        .await
        .unwrap();
    let row = h
        .assignment
        .assign_load_to_trip(owner, load.id, first.id, StopRole::Delivery)
        .await
        .unwrap();
    assert_eq!(row.sequence_index, 0);

    // Moving appends to the destination and detaches from the source
    let row = h
        .assignment
        .assign_load_to_trip(owner, load.id, second.id, StopRole::Delivery)
        .await
        .unwrap();
    assert_eq!(row.sequence_index, 1);

    assert!(h.store.trip_loads(first.id).await.unwrap().is_empty());
    let membership = h.store.trip_load_for_load(load.id).await.unwrap().unwrap();
    assert_eq!(membership.trip_id, second.id);

    let moved = h.store.load(load.id).await.unwrap();
    assert_eq!(moved.delivery_order, Some(2));
}

#[tokio::test]
async fn test_concurrent_assigns_leave_load_on_exactly_one_trip() {
    let h = Arc::new(harness());
    let owner = Uuid::new_v4();
    let first = h
        .assignment
        .create_trip(owner, TripDraft::default())
        .await
        .unwrap();
    let second = h
        .assignment
        .create_trip(owner, TripDraft::default())
        .await
        .unwrap();
    let load = h
        .lifecycle
        .create_load(owner, LoadDraft::default())
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        {
            let h = h.clone();
            let trip = first.id;
            let load = load.id;
            async move {
                h.assignment
                    .assign_load_to_trip(owner, load, trip, StopRole::Delivery)
                    .await
            }
        },
        {
            let h = h.clone();
            let trip = second.id;
            let load = load.id;
            async move {
                h.assignment
                    .assign_load_to_trip(owner, load, trip, StopRole::Delivery)
                    .await
            }
        }
    );
    assert!(a.is_ok() && b.is_ok());

    let memberships = [
        h.store.trip_loads(first.id).await.unwrap().len(),
        h.store.trip_loads(second.id).await.unwrap().len(),
    ];
    assert_eq!(memberships.iter().sum::<usize>(), 1);
}

#[tokio::test]
async fn test_carrier_fulfilled_load_rejects_trip_assignment() {
    let h = harness();
    let owner = Uuid::new_v4();
    let load_id = posted_load(&h, owner, 4.0, 500.0).await;
    let request = submit(&h, Uuid::new_v4(), load_id, None).await;
    h.negotiation.accept_request(owner, request).await.unwrap();

    let trip = h
        .assignment
        .create_trip(owner, TripDraft::default())
        .await
        .unwrap();
    let err = h
        .assignment
        .assign_load_to_trip(owner, load_id, trip.id, StopRole::Delivery)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::CarrierAlreadyAssigned(_)));
}

#[tokio::test]
async fn test_assignment_snapshots_trip_equipment_onto_load() {
    let h = harness();
    let owner = Uuid::new_v4();
    let driver_id = Uuid::new_v4();
    let truck_id = Uuid::new_v4();
    let trip = h
        .assignment
        .create_trip(
            owner,
            TripDraft {
                driver_id: Some(driver_id),
                driver_name: Some("R. Alvarez".to_string()),
                driver_phone: Some("555-0142".to_string()),
                truck_id: Some(truck_id),
                truck_kind: Some(TruckKind::BoxTruck),
                ..TripDraft::default()
            },
        )
        .await
        .unwrap();

    let load = h
        .lifecycle
        .create_load(owner, LoadDraft::default())
        .await
        .unwrap();
    h.assignment
        .assign_load_to_trip(owner, load.id, trip.id, StopRole::Delivery)
        .await
        .unwrap();

    let load = h.store.load(load.id).await.unwrap();
    assert_eq!(load.assigned_driver_id, Some(driver_id));
    assert_eq!(load.assigned_driver_name.as_deref(), Some("R. Alvarez"));
    assert_eq!(load.assigned_truck_id, Some(truck_id));
    assert_eq!(load.delivery_order, Some(1));

    // Removal clears the snapshot again
    h.assignment
        .remove_load_from_trip(owner, load.id, trip.id)
        .await
        .unwrap();
    let load = h.store.load(load.id).await.unwrap();
    assert!(load.assigned_driver_id.is_none());
    assert_eq!(load.delivery_order, None);
}

// ---------------------------------------------------------------------------
// Cancellation & repost
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_cancel_with_repost_reopens_marketplace() {
    let h = harness();
    let owner = Uuid::new_v4();
    let acting_user = Uuid::new_v4();
    let load_id = posted_load(&h, owner, 4.0, 500.0).await;
    let request = submit(&h, Uuid::new_v4(), load_id, None).await;
    h.negotiation.accept_request(owner, request).await.unwrap();

    let outcome = h
        .cancellation
        .cancel_carrier_assignment(
            owner,
            acting_user,
            load_id,
            "carrier_no_show".to_string(),
            Some("second missed pickup window".to_string()),
            true,
        )
        .await
        .unwrap();

    assert!(outcome.load.assigned_carrier_id.is_none());
    assert_eq!(outcome.load.status, LoadStatus::Pending);
    assert!(outcome.load.visible);
    assert_eq!(outcome.load.agreed_rate, None);

    // The stale accepted request was invalidated in the same transaction
    let invalidated = outcome.invalidated_request.unwrap();
    assert_eq!(invalidated.id, request);
    assert_eq!(invalidated.status, RequestStatus::Declined);

    // The load can take fresh requests again
    submit(&h, Uuid::new_v4(), load_id, Some(3.75)).await;

    // The audit trail kept the reason and the cancelled carrier
    let audit = h.store.cancellations_for_load(load_id);
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].reason_code, "carrier_no_show");
    assert_eq!(audit[0].acting_owner_id, acting_user);
    assert!(audit[0].reposted);
}

#[tokio::test]
async fn test_cancel_without_repost_leaves_load_unlisted() {
    let h = harness();
    let owner = Uuid::new_v4();
    let load_id = posted_load(&h, owner, 4.0, 500.0).await;
    let request = submit(&h, Uuid::new_v4(), load_id, None).await;
    h.negotiation.accept_request(owner, request).await.unwrap();

    let outcome = h
        .cancellation
        .cancel_carrier_assignment(
            owner,
            Uuid::new_v4(),
            load_id,
            "rate_dispute".to_string(),
            None,
            false,
        )
        .await
        .unwrap();
    assert_eq!(outcome.load.status, LoadStatus::Pending);
    assert!(!outcome.load.visible);
}

#[tokio::test]
async fn test_cancel_rejected_in_transit_and_beyond() {
    let h = harness();
    let owner = Uuid::new_v4();
    let load_id = posted_load(&h, owner, 4.0, 500.0).await;
    let request = submit(&h, Uuid::new_v4(), load_id, None).await;
    h.negotiation.accept_request(owner, request).await.unwrap();
    h.lifecycle
        .advance_status(owner, load_id, LoadStatus::InTransit)
        .await
        .unwrap();

    let err = h
        .cancellation
        .cancel_carrier_assignment(
            owner,
            Uuid::new_v4(),
            load_id,
            "carrier_no_show".to_string(),
            None,
            true,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::CannotCancelAtStage { .. }));
}

#[tokio::test]
async fn test_cancel_without_carrier_is_a_validation_error() {
    let h = harness();
    let owner = Uuid::new_v4();
    let load_id = posted_load(&h, owner, 4.0, 500.0).await;

    let err = h
        .cancellation
        .cancel_carrier_assignment(
            owner,
            Uuid::new_v4(),
            load_id,
            "carrier_no_show".to_string(),
            None,
            false,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn test_cancel_atomicity_under_injected_failure() {
    let h = harness();
    let owner = Uuid::new_v4();
    let load_id = posted_load(&h, owner, 4.0, 500.0).await;
    let request = submit(&h, Uuid::new_v4(), load_id, None).await;
    h.negotiation.accept_request(owner, request).await.unwrap();

    h.store
        .fail_next(FailPoint::CancelBeforeRequestInvalidation);
    let err = h
        .cancellation
        .cancel_carrier_assignment(
            owner,
            Uuid::new_v4(),
            load_id,
            "carrier_no_show".to_string(),
            None,
            true,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::StoreUnavailable(_)));

    // Nothing moved: carrier still assigned, request still accepted
    let load = h.store.load(load_id).await.unwrap();
    assert!(load.assigned_carrier_id.is_some());
    assert_eq!(load.status, LoadStatus::Accepted);
    assert_eq!(
        h.store.request(request).await.unwrap().status,
        RequestStatus::Accepted
    );
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_settle_trip_end_to_end() {
    let h = harness();
    let owner = Uuid::new_v4();
    let trip = h
        .assignment
        .create_trip(
            owner,
            TripDraft {
                total_miles: Some(500.0),
                pay: PayTerms {
                    mode: Some(PayMode::PerMile),
                    rate_per_mile: Some(2.0),
                    ..PayTerms::default()
                },
                ..TripDraft::default()
            },
        )
        .await
        .unwrap();

    for _ in 0..2 {
        let load = h
            .lifecycle
            .create_load(
                owner,
                LoadDraft {
                    rate: Some(4.0),
                    cubic_feet: Some(250.0),
                    ..LoadDraft::default()
                },
            )
            .await
            .unwrap();
        h.assignment
            .assign_load_to_trip(owner, load.id, trip.id, StopRole::Delivery)
            .await
            .unwrap();
    }

    for (category, amount, paid_by) in [
        ("tolls", 50.0, PaidBy::DriverPersonal),
        ("delivery_cash", 200.0, PaidBy::DriverCash),
        ("fuel", 300.0, PaidBy::FuelCard),
    ] {
        h.store
            .insert_expense(&TripExpense::new(
                trip.id,
                category.to_string(),
                amount,
                paid_by,
            ))
            .await
            .unwrap();
    }

    h.assignment
        .set_trip_status(owner, trip.id, TripStatus::Completed)
        .await
        .unwrap();
    let settled = h.settlement.settle_trip(owner, trip.id).await.unwrap();

    assert_eq!(settled.status, TripStatus::Settled);
    // Two loads at 4.0/cuft over 250 cuft each
    assert_eq!(settled.total_revenue, Some(2000.0));
    // Gross 1000 per-mile, plus 50 reimbursed, minus 200 cash collected
    assert_eq!(settled.driver_pay, Some(850.0));
    // Revenue minus gross minus company-borne fuel and reimbursement
    assert_eq!(settled.profit, Some(650.0));

    // Settlement is terminal for the trip
    let err = h.settlement.settle_trip(owner, trip.id).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn test_settled_is_not_reachable_by_plain_status_write() {
    let h = harness();
    let owner = Uuid::new_v4();
    let trip = h
        .assignment
        .create_trip(owner, TripDraft::default())
        .await
        .unwrap();
    let err = h
        .assignment
        .set_trip_status(owner, trip.id, TripStatus::Settled)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn test_settle_requires_completed_trip() {
    let h = harness();
    let owner = Uuid::new_v4();
    let trip = h
        .assignment
        .create_trip(owner, TripDraft::default())
        .await
        .unwrap();
    let err = h.settlement.settle_trip(owner, trip.id).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

// ---------------------------------------------------------------------------
// Change notification
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_mutations_emit_domain_events() {
    let recorder = Arc::new(RecordingNotifier::new());
    let h = harness_with_notifier(recorder.clone());
    let owner = Uuid::new_v4();

    let load_id = posted_load(&h, owner, 4.0, 500.0).await;
    let request = submit(&h, Uuid::new_v4(), load_id, None).await;
    h.negotiation.accept_request(owner, request).await.unwrap();

    let events = recorder.events();
    assert!(events
        .iter()
        .any(|e| matches!(e, DomainEvent::LoadChanged(ev) if ev.load_id == load_id)));
    assert!(events
        .iter()
        .any(|e| matches!(e, DomainEvent::RequestChanged(ev) if ev.request_id == request)));

    // The accept commit produced both a request event and a load event
    let accepted_events: Vec<_> = events
        .iter()
        .filter(|e| match e {
            DomainEvent::RequestChanged(ev) => ev.status == "accepted",
            _ => false,
        })
        .collect();
    assert_eq!(accepted_events.len(), 1);
}
