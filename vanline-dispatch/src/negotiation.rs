use crate::emit;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;
use vanline_core::auth::ensure_can_manage_load;
use vanline_core::repository::{AcceptOutcome, ChangeNotifier, LedgerStore};
use vanline_core::{EngineError, LoadRequest, ProposedDates, RequestStatus, RequestType};
use vanline_shared::DomainEvent;

/// Owns the set of carrier requests against a load and enforces
/// at-most-one-accepted.
pub struct NegotiationService {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn ChangeNotifier>,
}

impl NegotiationService {
    pub fn new(store: Arc<dyn LedgerStore>, notifier: Arc<dyn ChangeNotifier>) -> Self {
        Self { store, notifier }
    }

    /// File a carrier's interest in a posted load. Duplicate pending
    /// requests from one carrier are not hard-blocked; callers upsert.
    pub async fn submit_request(
        &self,
        carrier_id: Uuid,
        load_id: Uuid,
        request_type: RequestType,
        offered_rate: Option<f64>,
        proposed_dates: ProposedDates,
        note: Option<String>,
    ) -> Result<LoadRequest, EngineError> {
        let load = self.store.load(load_id).await?;
        if !load.accepts_requests() {
            return Err(EngineError::NotPostable(load_id));
        }

        let request = LoadRequest::new(
            load_id,
            carrier_id,
            request_type,
            offered_rate,
            proposed_dates,
            note,
        );
        self.store.insert_request(&request).await?;

        tracing::info!(
            request_id = %request.id,
            load_id = %load_id,
            carrier_id = %carrier_id,
            "load request submitted"
        );
        emit(
            self.notifier.as_ref(),
            DomainEvent::request_changed(request.id, load_id, carrier_id, "pending"),
        )
        .await;
        Ok(request)
    }

    /// Accept one request: the target becomes `accepted`, every other
    /// pending request on the load is declined, and the load takes the
    /// carrier and the effective rate, all in one transaction. Of two
    /// racing accepts on the same load, only one wins; the loser sees a
    /// stale-state error.
    pub async fn accept_request(
        &self,
        actor: Uuid,
        request_id: Uuid,
    ) -> Result<AcceptOutcome, EngineError> {
        let request = self.store.request(request_id).await?;
        let load = self.store.load(request.load_id).await?;
        ensure_can_manage_load(actor, &load)?;
        // Early gate; the store re-checks inside the transaction.
        request.ensure_pending()?;

        let outcome = self.store.accept_request(request_id).await?;

        tracing::info!(
            request_id = %request_id,
            load_id = %outcome.load.id,
            carrier_id = %outcome.request.carrier_id,
            declined = outcome.declined.len(),
            "request accepted"
        );
        emit(
            self.notifier.as_ref(),
            DomainEvent::request_changed(
                outcome.request.id,
                outcome.load.id,
                outcome.request.carrier_id,
                "accepted",
            ),
        )
        .await;
        for declined in &outcome.declined {
            emit(
                self.notifier.as_ref(),
                DomainEvent::request_changed(
                    declined.id,
                    declined.load_id,
                    declined.carrier_id,
                    "declined",
                ),
            )
            .await;
        }
        emit(
            self.notifier.as_ref(),
            DomainEvent::load_changed(outcome.load.id, outcome.load.company_id, "accepted"),
        )
        .await;
        Ok(outcome)
    }

    /// Decline a pending request. No effect on the load.
    pub async fn decline_request(
        &self,
        actor: Uuid,
        request_id: Uuid,
        reason: Option<String>,
    ) -> Result<LoadRequest, EngineError> {
        let request = self.store.request(request_id).await?;
        let load = self.store.load(request.load_id).await?;
        ensure_can_manage_load(actor, &load)?;

        let request = self
            .store
            .close_request(request_id, RequestStatus::Declined, reason)
            .await?;

        emit(
            self.notifier.as_ref(),
            DomainEvent::request_changed(request.id, request.load_id, request.carrier_id, "declined"),
        )
        .await;
        Ok(request)
    }

    /// Carrier-initiated withdrawal; only legal while the request is
    /// pending.
    pub async fn withdraw_request(
        &self,
        carrier_id: Uuid,
        request_id: Uuid,
    ) -> Result<LoadRequest, EngineError> {
        let request = self.store.request(request_id).await?;
        if request.carrier_id != carrier_id {
            return Err(EngineError::Unauthorized {
                company_id: carrier_id,
                entity_id: request.id,
            });
        }

        let request = self
            .store
            .close_request(request_id, RequestStatus::Withdrawn, None)
            .await?;

        emit(
            self.notifier.as_ref(),
            DomainEvent::request_changed(
                request.id,
                request.load_id,
                request.carrier_id,
                "withdrawn",
            ),
        )
        .await;
        Ok(request)
    }

    /// Expire stale pending requests. Enforcement cadence belongs to an
    /// external sweep; this only performs the transition.
    pub async fn expire_stale(&self, cutoff: DateTime<Utc>) -> Result<u64, EngineError> {
        let expired = self.store.expire_stale_requests(cutoff).await?;
        if expired > 0 {
            tracing::info!(expired, "stale load requests expired");
        }
        Ok(expired)
    }
}
