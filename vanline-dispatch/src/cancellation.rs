use crate::emit;
use std::sync::Arc;
use uuid::Uuid;
use vanline_core::auth::ensure_can_manage_load;
use vanline_core::repository::{CancelOutcome, CancellationRecord, ChangeNotifier, LedgerStore};
use vanline_core::EngineError;
use vanline_shared::DomainEvent;

/// Reverses a carrier assignment and optionally re-exposes the load to
/// the marketplace.
pub struct CancellationService {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn ChangeNotifier>,
}

impl CancellationService {
    pub fn new(store: Arc<dyn LedgerStore>, notifier: Arc<dyn ChangeNotifier>) -> Self {
        Self { store, notifier }
    }

    /// Cancel a confirmed carrier assignment. Legal only while the load is
    /// `accepted` or `loading`; later stages fail with
    /// `CannotCancelAtStage`. One transaction clears the carrier and
    /// equipment fields, resets the load to `pending` (re-posting when
    /// `repost` is set), declines the previously accepted request, and
    /// records the audit row.
    pub async fn cancel_carrier_assignment(
        &self,
        actor_company: Uuid,
        acting_owner: Uuid,
        load_id: Uuid,
        reason_code: String,
        note: Option<String>,
        repost: bool,
    ) -> Result<CancelOutcome, EngineError> {
        let load = self.store.load(load_id).await?;
        ensure_can_manage_load(actor_company, &load)?;

        // Early gates; the store re-checks both inside the transaction.
        if !load.has_carrier() {
            return Err(EngineError::Validation(format!(
                "load {} has no carrier assignment to cancel",
                load_id
            )));
        }
        if !load.assignment_cancellable() {
            return Err(EngineError::CannotCancelAtStage {
                load_id,
                status: load.status,
            });
        }

        let record = CancellationRecord {
            acting_owner_id: acting_owner,
            company_id: actor_company,
            reason_code,
            note,
        };
        let outcome = self
            .store
            .cancel_carrier_assignment(load_id, record, repost)
            .await?;

        tracing::info!(
            load_id = %load_id,
            reposted = repost,
            "carrier assignment cancelled"
        );
        emit(
            self.notifier.as_ref(),
            DomainEvent::load_changed(
                outcome.load.id,
                outcome.load.company_id,
                if repost { "posted" } else { "pending" },
            ),
        )
        .await;
        if let Some(request) = &outcome.invalidated_request {
            emit(
                self.notifier.as_ref(),
                DomainEvent::request_changed(
                    request.id,
                    request.load_id,
                    request.carrier_id,
                    "declined",
                ),
            )
            .await;
        }
        Ok(outcome)
    }
}
