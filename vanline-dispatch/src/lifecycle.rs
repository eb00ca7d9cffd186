use crate::emit;
use std::sync::Arc;
use uuid::Uuid;
use vanline_core::auth::{ensure_can_manage_load, ensure_can_operate_load};
use vanline_core::repository::{ChangeNotifier, LedgerStore, PostingUpdate};
use vanline_core::{EngineError, Load, LoadDraft, LoadStatus, PostingType};
use vanline_shared::DomainEvent;

/// Owns a load's posting state and lifecycle status.
pub struct LifecycleService {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn ChangeNotifier>,
}

impl LifecycleService {
    pub fn new(store: Arc<dyn LedgerStore>, notifier: Arc<dyn ChangeNotifier>) -> Self {
        Self { store, notifier }
    }

    /// Create an unposted load at the start of its lifecycle.
    pub async fn create_load(&self, actor: Uuid, draft: LoadDraft) -> Result<Load, EngineError> {
        let load = Load::new(actor, draft);
        self.store.insert_load(&load).await?;

        tracing::info!(load_id = %load.id, company_id = %actor, "load created");
        emit(
            self.notifier.as_ref(),
            DomainEvent::load_changed(load.id, load.company_id, load.status.as_str()),
        )
        .await;
        Ok(load)
    }

    /// Expose a load to the marketplace so carrier requests can arrive.
    pub async fn post_to_marketplace(
        &self,
        actor: Uuid,
        load_id: Uuid,
        posting_type: PostingType,
    ) -> Result<Load, EngineError> {
        let load = self.store.load(load_id).await?;
        ensure_can_manage_load(actor, &load)?;

        let load = self
            .store
            .update_posting(load_id, PostingUpdate::posted(posting_type))
            .await?;

        tracing::info!(load_id = %load_id, posting_type = posting_type.as_str(), "load posted");
        emit(
            self.notifier.as_ref(),
            DomainEvent::load_changed(load.id, load.company_id, "posted"),
        )
        .await;
        Ok(load)
    }

    /// Pull a load off the marketplace. Existing requests are untouched;
    /// consumers should treat them as stale.
    pub async fn unpost_from_marketplace(
        &self,
        actor: Uuid,
        load_id: Uuid,
    ) -> Result<Load, EngineError> {
        let load = self.store.load(load_id).await?;
        ensure_can_manage_load(actor, &load)?;

        let load = self
            .store
            .update_posting(load_id, PostingUpdate::unposted())
            .await?;

        tracing::info!(load_id = %load_id, "load unposted");
        emit(
            self.notifier.as_ref(),
            DomainEvent::load_changed(load.id, load.company_id, "unposted"),
        )
        .await;
        Ok(load)
    }

    /// Move a load forward through its delivery stages. Out-of-order moves
    /// fail with `InvalidTransition`; `cancelled` is reachable from any
    /// non-terminal stage. The store re-checks the starting status inside
    /// the write, so concurrent advances race safely.
    pub async fn advance_status(
        &self,
        actor: Uuid,
        load_id: Uuid,
        next: LoadStatus,
    ) -> Result<Load, EngineError> {
        let load = self.store.load(load_id).await?;
        ensure_can_operate_load(actor, &load)?;

        if !load.status.can_advance_to(next) {
            return Err(EngineError::InvalidTransition {
                from: load.status,
                to: next,
            });
        }

        let load = self
            .store
            .advance_load_status(load_id, load.status, next)
            .await?;

        tracing::info!(load_id = %load_id, status = next.as_str(), "load status advanced");
        emit(
            self.notifier.as_ref(),
            DomainEvent::load_changed(load.id, load.company_id, next.as_str()),
        )
        .await;
        Ok(load)
    }
}
