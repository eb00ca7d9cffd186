use crate::load::LoadStatus;
use crate::request::RequestStatus;
use uuid::Uuid;

/// Every failure the engine can surface. All of these are recoverable at
/// the caller level; `StoreUnavailable` should be retried with backoff,
/// and `accept_request`/`cancel_carrier_assignment` must re-read current
/// state before a retry.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("company {company_id} is not authorized for {entity_id}")]
    Unauthorized { company_id: Uuid, entity_id: Uuid },

    #[error("load {0} is not posted to the marketplace")]
    NotPostable(Uuid),

    #[error("request {0} is not pending")]
    RequestNotPending(Uuid),

    #[error("request {request_id} is already {status}")]
    RequestTerminal {
        request_id: Uuid,
        status: RequestStatus,
    },

    #[error("invalid load status transition from {from} to {to}")]
    InvalidTransition { from: LoadStatus, to: LoadStatus },

    #[error("load {0} already has a carrier assigned")]
    CarrierAlreadyAssigned(Uuid),

    #[error("carrier assignment on load {load_id} cannot be cancelled at stage {status}")]
    CannotCancelAtStage { load_id: Uuid, status: LoadStatus },

    #[error("equipment mismatch: {0}")]
    EquipmentMismatch(String),

    #[error("ledger store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("{0}")]
    Validation(String),
}

impl EngineError {
    pub fn not_found(entity: &str, id: Uuid) -> Self {
        Self::NotFound(format!("{} {}", entity, id))
    }
}
