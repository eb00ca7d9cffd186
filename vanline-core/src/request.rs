use crate::error::EngineError;
use crate::load::Load;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Negotiation state of a carrier request. `declined`, `withdrawn` and
/// `expired` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Declined,
    Withdrawn,
    Expired,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Withdrawn => "withdrawn",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Declined | Self::Withdrawn | Self::Expired)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "declined" => Ok(Self::Declined),
            "withdrawn" => Ok(Self::Withdrawn),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown request status: {}", other)),
        }
    }
}

/// Whether the carrier takes the listed rate or proposes its own.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    AcceptListed,
    CounterOffer,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AcceptListed => "accept_listed",
            Self::CounterOffer => "counter_offer",
        }
    }
}

impl FromStr for RequestType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accept_listed" => Ok(Self::AcceptListed),
            "counter_offer" => Ok(Self::CounterOffer),
            other => Err(format!("unknown request type: {}", other)),
        }
    }
}

/// Date windows a carrier proposes alongside its request.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProposedDates {
    pub load_start: Option<NaiveDate>,
    pub load_end: Option<NaiveDate>,
    pub delivery_start: Option<NaiveDate>,
    pub delivery_end: Option<NaiveDate>,
}

/// A carrier's bid/claim against a posted load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadRequest {
    pub id: Uuid,
    pub load_id: Uuid,
    pub carrier_id: Uuid,
    pub status: RequestStatus,
    pub request_type: RequestType,
    pub offered_rate: Option<f64>,
    pub proposed_dates: ProposedDates,
    pub note: Option<String>,
    pub decline_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LoadRequest {
    pub fn new(
        load_id: Uuid,
        carrier_id: Uuid,
        request_type: RequestType,
        offered_rate: Option<f64>,
        proposed_dates: ProposedDates,
        note: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            load_id,
            carrier_id,
            status: RequestStatus::Pending,
            request_type,
            offered_rate,
            proposed_dates,
            note,
            decline_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Gate for accept/decline/withdraw: the request must still be pending.
    pub fn ensure_pending(&self) -> Result<(), EngineError> {
        match self.status {
            RequestStatus::Pending => Ok(()),
            RequestStatus::Accepted => Err(EngineError::RequestNotPending(self.id)),
            status => Err(EngineError::RequestTerminal {
                request_id: self.id,
                status,
            }),
        }
    }
}

/// Rate the load settles at when a request is accepted: the posted rate for
/// `accept_listed`, the carrier's offer for `counter_offer`.
pub fn effective_rate(request: &LoadRequest, load: &Load) -> Option<f64> {
    match request.request_type {
        RequestType::AcceptListed => load.rate,
        RequestType::CounterOffer => request.offered_rate.or(load.rate),
    }
}
