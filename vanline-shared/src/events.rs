use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Emitted after a committed mutation touching a load row.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoadChangedEvent {
    pub load_id: Uuid,
    pub company_id: Uuid,
    pub status: String,
    pub occurred_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RequestChangedEvent {
    pub request_id: Uuid,
    pub load_id: Uuid,
    pub carrier_id: Uuid,
    pub status: String,
    pub occurred_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TripChangedEvent {
    pub trip_id: Uuid,
    pub company_id: Uuid,
    pub status: String,
    pub occurred_at: i64,
}

/// Envelope for the change-notifier bus. Downstream consumers use these for
/// cache invalidation; delivery guarantees are theirs, not ours.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    LoadChanged(LoadChangedEvent),
    RequestChanged(RequestChangedEvent),
    TripChanged(TripChangedEvent),
}

impl DomainEvent {
    pub fn load_changed(load_id: Uuid, company_id: Uuid, status: impl Into<String>) -> Self {
        Self::LoadChanged(LoadChangedEvent {
            load_id,
            company_id,
            status: status.into(),
            occurred_at: Utc::now().timestamp(),
        })
    }

    pub fn request_changed(
        request_id: Uuid,
        load_id: Uuid,
        carrier_id: Uuid,
        status: impl Into<String>,
    ) -> Self {
        Self::RequestChanged(RequestChangedEvent {
            request_id,
            load_id,
            carrier_id,
            status: status.into(),
            occurred_at: Utc::now().timestamp(),
        })
    }

    pub fn trip_changed(trip_id: Uuid, company_id: Uuid, status: impl Into<String>) -> Self {
        Self::TripChanged(TripChangedEvent {
            trip_id,
            company_id,
            status: status.into(),
            occurred_at: Utc::now().timestamp(),
        })
    }

    /// Kafka topic this event is published to.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::LoadChanged(_) => "loads.changed",
            Self::RequestChanged(_) => "requests.changed",
            Self::TripChanged(_) => "trips.changed",
        }
    }

    /// Partition key: the affected entity id.
    pub fn key(&self) -> Uuid {
        match self {
            Self::LoadChanged(e) => e.load_id,
            Self::RequestChanged(e) => e.request_id,
            Self::TripChanged(e) => e.trip_id,
        }
    }
}
