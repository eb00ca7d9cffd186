use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Marketplace posting state of a load.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PostingStatus {
    Draft,
    Posted,
}

impl PostingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Posted => "posted",
        }
    }
}

impl FromStr for PostingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "posted" => Ok(Self::Posted),
            other => Err(format!("unknown posting status: {}", other)),
        }
    }
}

/// How a load is offered on the marketplace.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PostingType {
    LiveLoad,
    Rfd,
    Pickup,
}

impl PostingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LiveLoad => "live_load",
            Self::Rfd => "rfd",
            Self::Pickup => "pickup",
        }
    }
}

impl FromStr for PostingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live_load" => Ok(Self::LiveLoad),
            "rfd" => Ok(Self::Rfd),
            "pickup" => Ok(Self::Pickup),
            other => Err(format!("unknown posting type: {}", other)),
        }
    }
}

/// Lifecycle status of a load. The delivery stages form a fixed forward-only
/// ordering; `cancelled` is reachable from any non-terminal stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    Pending,
    Accepted,
    Loading,
    Loaded,
    InTransit,
    Delivered,
    Cancelled,
}

impl LoadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::InTransit => "in_transit",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    /// Position in the delivery ordering. `cancelled` has no position.
    fn progress_rank(&self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Accepted => Some(1),
            Self::Loading => Some(2),
            Self::Loaded => Some(3),
            Self::InTransit => Some(4),
            Self::Delivered => Some(5),
            Self::Cancelled => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    /// Whether `next` is reachable from `self`: any strictly later delivery
    /// stage, or `cancelled` while not yet terminal.
    pub fn can_advance_to(&self, next: LoadStatus) -> bool {
        if next == Self::Cancelled {
            return !self.is_terminal();
        }
        match (self.progress_rank(), next.progress_rank()) {
            (Some(from), Some(to)) => to > from,
            _ => false,
        }
    }
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "loading" => Ok(Self::Loading),
            "loaded" => Ok(Self::Loaded),
            "in_transit" => Ok(Self::InTransit),
            "delivered" => Ok(Self::Delivered),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown load status: {}", other)),
        }
    }
}

/// A shippable unit requiring pickup and delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Load {
    pub id: Uuid,
    pub company_id: Uuid,
    /// Broker/partner company that listed the load on the owner's behalf.
    pub posted_by_company_id: Option<Uuid>,
    pub posting_status: PostingStatus,
    pub visible: bool,
    pub posting_type: Option<PostingType>,
    pub posted_at: Option<DateTime<Utc>>,
    pub status: LoadStatus,
    pub origin_city: Option<String>,
    pub destination_city: Option<String>,
    pub cubic_feet: Option<f64>,
    pub weight_lbs: Option<f64>,
    /// Listed rate per cubic foot.
    pub rate: Option<f64>,
    pub rate_negotiable: bool,
    /// Rate locked in when a carrier request is accepted.
    pub agreed_rate: Option<f64>,
    /// Date the load becomes ready for delivery.
    pub rfd_date: Option<NaiveDate>,
    pub assigned_carrier_id: Option<Uuid>,
    pub assigned_driver_id: Option<Uuid>,
    pub assigned_driver_name: Option<String>,
    pub assigned_driver_phone: Option<String>,
    pub assigned_truck_id: Option<Uuid>,
    pub assigned_trailer_id: Option<Uuid>,
    /// 1-based position in the assigned trip's stop sequence.
    pub delivery_order: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller-supplied fields for a new load.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoadDraft {
    pub posted_by_company_id: Option<Uuid>,
    pub origin_city: Option<String>,
    pub destination_city: Option<String>,
    pub cubic_feet: Option<f64>,
    pub weight_lbs: Option<f64>,
    pub rate: Option<f64>,
    #[serde(default)]
    pub rate_negotiable: bool,
    pub rfd_date: Option<NaiveDate>,
}

impl Load {
    /// Create an unposted load at the start of its lifecycle.
    pub fn new(company_id: Uuid, draft: LoadDraft) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            company_id,
            posted_by_company_id: draft.posted_by_company_id,
            posting_status: PostingStatus::Draft,
            visible: false,
            posting_type: None,
            posted_at: None,
            status: LoadStatus::Pending,
            origin_city: draft.origin_city,
            destination_city: draft.destination_city,
            cubic_feet: draft.cubic_feet,
            weight_lbs: draft.weight_lbs,
            rate: draft.rate,
            rate_negotiable: draft.rate_negotiable,
            agreed_rate: None,
            rfd_date: draft.rfd_date,
            assigned_carrier_id: None,
            assigned_driver_id: None,
            assigned_driver_name: None,
            assigned_driver_phone: None,
            assigned_truck_id: None,
            assigned_trailer_id: None,
            delivery_order: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_carrier(&self) -> bool {
        self.assigned_carrier_id.is_some()
    }

    /// Open for new carrier requests.
    pub fn accepts_requests(&self) -> bool {
        self.posting_status == PostingStatus::Posted && self.visible
    }

    /// A confirmed carrier assignment may only be reversed before loading
    /// completes.
    pub fn assignment_cancellable(&self) -> bool {
        matches!(self.status, LoadStatus::Accepted | LoadStatus::Loading)
    }

    /// Clear driver/equipment references and trip ordering.
    pub fn clear_assignment(&mut self) {
        self.assigned_driver_id = None;
        self.assigned_driver_name = None;
        self.assigned_driver_phone = None;
        self.assigned_truck_id = None;
        self.assigned_trailer_id = None;
        self.delivery_order = None;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_only_ordering() {
        assert!(LoadStatus::Pending.can_advance_to(LoadStatus::Accepted));
        assert!(LoadStatus::Loading.can_advance_to(LoadStatus::InTransit));
        assert!(LoadStatus::InTransit.can_advance_to(LoadStatus::Delivered));

        // Backwards and same-stage moves are out of order
        assert!(!LoadStatus::Loaded.can_advance_to(LoadStatus::Loading));
        assert!(!LoadStatus::Accepted.can_advance_to(LoadStatus::Accepted));
        assert!(!LoadStatus::Delivered.can_advance_to(LoadStatus::InTransit));
    }

    #[test]
    fn test_cancel_reachability() {
        assert!(LoadStatus::Pending.can_advance_to(LoadStatus::Cancelled));
        assert!(LoadStatus::InTransit.can_advance_to(LoadStatus::Cancelled));
        assert!(!LoadStatus::Delivered.can_advance_to(LoadStatus::Cancelled));
        assert!(!LoadStatus::Cancelled.can_advance_to(LoadStatus::Cancelled));
        // Nothing leaves cancelled
        assert!(!LoadStatus::Cancelled.can_advance_to(LoadStatus::Pending));
    }

    #[test]
    fn test_new_load_is_unposted_and_pending() {
        let load = Load::new(Uuid::new_v4(), LoadDraft::default());
        assert_eq!(load.posting_status, PostingStatus::Draft);
        assert!(!load.visible);
        assert_eq!(load.status, LoadStatus::Pending);
        assert!(!load.has_carrier());
        assert!(!load.accepts_requests());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            LoadStatus::Pending,
            LoadStatus::Accepted,
            LoadStatus::Loading,
            LoadStatus::Loaded,
            LoadStatus::InTransit,
            LoadStatus::Delivered,
            LoadStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<LoadStatus>().unwrap(), status);
        }
    }
}
