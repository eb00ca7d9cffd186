use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Planned,
    Active,
    EnRoute,
    Completed,
    Settled,
    Cancelled,
}

impl TripStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Active => "active",
            Self::EnRoute => "en_route",
            Self::Completed => "completed",
            Self::Settled => "settled",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TripStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planned" => Ok(Self::Planned),
            "active" => Ok(Self::Active),
            "en_route" => Ok(Self::EnRoute),
            "completed" => Ok(Self::Completed),
            "settled" => Ok(Self::Settled),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown trip status: {}", other)),
        }
    }
}

/// Equipment class of the assigned truck. Tractors pull a trailer; box
/// trucks carry the freight themselves.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TruckKind {
    Tractor,
    BoxTruck,
}

impl TruckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tractor => "tractor",
            Self::BoxTruck => "box_truck",
        }
    }
}

impl FromStr for TruckKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tractor" => Ok(Self::Tractor),
            "box_truck" => Ok(Self::BoxTruck),
            other => Err(format!("unknown truck kind: {}", other)),
        }
    }
}

/// How the driver is paid for a trip.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PayMode {
    PerMile,
    PerCuft,
    PerMileAndCuft,
    PercentOfRevenue,
    FlatDailyRate,
}

impl PayMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PerMile => "per_mile",
            Self::PerCuft => "per_cuft",
            Self::PerMileAndCuft => "per_mile_and_cuft",
            Self::PercentOfRevenue => "percent_of_revenue",
            Self::FlatDailyRate => "flat_daily_rate",
        }
    }
}

impl FromStr for PayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per_mile" => Ok(Self::PerMile),
            "per_cuft" => Ok(Self::PerCuft),
            "per_mile_and_cuft" => Ok(Self::PerMileAndCuft),
            "percent_of_revenue" => Ok(Self::PercentOfRevenue),
            "flat_daily_rate" => Ok(Self::FlatDailyRate),
            other => Err(format!("unknown pay mode: {}", other)),
        }
    }
}

/// Pay-mode parameters carried on a trip. Absent values are treated as zero
/// by the settlement calculator.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PayTerms {
    pub mode: Option<PayMode>,
    pub rate_per_mile: Option<f64>,
    pub rate_per_cuft: Option<f64>,
    pub percent_of_revenue: Option<f64>,
    pub flat_daily_rate: Option<f64>,
}

/// A driver-and-equipment-bound run carrying one or more loads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    pub id: Uuid,
    pub company_id: Uuid,
    pub trip_number: String,
    pub status: TripStatus,
    pub driver_id: Option<Uuid>,
    pub driver_name: Option<String>,
    pub driver_phone: Option<String>,
    pub truck_id: Option<Uuid>,
    pub truck_kind: Option<TruckKind>,
    pub trailer_id: Option<Uuid>,
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub total_miles: Option<f64>,
    pub total_revenue: Option<f64>,
    pub driver_pay: Option<f64>,
    pub profit: Option<f64>,
    #[serde(flatten)]
    pub pay: PayTerms,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller-supplied fields for a new trip. A missing `trip_number` is
/// allocated by the store (`TRP-%04d`, sequential per owner).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TripDraft {
    pub trip_number: Option<String>,
    pub driver_id: Option<Uuid>,
    pub driver_name: Option<String>,
    pub driver_phone: Option<String>,
    pub truck_id: Option<Uuid>,
    pub truck_kind: Option<TruckKind>,
    pub trailer_id: Option<Uuid>,
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub total_miles: Option<f64>,
    #[serde(default)]
    pub pay: PayTerms,
}

impl Trip {
    pub fn new(company_id: Uuid, trip_number: String, draft: TripDraft) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            company_id,
            trip_number,
            status: TripStatus::Planned,
            driver_id: draft.driver_id,
            driver_name: draft.driver_name,
            driver_phone: draft.driver_phone,
            truck_id: draft.truck_id,
            truck_kind: draft.truck_kind,
            trailer_id: draft.trailer_id,
            origin: draft.origin,
            destination: draft.destination,
            start_date: draft.start_date,
            end_date: draft.end_date,
            total_miles: draft.total_miles,
            total_revenue: None,
            driver_pay: None,
            profit: None,
            pay: draft.pay,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Role a load plays at its stop on a trip.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopRole {
    Delivery,
    Pickup,
}

impl Default for StopRole {
    fn default() -> Self {
        Self::Delivery
    }
}

impl StopRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivery => "delivery",
            Self::Pickup => "pickup",
        }
    }
}

impl FromStr for StopRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delivery" => Ok(Self::Delivery),
            "pickup" => Ok(Self::Pickup),
            other => Err(format!("unknown stop role: {}", other)),
        }
    }
}

/// The ordered assignment record linking a load to a trip. Sequence indices
/// within a trip are zero-based, dense and contiguous.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripLoad {
    pub trip_id: Uuid,
    pub load_id: Uuid,
    pub sequence_index: i32,
    pub role: StopRole,
    pub added_at: DateTime<Utc>,
}

impl TripLoad {
    pub fn new(trip_id: Uuid, load_id: Uuid, sequence_index: i32, role: StopRole) -> Self {
        Self {
            trip_id,
            load_id,
            sequence_index,
            role,
            added_at: Utc::now(),
        }
    }
}
