use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Who fronted the money for a trip expense. Drives settlement net-pay
/// math: `driver_personal` is reimbursed, `driver_cash` is cash the driver
/// collected on the company's behalf and owes back.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaidBy {
    DriverPersonal,
    DriverCash,
    CompanyCard,
    FuelCard,
}

impl PaidBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DriverPersonal => "driver_personal",
            Self::DriverCash => "driver_cash",
            Self::CompanyCard => "company_card",
            Self::FuelCard => "fuel_card",
        }
    }
}

impl FromStr for PaidBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "driver_personal" => Ok(Self::DriverPersonal),
            "driver_cash" => Ok(Self::DriverCash),
            "company_card" => Ok(Self::CompanyCard),
            "fuel_card" => Ok(Self::FuelCard),
            other => Err(format!("unknown paid_by: {}", other)),
        }
    }
}

/// An expense incurred on a trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripExpense {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub category: String,
    pub amount: f64,
    pub paid_by: PaidBy,
    pub note: Option<String>,
    pub incurred_at: DateTime<Utc>,
}

impl TripExpense {
    pub fn new(trip_id: Uuid, category: String, amount: f64, paid_by: PaidBy) -> Self {
        Self {
            id: Uuid::new_v4(),
            trip_id,
            category,
            amount,
            paid_by,
            note: None,
            incurred_at: Utc::now(),
        }
    }
}
