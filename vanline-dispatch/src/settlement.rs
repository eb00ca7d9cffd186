use crate::emit;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;
use vanline_core::auth::ensure_can_manage_trip;
use vanline_core::repository::{ChangeNotifier, LedgerStore, SettlementUpdate};
use vanline_core::{EngineError, Load, PaidBy, PayMode, PayTerms, Trip, TripExpense, TripStatus};
use vanline_shared::DomainEvent;

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Aggregates a trip's pay drivers: mileage from the trip itself, volume
/// and revenue from the loads it carries.
#[derive(Debug, Clone, Copy, Default)]
pub struct TripTotals {
    pub miles: Option<f64>,
    pub cubic_feet: Option<f64>,
    pub revenue: Option<f64>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl TripTotals {
    pub fn from_trip(trip: &Trip, loads: &[Load]) -> Self {
        let cubic_feet: f64 = loads.iter().filter_map(|l| l.cubic_feet).sum();
        let revenue: f64 = loads.iter().map(load_revenue).sum();
        Self {
            miles: trip.total_miles,
            cubic_feet: Some(cubic_feet),
            revenue: Some(revenue),
            start_date: trip.start_date,
            end_date: trip.end_date,
        }
    }
}

/// A load's revenue contribution: the locked-in rate (falling back to the
/// listed rate) times its volume.
fn load_revenue(load: &Load) -> f64 {
    let rate = load.agreed_rate.or(load.rate).unwrap_or(0.0);
    rate * load.cubic_feet.unwrap_or(0.0)
}

/// Inclusive day count of a trip span: ceil of the elapsed days plus one,
/// never less than a single day.
fn inclusive_days(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> i64 {
    match (start, end) {
        (Some(start), Some(end)) => {
            let millis = (end - start).num_milliseconds();
            // i64::div_ceil is unstable on stable Rust (int_roundings);
            // replicate its exact semantics inline.
            let days = {
                let d = millis / MILLIS_PER_DAY;
                let r = millis % MILLIS_PER_DAY;
                if (r > 0 && MILLIS_PER_DAY > 0) || (r < 0 && MILLIS_PER_DAY < 0) {
                    d + 1
                } else {
                    d
                }
            };
            (days + 1).max(1)
        }
        // Missing dates: single-day assumption
        _ => 1,
    }
}

/// Driver gross pay for a trip. Deterministic and side-effect-free; absent
/// rates and totals count as zero, an absent mode pays nothing.
pub fn gross_pay(terms: &PayTerms, totals: &TripTotals) -> f64 {
    let miles = totals.miles.unwrap_or(0.0);
    let cubic_feet = totals.cubic_feet.unwrap_or(0.0);
    match terms.mode {
        Some(PayMode::PerMile) => terms.rate_per_mile.unwrap_or(0.0) * miles,
        Some(PayMode::PerCuft) => terms.rate_per_cuft.unwrap_or(0.0) * cubic_feet,
        Some(PayMode::PerMileAndCuft) => {
            terms.rate_per_mile.unwrap_or(0.0) * miles
                + terms.rate_per_cuft.unwrap_or(0.0) * cubic_feet
        }
        Some(PayMode::PercentOfRevenue) => {
            terms.percent_of_revenue.unwrap_or(0.0) / 100.0 * totals.revenue.unwrap_or(0.0)
        }
        Some(PayMode::FlatDailyRate) => {
            let rate = terms.flat_daily_rate.unwrap_or(0.0);
            rate * inclusive_days(totals.start_date, totals.end_date) as f64
        }
        None => 0.0,
    }
}

/// Out-of-pocket expenses the company owes back to the driver.
pub fn reimbursable_total(expenses: &[TripExpense]) -> f64 {
    expenses
        .iter()
        .filter(|e| e.paid_by == PaidBy::DriverPersonal)
        .map(|e| e.amount)
        .sum()
}

/// Cash the driver collected on the company's behalf; deducted from pay,
/// not paid twice.
pub fn cash_collected_total(expenses: &[TripExpense]) -> f64 {
    expenses
        .iter()
        .filter(|e| e.paid_by == PaidBy::DriverCash)
        .map(|e| e.amount)
        .sum()
}

/// Net driver pay: gross plus reimbursements minus collected cash.
pub fn net_pay(gross: f64, expenses: &[TripExpense]) -> f64 {
    gross + reimbursable_total(expenses) - cash_collected_total(expenses)
}

/// Expenses the company ultimately bears: card spend plus reimbursed
/// driver outlays.
fn company_borne_total(expenses: &[TripExpense]) -> f64 {
    expenses
        .iter()
        .filter(|e| {
            matches!(
                e.paid_by,
                PaidBy::CompanyCard | PaidBy::FuelCard | PaidBy::DriverPersonal
            )
        })
        .map(|e| e.amount)
        .sum()
}

/// Derives and finalizes driver pay for a completed trip.
pub struct SettlementService {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn ChangeNotifier>,
}

impl SettlementService {
    pub fn new(store: Arc<dyn LedgerStore>, notifier: Arc<dyn ChangeNotifier>) -> Self {
        Self { store, notifier }
    }

    /// Settle a completed trip: aggregate its loads and expenses, compute
    /// gross/net pay and profit, persist the figures and move the trip to
    /// `settled`.
    pub async fn settle_trip(&self, actor: Uuid, trip_id: Uuid) -> Result<Trip, EngineError> {
        let trip = self.store.trip(trip_id).await?;
        ensure_can_manage_trip(actor, &trip)?;
        if trip.status != TripStatus::Completed {
            return Err(EngineError::Validation(format!(
                "trip {} must be completed before settlement, is {}",
                trip_id, trip.status
            )));
        }

        let loads = self.store.loads_for_trip(trip_id).await?;
        let expenses = self.store.expenses_for_trip(trip_id).await?;

        let totals = TripTotals::from_trip(&trip, &loads);
        let gross = gross_pay(&trip.pay, &totals);
        let driver_pay = net_pay(gross, &expenses);
        let revenue = totals.revenue.unwrap_or(0.0);
        let profit = revenue - gross - company_borne_total(&expenses);

        let trip = self
            .store
            .record_settlement(
                trip_id,
                SettlementUpdate {
                    total_revenue: revenue,
                    driver_pay,
                    profit,
                },
            )
            .await?;

        tracing::info!(
            trip_id = %trip_id,
            gross,
            driver_pay,
            profit,
            "trip settled"
        );
        emit(
            self.notifier.as_ref(),
            DomainEvent::trip_changed(trip.id, trip.company_id, "settled"),
        )
        .await;
        Ok(trip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn terms(mode: PayMode) -> PayTerms {
        PayTerms {
            mode: Some(mode),
            rate_per_mile: Some(2.0),
            rate_per_cuft: Some(0.55),
            percent_of_revenue: Some(25.0),
            flat_daily_rate: Some(150.0),
        }
    }

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_per_mile() {
        let totals = TripTotals {
            miles: Some(500.0),
            ..TripTotals::default()
        };
        assert_eq!(gross_pay(&terms(PayMode::PerMile), &totals), 1000.0);
    }

    #[test]
    fn test_per_cuft() {
        let totals = TripTotals {
            cubic_feet: Some(1000.0),
            ..TripTotals::default()
        };
        assert_eq!(gross_pay(&terms(PayMode::PerCuft), &totals), 550.0);
    }

    #[test]
    fn test_per_mile_and_cuft_sums_both() {
        let totals = TripTotals {
            miles: Some(500.0),
            cubic_feet: Some(1000.0),
            ..TripTotals::default()
        };
        assert_eq!(gross_pay(&terms(PayMode::PerMileAndCuft), &totals), 1550.0);
    }

    #[test]
    fn test_percent_of_revenue() {
        let totals = TripTotals {
            revenue: Some(8000.0),
            ..TripTotals::default()
        };
        assert_eq!(gross_pay(&terms(PayMode::PercentOfRevenue), &totals), 2000.0);
    }

    #[test]
    fn test_flat_daily_rate_inclusive_days() {
        // Jan 1 through Jan 3 is three inclusive days
        let totals = TripTotals {
            start_date: Some(utc(2024, 1, 1)),
            end_date: Some(utc(2024, 1, 3)),
            ..TripTotals::default()
        };
        assert_eq!(gross_pay(&terms(PayMode::FlatDailyRate), &totals), 450.0);
    }

    #[test]
    fn test_flat_daily_rate_partial_day_rounds_up() {
        // A 36-hour span spills into a third inclusive day
        let start = utc(2024, 3, 10);
        let end = start + chrono::Duration::hours(36);
        let totals = TripTotals {
            start_date: Some(start),
            end_date: Some(end),
            ..TripTotals::default()
        };
        assert_eq!(gross_pay(&terms(PayMode::FlatDailyRate), &totals), 450.0);
    }

    #[test]
    fn test_flat_daily_rate_same_day() {
        let day = utc(2024, 6, 1);
        let totals = TripTotals {
            start_date: Some(day),
            end_date: Some(day),
            ..TripTotals::default()
        };
        assert_eq!(gross_pay(&terms(PayMode::FlatDailyRate), &totals), 150.0);
    }

    #[test]
    fn test_flat_daily_rate_missing_dates_pays_single_day() {
        assert_eq!(
            gross_pay(&terms(PayMode::FlatDailyRate), &TripTotals::default()),
            150.0
        );
        let only_start = TripTotals {
            start_date: Some(utc(2024, 1, 1)),
            ..TripTotals::default()
        };
        assert_eq!(gross_pay(&terms(PayMode::FlatDailyRate), &only_start), 150.0);
    }

    #[test]
    fn test_flat_daily_rate_inverted_span_clamps_to_one_day() {
        let totals = TripTotals {
            start_date: Some(utc(2024, 1, 5)),
            end_date: Some(utc(2024, 1, 1)),
            ..TripTotals::default()
        };
        assert_eq!(gross_pay(&terms(PayMode::FlatDailyRate), &totals), 150.0);
    }

    #[test]
    fn test_missing_mode_pays_nothing() {
        let totals = TripTotals {
            miles: Some(500.0),
            cubic_feet: Some(1000.0),
            revenue: Some(8000.0),
            ..TripTotals::default()
        };
        let no_mode = PayTerms {
            mode: None,
            ..terms(PayMode::PerMile)
        };
        assert_eq!(gross_pay(&no_mode, &totals), 0.0);
    }

    #[test]
    fn test_missing_rates_and_totals_count_as_zero() {
        let empty = PayTerms {
            mode: Some(PayMode::PerMile),
            ..PayTerms::default()
        };
        let totals = TripTotals {
            miles: Some(500.0),
            ..TripTotals::default()
        };
        assert_eq!(gross_pay(&empty, &totals), 0.0);

        // Rate without miles
        let totals = TripTotals::default();
        assert_eq!(gross_pay(&terms(PayMode::PerMile), &totals), 0.0);
        assert_eq!(gross_pay(&terms(PayMode::PerCuft), &totals), 0.0);
        assert_eq!(gross_pay(&terms(PayMode::PercentOfRevenue), &totals), 0.0);
    }

    #[test]
    fn test_net_pay_reimburses_and_deducts_cash() {
        let trip_id = Uuid::new_v4();
        let expenses = vec![
            TripExpense::new(trip_id, "tolls".into(), 50.0, PaidBy::DriverPersonal),
            TripExpense::new(trip_id, "delivery_cash".into(), 200.0, PaidBy::DriverCash),
            // Card spend never touches driver pay
            TripExpense::new(trip_id, "fuel".into(), 300.0, PaidBy::FuelCard),
            TripExpense::new(trip_id, "lodging".into(), 120.0, PaidBy::CompanyCard),
        ];
        assert_eq!(net_pay(1000.0, &expenses), 850.0);
    }

    #[test]
    fn test_net_pay_no_expenses() {
        assert_eq!(net_pay(1000.0, &[]), 1000.0);
    }

    #[test]
    fn test_company_borne_includes_cards_and_reimbursements() {
        let trip_id = Uuid::new_v4();
        let expenses = vec![
            TripExpense::new(trip_id, "tolls".into(), 50.0, PaidBy::DriverPersonal),
            TripExpense::new(trip_id, "delivery_cash".into(), 200.0, PaidBy::DriverCash),
            TripExpense::new(trip_id, "fuel".into(), 300.0, PaidBy::FuelCard),
        ];
        assert_eq!(company_borne_total(&expenses), 350.0);
    }

    #[test]
    fn test_trip_totals_aggregate_loads() {
        use vanline_core::{Load, LoadDraft, TripDraft};

        let company = Uuid::new_v4();
        let mut trip = Trip::new(company, "TRP-0001".into(), TripDraft::default());
        trip.total_miles = Some(850.0);

        let mut first = Load::new(
            company,
            LoadDraft {
                cubic_feet: Some(400.0),
                rate: Some(4.0),
                ..LoadDraft::default()
            },
        );
        first.agreed_rate = Some(3.5);
        let second = Load::new(
            company,
            LoadDraft {
                cubic_feet: Some(600.0),
                rate: Some(5.0),
                ..LoadDraft::default()
            },
        );

        let totals = TripTotals::from_trip(&trip, &[first, second]);
        assert_eq!(totals.miles, Some(850.0));
        assert_eq!(totals.cubic_feet, Some(1000.0));
        // 400 at the agreed 3.5 plus 600 at the listed 5.0
        assert_eq!(totals.revenue, Some(4400.0));
    }
}
