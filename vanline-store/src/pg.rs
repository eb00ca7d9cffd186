use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;
use vanline_core::repository::{
    AcceptOutcome, BoardCounts, CancelOutcome, CancellationRecord, LedgerStore, PostingUpdate,
    SettlementUpdate,
};
use vanline_core::request::effective_rate;
use vanline_core::{
    EngineError, Load, LoadRequest, LoadStatus, PayTerms, ProposedDates, RequestStatus, StopRole,
    Trip, TripDraft, TripExpense, TripLoad, TripStatus, TruckKind,
};

const LOAD_COLS: &str = "id, company_id, posted_by_company_id, posting_status, visible, \
     posting_type, posted_at, status, origin_city, destination_city, cubic_feet, weight_lbs, \
     rate, rate_negotiable, agreed_rate, rfd_date, assigned_carrier_id, assigned_driver_id, \
     assigned_driver_name, assigned_driver_phone, assigned_truck_id, assigned_trailer_id, \
     delivery_order, created_at, updated_at";

const REQUEST_COLS: &str = "id, load_id, carrier_id, status, request_type, offered_rate, \
     load_date_start, load_date_end, delivery_date_start, delivery_date_end, note, \
     decline_reason, created_at, updated_at";

const TRIP_COLS: &str = "id, company_id, trip_number, status, driver_id, driver_name, \
     driver_phone, truck_id, truck_kind, trailer_id, origin, destination, start_date, end_date, \
     total_miles, total_revenue, driver_pay, profit, pay_mode, rate_per_mile, rate_per_cuft, \
     percent_of_revenue, flat_daily_rate, created_at, updated_at";

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct LoadRow {
    id: Uuid,
    company_id: Uuid,
    posted_by_company_id: Option<Uuid>,
    posting_status: String,
    visible: bool,
    posting_type: Option<String>,
    posted_at: Option<DateTime<Utc>>,
    status: String,
    origin_city: Option<String>,
    destination_city: Option<String>,
    cubic_feet: Option<f64>,
    weight_lbs: Option<f64>,
    rate: Option<f64>,
    rate_negotiable: bool,
    agreed_rate: Option<f64>,
    rfd_date: Option<NaiveDate>,
    assigned_carrier_id: Option<Uuid>,
    assigned_driver_id: Option<Uuid>,
    assigned_driver_name: Option<String>,
    assigned_driver_phone: Option<String>,
    assigned_truck_id: Option<Uuid>,
    assigned_trailer_id: Option<Uuid>,
    delivery_order: Option<i32>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LoadRow> for Load {
    type Error = EngineError;

    fn try_from(row: LoadRow) -> Result<Self, Self::Error> {
        Ok(Load {
            id: row.id,
            company_id: row.company_id,
            posted_by_company_id: row.posted_by_company_id,
            posting_status: row.posting_status.parse().map_err(EngineError::Validation)?,
            visible: row.visible,
            posting_type: row
                .posting_type
                .map(|t| t.parse().map_err(EngineError::Validation))
                .transpose()?,
            posted_at: row.posted_at,
            status: row.status.parse().map_err(EngineError::Validation)?,
            origin_city: row.origin_city,
            destination_city: row.destination_city,
            cubic_feet: row.cubic_feet,
            weight_lbs: row.weight_lbs,
            rate: row.rate,
            rate_negotiable: row.rate_negotiable,
            agreed_rate: row.agreed_rate,
            rfd_date: row.rfd_date,
            assigned_carrier_id: row.assigned_carrier_id,
            assigned_driver_id: row.assigned_driver_id,
            assigned_driver_name: row.assigned_driver_name,
            assigned_driver_phone: row.assigned_driver_phone,
            assigned_truck_id: row.assigned_truck_id,
            assigned_trailer_id: row.assigned_trailer_id,
            delivery_order: row.delivery_order,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RequestRow {
    id: Uuid,
    load_id: Uuid,
    carrier_id: Uuid,
    status: String,
    request_type: String,
    offered_rate: Option<f64>,
    load_date_start: Option<NaiveDate>,
    load_date_end: Option<NaiveDate>,
    delivery_date_start: Option<NaiveDate>,
    delivery_date_end: Option<NaiveDate>,
    note: Option<String>,
    decline_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RequestRow> for LoadRequest {
    type Error = EngineError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        Ok(LoadRequest {
            id: row.id,
            load_id: row.load_id,
            carrier_id: row.carrier_id,
            status: row.status.parse().map_err(EngineError::Validation)?,
            request_type: row.request_type.parse().map_err(EngineError::Validation)?,
            offered_rate: row.offered_rate,
            proposed_dates: ProposedDates {
                load_start: row.load_date_start,
                load_end: row.load_date_end,
                delivery_start: row.delivery_date_start,
                delivery_end: row.delivery_date_end,
            },
            note: row.note,
            decline_reason: row.decline_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TripRow {
    id: Uuid,
    company_id: Uuid,
    trip_number: String,
    status: String,
    driver_id: Option<Uuid>,
    driver_name: Option<String>,
    driver_phone: Option<String>,
    truck_id: Option<Uuid>,
    truck_kind: Option<String>,
    trailer_id: Option<Uuid>,
    origin: Option<String>,
    destination: Option<String>,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    total_miles: Option<f64>,
    total_revenue: Option<f64>,
    driver_pay: Option<f64>,
    profit: Option<f64>,
    pay_mode: Option<String>,
    rate_per_mile: Option<f64>,
    rate_per_cuft: Option<f64>,
    percent_of_revenue: Option<f64>,
    flat_daily_rate: Option<f64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TripRow> for Trip {
    type Error = EngineError;

    fn try_from(row: TripRow) -> Result<Self, Self::Error> {
        Ok(Trip {
            id: row.id,
            company_id: row.company_id,
            trip_number: row.trip_number,
            status: row.status.parse().map_err(EngineError::Validation)?,
            driver_id: row.driver_id,
            driver_name: row.driver_name,
            driver_phone: row.driver_phone,
            truck_id: row.truck_id,
            truck_kind: row
                .truck_kind
                .map(|k| k.parse().map_err(EngineError::Validation))
                .transpose()?,
            trailer_id: row.trailer_id,
            origin: row.origin,
            destination: row.destination,
            start_date: row.start_date,
            end_date: row.end_date,
            total_miles: row.total_miles,
            total_revenue: row.total_revenue,
            driver_pay: row.driver_pay,
            profit: row.profit,
            pay: PayTerms {
                mode: row
                    .pay_mode
                    .map(|m| m.parse().map_err(EngineError::Validation))
                    .transpose()?,
                rate_per_mile: row.rate_per_mile,
                rate_per_cuft: row.rate_per_cuft,
                percent_of_revenue: row.percent_of_revenue,
                flat_daily_rate: row.flat_daily_rate,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TripLoadRow {
    trip_id: Uuid,
    load_id: Uuid,
    sequence_index: i32,
    role: String,
    added_at: DateTime<Utc>,
}

impl TryFrom<TripLoadRow> for TripLoad {
    type Error = EngineError;

    fn try_from(row: TripLoadRow) -> Result<Self, Self::Error> {
        Ok(TripLoad {
            trip_id: row.trip_id,
            load_id: row.load_id,
            sequence_index: row.sequence_index,
            role: row.role.parse().map_err(EngineError::Validation)?,
            added_at: row.added_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ExpenseRow {
    id: Uuid,
    trip_id: Uuid,
    category: String,
    amount: f64,
    paid_by: String,
    note: Option<String>,
    incurred_at: DateTime<Utc>,
}

impl TryFrom<ExpenseRow> for TripExpense {
    type Error = EngineError;

    fn try_from(row: ExpenseRow) -> Result<Self, Self::Error> {
        Ok(TripExpense {
            id: row.id,
            trip_id: row.trip_id,
            category: row.category,
            amount: row.amount,
            paid_by: row.paid_by.parse().map_err(EngineError::Validation)?,
            note: row.note,
            incurred_at: row.incurred_at,
        })
    }
}

fn map_err(err: sqlx::Error) -> EngineError {
    EngineError::StoreUnavailable(err.to_string())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Postgres-backed ledger. Every multi-row mutation runs in one
/// transaction; status-conditional updates re-check row state so
/// concurrent callers race safely.
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_load(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        for_update: bool,
    ) -> Result<Load, EngineError> {
        let sql = format!(
            "SELECT {} FROM loads WHERE id = $1{}",
            LOAD_COLS,
            if for_update { " FOR UPDATE" } else { "" }
        );
        let row = sqlx::query_as::<_, LoadRow>(&sql)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(map_err)?
            .ok_or_else(|| EngineError::not_found("load", id))?;
        row.try_into()
    }

    async fn fetch_request(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        for_update: bool,
    ) -> Result<LoadRequest, EngineError> {
        let sql = format!(
            "SELECT {} FROM load_requests WHERE id = $1{}",
            REQUEST_COLS,
            if for_update { " FOR UPDATE" } else { "" }
        );
        let row = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(map_err)?
            .ok_or_else(|| EngineError::not_found("request", id))?;
        row.try_into()
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn insert_load(&self, load: &Load) -> Result<(), EngineError> {
        let sql = format!(
            "INSERT INTO loads ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, \
             $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25)",
            LOAD_COLS
        );
        sqlx::query(&sql)
            .bind(load.id)
            .bind(load.company_id)
            .bind(load.posted_by_company_id)
            .bind(load.posting_status.as_str())
            .bind(load.visible)
            .bind(load.posting_type.map(|t| t.as_str()))
            .bind(load.posted_at)
            .bind(load.status.as_str())
            .bind(&load.origin_city)
            .bind(&load.destination_city)
            .bind(load.cubic_feet)
            .bind(load.weight_lbs)
            .bind(load.rate)
            .bind(load.rate_negotiable)
            .bind(load.agreed_rate)
            .bind(load.rfd_date)
            .bind(load.assigned_carrier_id)
            .bind(load.assigned_driver_id)
            .bind(&load.assigned_driver_name)
            .bind(&load.assigned_driver_phone)
            .bind(load.assigned_truck_id)
            .bind(load.assigned_trailer_id)
            .bind(load.delivery_order)
            .bind(load.created_at)
            .bind(load.updated_at)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Load, EngineError> {
        let sql = format!("SELECT {} FROM loads WHERE id = $1", LOAD_COLS);
        let row = sqlx::query_as::<_, LoadRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?
            .ok_or_else(|| EngineError::not_found("load", id))?;
        row.try_into()
    }

    async fn update_posting(
        &self,
        load_id: Uuid,
        update: PostingUpdate,
    ) -> Result<Load, EngineError> {
        let sql = format!(
            "UPDATE loads SET posting_status = $2, visible = $3, \
             posting_type = COALESCE($4, posting_type), posted_at = COALESCE($5, posted_at), \
             updated_at = NOW() WHERE id = $1 RETURNING {}",
            LOAD_COLS
        );
        let row = sqlx::query_as::<_, LoadRow>(&sql)
            .bind(load_id)
            .bind(update.posting_status.as_str())
            .bind(update.visible)
            .bind(update.posting_type.map(|t| t.as_str()))
            .bind(update.posted_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?
            .ok_or_else(|| EngineError::not_found("load", load_id))?;
        row.try_into()
    }

    async fn advance_load_status(
        &self,
        load_id: Uuid,
        from: LoadStatus,
        to: LoadStatus,
    ) -> Result<Load, EngineError> {
        let sql = format!(
            "UPDATE loads SET status = $3, updated_at = NOW() \
             WHERE id = $1 AND status = $2 RETURNING {}",
            LOAD_COLS
        );
        let updated = sqlx::query_as::<_, LoadRow>(&sql)
            .bind(load_id)
            .bind(from.as_str())
            .bind(to.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;

        match updated {
            Some(row) => row.try_into(),
            // Lost a race or the caller saw stale state; report the
            // transition from where the row actually is.
            None => {
                let current = self.load(load_id).await?;
                Err(EngineError::InvalidTransition {
                    from: current.status,
                    to,
                })
            }
        }
    }

    async fn insert_request(&self, request: &LoadRequest) -> Result<(), EngineError> {
        let sql = format!(
            "INSERT INTO load_requests ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, \
             $11, $12, $13, $14)",
            REQUEST_COLS
        );
        sqlx::query(&sql)
            .bind(request.id)
            .bind(request.load_id)
            .bind(request.carrier_id)
            .bind(request.status.as_str())
            .bind(request.request_type.as_str())
            .bind(request.offered_rate)
            .bind(request.proposed_dates.load_start)
            .bind(request.proposed_dates.load_end)
            .bind(request.proposed_dates.delivery_start)
            .bind(request.proposed_dates.delivery_end)
            .bind(&request.note)
            .bind(&request.decline_reason)
            .bind(request.created_at)
            .bind(request.updated_at)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn request(&self, id: Uuid) -> Result<LoadRequest, EngineError> {
        let sql = format!("SELECT {} FROM load_requests WHERE id = $1", REQUEST_COLS);
        let row = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?
            .ok_or_else(|| EngineError::not_found("request", id))?;
        row.try_into()
    }

    async fn requests_for_load(&self, load_id: Uuid) -> Result<Vec<LoadRequest>, EngineError> {
        let sql = format!(
            "SELECT {} FROM load_requests WHERE load_id = $1 ORDER BY created_at",
            REQUEST_COLS
        );
        let rows = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(load_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn accept_request(&self, request_id: Uuid) -> Result<AcceptOutcome, EngineError> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;

        let request = Self::fetch_request(&mut tx, request_id, true).await?;
        request.ensure_pending()?;
        let load = Self::fetch_load(&mut tx, request.load_id, true).await?;
        let agreed = effective_rate(&request, &load);

        let sql = format!(
            "UPDATE load_requests SET status = 'accepted', updated_at = NOW() \
             WHERE id = $1 RETURNING {}",
            REQUEST_COLS
        );
        let accepted: LoadRequest = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(request_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|err| {
                // The partial unique index backstops the FOR UPDATE gate
                if is_unique_violation(&err) {
                    EngineError::RequestNotPending(request_id)
                } else {
                    map_err(err)
                }
            })?
            .try_into()?;

        let sql = format!(
            "UPDATE load_requests SET status = 'declined', \
             decline_reason = 'another request accepted', updated_at = NOW() \
             WHERE load_id = $1 AND id <> $2 AND status = 'pending' RETURNING {}",
            REQUEST_COLS
        );
        let declined = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(request.load_id)
            .bind(request_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(map_err)?
            .into_iter()
            .map(TryInto::try_into)
            .collect::<Result<Vec<LoadRequest>, _>>()?;

        let sql = format!(
            "UPDATE loads SET assigned_carrier_id = $2, status = 'accepted', visible = FALSE, \
             agreed_rate = $3, updated_at = NOW() WHERE id = $1 RETURNING {}",
            LOAD_COLS
        );
        let load: Load = sqlx::query_as::<_, LoadRow>(&sql)
            .bind(request.load_id)
            .bind(accepted.carrier_id)
            .bind(agreed)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_err)?
            .try_into()?;

        tx.commit().await.map_err(map_err)?;
        Ok(AcceptOutcome {
            request: accepted,
            load,
            declined,
        })
    }

    async fn close_request(
        &self,
        request_id: Uuid,
        to: RequestStatus,
        reason: Option<String>,
    ) -> Result<LoadRequest, EngineError> {
        let sql = format!(
            "UPDATE load_requests SET status = $2, decline_reason = COALESCE($3, decline_reason), \
             updated_at = NOW() WHERE id = $1 AND status = 'pending' RETURNING {}",
            REQUEST_COLS
        );
        let updated = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(request_id)
            .bind(to.as_str())
            .bind(reason)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;

        match updated {
            Some(row) => row.try_into(),
            None => {
                let current = self.request(request_id).await?;
                current.ensure_pending()?;
                // A pending row that failed the conditional write lost a
                // race that has since resolved; report it the same way.
                Err(EngineError::RequestNotPending(request_id))
            }
        }
    }

    async fn expire_stale_requests(&self, cutoff: DateTime<Utc>) -> Result<u64, EngineError> {
        let result = sqlx::query(
            "UPDATE load_requests SET status = 'expired', updated_at = NOW() \
             WHERE status = 'pending' AND created_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(result.rows_affected())
    }

    async fn create_trip(&self, company_id: Uuid, draft: TripDraft) -> Result<Trip, EngineError> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;

        // Serialize number allocation per owner
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(company_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;

        let number = match draft.trip_number.clone() {
            Some(number) => number,
            None => {
                let highest: i32 = sqlx::query_scalar(
                    "SELECT COALESCE(MAX(CAST(SUBSTRING(trip_number FROM 5) AS INTEGER)), 0) \
                     FROM trips WHERE company_id = $1 AND trip_number ~ '^TRP-[0-9]+$'",
                )
                .bind(company_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_err)?;
                format!("TRP-{:04}", highest + 1)
            }
        };

        let trip = Trip::new(company_id, number, draft);
        let sql = format!(
            "INSERT INTO trips ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, \
             $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25)",
            TRIP_COLS
        );
        sqlx::query(&sql)
            .bind(trip.id)
            .bind(trip.company_id)
            .bind(&trip.trip_number)
            .bind(trip.status.as_str())
            .bind(trip.driver_id)
            .bind(&trip.driver_name)
            .bind(&trip.driver_phone)
            .bind(trip.truck_id)
            .bind(trip.truck_kind.map(|k| k.as_str()))
            .bind(trip.trailer_id)
            .bind(&trip.origin)
            .bind(&trip.destination)
            .bind(trip.start_date)
            .bind(trip.end_date)
            .bind(trip.total_miles)
            .bind(trip.total_revenue)
            .bind(trip.driver_pay)
            .bind(trip.profit)
            .bind(trip.pay.mode.map(|m| m.as_str()))
            .bind(trip.pay.rate_per_mile)
            .bind(trip.pay.rate_per_cuft)
            .bind(trip.pay.percent_of_revenue)
            .bind(trip.pay.flat_daily_rate)
            .bind(trip.created_at)
            .bind(trip.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    EngineError::Validation(format!(
                        "trip number {} already in use",
                        trip.trip_number
                    ))
                } else {
                    map_err(err)
                }
            })?;

        tx.commit().await.map_err(map_err)?;
        Ok(trip)
    }

    async fn trip(&self, id: Uuid) -> Result<Trip, EngineError> {
        let sql = format!("SELECT {} FROM trips WHERE id = $1", TRIP_COLS);
        let row = sqlx::query_as::<_, TripRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?
            .ok_or_else(|| EngineError::not_found("trip", id))?;
        row.try_into()
    }

    async fn trip_loads(&self, trip_id: Uuid) -> Result<Vec<TripLoad>, EngineError> {
        let rows = sqlx::query_as::<_, TripLoadRow>(
            "SELECT trip_id, load_id, sequence_index, role, added_at FROM trip_loads \
             WHERE trip_id = $1 ORDER BY sequence_index",
        )
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn trip_load_for_load(&self, load_id: Uuid) -> Result<Option<TripLoad>, EngineError> {
        let row = sqlx::query_as::<_, TripLoadRow>(
            "SELECT trip_id, load_id, sequence_index, role, added_at FROM trip_loads \
             WHERE load_id = $1",
        )
        .bind(load_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?;
        row.map(TryInto::try_into).transpose()
    }

    async fn loads_for_trip(&self, trip_id: Uuid) -> Result<Vec<Load>, EngineError> {
        let cols = LOAD_COLS
            .split(", ")
            .map(|c| format!("l.{}", c))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM loads l JOIN trip_loads tl ON tl.load_id = l.id \
             WHERE tl.trip_id = $1 ORDER BY tl.sequence_index",
            cols
        );
        let rows = sqlx::query_as::<_, LoadRow>(&sql)
            .bind(trip_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn assign_load_to_trip(
        &self,
        load_id: Uuid,
        trip_id: Uuid,
        role: StopRole,
    ) -> Result<TripLoad, EngineError> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;

        let load = Self::fetch_load(&mut tx, load_id, true).await?;
        if load.assigned_carrier_id.is_some() {
            return Err(EngineError::CarrierAlreadyAssigned(load_id));
        }

        let sql = format!("SELECT {} FROM trips WHERE id = $1 FOR UPDATE", TRIP_COLS);
        let trip: Trip = sqlx::query_as::<_, TripRow>(&sql)
            .bind(trip_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_err)?
            .ok_or_else(|| EngineError::not_found("trip", trip_id))?
            .try_into()?;

        // Moving between trips: detach from the old one and close the gap
        let existing: Option<(Uuid, i32)> = sqlx::query_as(
            "DELETE FROM trip_loads WHERE load_id = $1 RETURNING trip_id, sequence_index",
        )
        .bind(load_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_err)?;
        if let Some((old_trip_id, old_index)) = existing {
            sqlx::query(
                "UPDATE trip_loads SET sequence_index = sequence_index - 1 \
                 WHERE trip_id = $1 AND sequence_index > $2",
            )
            .bind(old_trip_id)
            .bind(old_index)
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trip_loads WHERE trip_id = $1")
            .bind(trip_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_err)?;

        let trip_load = TripLoad::new(trip_id, load_id, count as i32, role);
        sqlx::query(
            "INSERT INTO trip_loads (trip_id, load_id, sequence_index, role, added_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(trip_load.trip_id)
        .bind(trip_load.load_id)
        .bind(trip_load.sequence_index)
        .bind(trip_load.role.as_str())
        .bind(trip_load.added_at)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;

        sqlx::query(
            "UPDATE loads SET delivery_order = $2, assigned_driver_id = $3, \
             assigned_driver_name = $4, assigned_driver_phone = $5, assigned_truck_id = $6, \
             assigned_trailer_id = $7, updated_at = NOW() WHERE id = $1",
        )
        .bind(load_id)
        .bind(trip_load.sequence_index + 1)
        .bind(trip.driver_id)
        .bind(&trip.driver_name)
        .bind(&trip.driver_phone)
        .bind(trip.truck_id)
        .bind(trip.trailer_id)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;

        tx.commit().await.map_err(map_err)?;
        Ok(trip_load)
    }

    async fn remove_load_from_trip(
        &self,
        load_id: Uuid,
        trip_id: Uuid,
    ) -> Result<(), EngineError> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;

        let removed: Option<(i32,)> = sqlx::query_as(
            "DELETE FROM trip_loads WHERE load_id = $1 AND trip_id = $2 RETURNING sequence_index",
        )
        .bind(load_id)
        .bind(trip_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_err)?;
        let (removed_index,) = removed.ok_or_else(|| {
            EngineError::NotFound(format!("load {} is not on trip {}", load_id, trip_id))
        })?;

        sqlx::query(
            "UPDATE trip_loads SET sequence_index = sequence_index - 1 \
             WHERE trip_id = $1 AND sequence_index > $2",
        )
        .bind(trip_id)
        .bind(removed_index)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;

        sqlx::query(
            "UPDATE loads SET delivery_order = NULL, assigned_driver_id = NULL, \
             assigned_driver_name = NULL, assigned_driver_phone = NULL, \
             assigned_truck_id = NULL, assigned_trailer_id = NULL, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(load_id)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;

        tx.commit().await.map_err(map_err)?;
        Ok(())
    }

    async fn update_trip_equipment(
        &self,
        trip_id: Uuid,
        truck_id: Option<Uuid>,
        truck_kind: Option<TruckKind>,
        trailer_id: Option<Uuid>,
    ) -> Result<Trip, EngineError> {
        let sql = format!(
            "UPDATE trips SET truck_id = $2, truck_kind = $3, trailer_id = $4, \
             updated_at = NOW() WHERE id = $1 RETURNING {}",
            TRIP_COLS
        );
        let row = sqlx::query_as::<_, TripRow>(&sql)
            .bind(trip_id)
            .bind(truck_id)
            .bind(truck_kind.map(|k| k.as_str()))
            .bind(trailer_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?
            .ok_or_else(|| EngineError::not_found("trip", trip_id))?;
        row.try_into()
    }

    async fn set_trip_status(&self, trip_id: Uuid, to: TripStatus) -> Result<Trip, EngineError> {
        let sql = format!(
            "UPDATE trips SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            TRIP_COLS
        );
        let row = sqlx::query_as::<_, TripRow>(&sql)
            .bind(trip_id)
            .bind(to.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?
            .ok_or_else(|| EngineError::not_found("trip", trip_id))?;
        row.try_into()
    }

    async fn record_settlement(
        &self,
        trip_id: Uuid,
        update: SettlementUpdate,
    ) -> Result<Trip, EngineError> {
        let sql = format!(
            "UPDATE trips SET total_revenue = $2, driver_pay = $3, profit = $4, \
             status = 'settled', updated_at = NOW() \
             WHERE id = $1 AND status = 'completed' RETURNING {}",
            TRIP_COLS
        );
        let updated = sqlx::query_as::<_, TripRow>(&sql)
            .bind(trip_id)
            .bind(update.total_revenue)
            .bind(update.driver_pay)
            .bind(update.profit)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;

        match updated {
            Some(row) => row.try_into(),
            None => {
                let current = self.trip(trip_id).await?;
                Err(EngineError::Validation(format!(
                    "trip {} must be completed before settlement, is {}",
                    trip_id, current.status
                )))
            }
        }
    }

    async fn cancel_carrier_assignment(
        &self,
        load_id: Uuid,
        record: CancellationRecord,
        repost: bool,
    ) -> Result<CancelOutcome, EngineError> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;

        let load = Self::fetch_load(&mut tx, load_id, true).await?;
        let carrier_id = load.assigned_carrier_id.ok_or_else(|| {
            EngineError::Validation(format!(
                "load {} has no carrier assignment to cancel",
                load_id
            ))
        })?;
        if !load.assignment_cancellable() {
            return Err(EngineError::CannotCancelAtStage {
                load_id,
                status: load.status,
            });
        }

        // The stale accepted request must not survive the cancelled
        // assignment
        let sql = format!(
            "UPDATE load_requests SET status = 'declined', \
             decline_reason = 'assignment_cancelled', updated_at = NOW() \
             WHERE load_id = $1 AND status = 'accepted' RETURNING {}",
            REQUEST_COLS
        );
        let invalidated = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(load_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_err)?
            .map(TryInto::try_into)
            .transpose()?;

        let posting_sql = if repost {
            ", posting_status = 'posted', visible = TRUE, posted_at = NOW()"
        } else {
            ""
        };
        let sql = format!(
            "UPDATE loads SET assigned_carrier_id = NULL, agreed_rate = NULL, \
             assigned_driver_id = NULL, assigned_driver_name = NULL, \
             assigned_driver_phone = NULL, assigned_truck_id = NULL, \
             assigned_trailer_id = NULL, delivery_order = NULL, status = 'pending'{}, \
             updated_at = NOW() WHERE id = $1 RETURNING {}",
            posting_sql, LOAD_COLS
        );
        let load: Load = sqlx::query_as::<_, LoadRow>(&sql)
            .bind(load_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_err)?
            .try_into()?;

        sqlx::query(
            "INSERT INTO assignment_cancellations \
             (id, load_id, acting_owner_id, company_id, cancelled_carrier_id, reason_code, \
              note, reposted, cancelled_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())",
        )
        .bind(Uuid::new_v4())
        .bind(load_id)
        .bind(record.acting_owner_id)
        .bind(record.company_id)
        .bind(carrier_id)
        .bind(&record.reason_code)
        .bind(&record.note)
        .bind(repost)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;

        tx.commit().await.map_err(map_err)?;
        Ok(CancelOutcome {
            load,
            invalidated_request: invalidated,
        })
    }

    async fn insert_expense(&self, expense: &TripExpense) -> Result<(), EngineError> {
        sqlx::query(
            "INSERT INTO trip_expenses (id, trip_id, category, amount, paid_by, note, incurred_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(expense.id)
        .bind(expense.trip_id)
        .bind(&expense.category)
        .bind(expense.amount)
        .bind(expense.paid_by.as_str())
        .bind(&expense.note)
        .bind(expense.incurred_at)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn expenses_for_trip(&self, trip_id: Uuid) -> Result<Vec<TripExpense>, EngineError> {
        let rows = sqlx::query_as::<_, ExpenseRow>(
            "SELECT id, trip_id, category, amount, paid_by, note, incurred_at \
             FROM trip_expenses WHERE trip_id = $1 ORDER BY incurred_at",
        )
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn board_counts(&self, company_id: Uuid) -> Result<BoardCounts, EngineError> {
        let status_rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM loads WHERE company_id = $1 GROUP BY status",
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;

        let mut counts = BoardCounts::default();
        for (status, count) in status_rows {
            match status.parse::<LoadStatus>().map_err(EngineError::Validation)? {
                LoadStatus::Pending => counts.pending = count,
                LoadStatus::Accepted => counts.accepted = count,
                LoadStatus::Loading => counts.loading = count,
                LoadStatus::Loaded => counts.loaded = count,
                LoadStatus::InTransit => counts.in_transit = count,
                LoadStatus::Delivered => counts.delivered = count,
                LoadStatus::Cancelled => counts.cancelled = count,
            }
        }

        counts.posted = sqlx::query_scalar(
            "SELECT COUNT(*) FROM loads \
             WHERE company_id = $1 AND posting_status = 'posted' AND visible",
        )
        .bind(company_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)?;

        counts.pending_requests = sqlx::query_scalar(
            "SELECT COUNT(*) FROM load_requests r JOIN loads l ON l.id = r.load_id \
             WHERE l.company_id = $1 AND r.status = 'pending'",
        )
        .bind(company_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)?;

        Ok(counts)
    }
}
