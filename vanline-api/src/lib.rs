pub mod board;
pub mod error;
pub mod loads;
pub mod requests;
pub mod state;
pub mod sweep;
pub mod trips;

pub use state::AppState;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/v1/loads", post(loads::create_load))
        .route("/v1/loads/{id}", get(loads::get_load))
        .route("/v1/loads/{id}/post", post(loads::post_load))
        .route("/v1/loads/{id}/unpost", post(loads::unpost_load))
        .route("/v1/loads/{id}/status", post(loads::advance_load_status))
        .route(
            "/v1/loads/{id}/cancel-assignment",
            post(loads::cancel_assignment),
        )
        .route(
            "/v1/loads/{id}/requests",
            post(requests::submit_request).get(requests::list_requests),
        )
        .route("/v1/requests/{id}/accept", post(requests::accept_request))
        .route("/v1/requests/{id}/decline", post(requests::decline_request))
        .route(
            "/v1/requests/{id}/withdraw",
            post(requests::withdraw_request),
        )
        .route("/v1/trips", post(trips::create_trip))
        .route("/v1/trips/{id}", get(trips::get_trip))
        .route("/v1/trips/{id}/status", post(trips::set_trip_status))
        .route("/v1/trips/{id}/equipment", post(trips::update_equipment))
        .route(
            "/v1/trips/{id}/loads",
            post(trips::assign_load).get(trips::list_trip_loads),
        )
        .route(
            "/v1/trips/{id}/loads/{load_id}",
            delete(trips::remove_load),
        )
        .route("/v1/trips/{id}/expenses", post(trips::add_expense))
        .route("/v1/trips/{id}/settle", post(trips::settle_trip))
        .route("/v1/board", get(board::board_counts))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
