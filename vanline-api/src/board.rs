use axum::{extract::State, http::HeaderMap, Json};
use vanline_core::repository::{BoardCounts, LedgerStore};

use crate::error::ApiError;
use crate::loads::actor;
use crate::state::AppState;

/// Read-side projection for the dispatch board's badge counts. Pure read
/// over the same load/request state; never part of the write path.
pub async fn board_counts(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<BoardCounts>, ApiError> {
    let actor = actor(&headers)?;
    let counts = state.store.board_counts(actor).await?;
    Ok(Json(counts))
}
