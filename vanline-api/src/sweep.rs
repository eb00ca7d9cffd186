use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{error, info};
use vanline_dispatch::NegotiationService;

const SWEEP_INTERVAL_SECS: u64 = 3600;

/// Periodic sweep moving stale pending requests to `expired`. Runs inside
/// the service binary; the engine only performs the transition.
pub async fn start_request_expiry_sweep(negotiation: Arc<NegotiationService>, expiry_days: i64) {
    info!(
        "Request expiry sweep started, expiring pending requests older than {} days",
        expiry_days
    );

    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS));
    loop {
        ticker.tick().await;
        let cutoff = Utc::now() - Duration::days(expiry_days);
        if let Err(e) = negotiation.expire_stale(cutoff).await {
            error!("Request expiry sweep failed: {}", e);
        }
    }
}
