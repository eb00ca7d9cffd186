pub mod assignment;
pub mod cancellation;
pub mod lifecycle;
pub mod negotiation;
pub mod settlement;

pub use assignment::AssignmentService;
pub use cancellation::CancellationService;
pub use lifecycle::LifecycleService;
pub use negotiation::NegotiationService;
pub use settlement::{gross_pay, net_pay, SettlementService, TripTotals};

use vanline_core::repository::ChangeNotifier;
use vanline_shared::DomainEvent;

/// Publish a change event after a committed mutation. Publishing is
/// best-effort: a bus failure is logged and never unwinds the mutation.
pub(crate) async fn emit(notifier: &dyn ChangeNotifier, event: DomainEvent) {
    if let Err(err) = notifier.publish(event).await {
        tracing::warn!("change event publish failed: {}", err);
    }
}
