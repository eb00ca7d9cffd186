use std::sync::Arc;
use vanline_core::repository::{ChangeNotifier, LedgerStore};
use vanline_dispatch::{
    AssignmentService, CancellationService, LifecycleService, NegotiationService,
    SettlementService,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LedgerStore>,
    pub lifecycle: Arc<LifecycleService>,
    pub negotiation: Arc<NegotiationService>,
    pub assignment: Arc<AssignmentService>,
    pub cancellation: Arc<CancellationService>,
    pub settlement: Arc<SettlementService>,
}

impl AppState {
    pub fn new(store: Arc<dyn LedgerStore>, notifier: Arc<dyn ChangeNotifier>) -> Self {
        Self {
            lifecycle: Arc::new(LifecycleService::new(store.clone(), notifier.clone())),
            negotiation: Arc::new(NegotiationService::new(store.clone(), notifier.clone())),
            assignment: Arc::new(AssignmentService::new(store.clone(), notifier.clone())),
            cancellation: Arc::new(CancellationService::new(store.clone(), notifier.clone())),
            settlement: Arc::new(SettlementService::new(store.clone(), notifier)),
            store,
        }
    }
}
