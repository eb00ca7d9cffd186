pub mod auth;
pub mod equipment;
pub mod error;
pub mod expense;
pub mod load;
pub mod repository;
pub mod request;
pub mod trip;

pub use error::EngineError;
pub use expense::{PaidBy, TripExpense};
pub use load::{Load, LoadDraft, LoadStatus, PostingStatus, PostingType};
pub use repository::{
    AcceptOutcome, BoardCounts, CancelOutcome, CancellationRecord, ChangeNotifier, LedgerStore,
    PostingUpdate, SettlementUpdate,
};
pub use request::{LoadRequest, ProposedDates, RequestStatus, RequestType};
pub use trip::{PayMode, PayTerms, StopRole, TripDraft, Trip, TripLoad, TripStatus, TruckKind};
