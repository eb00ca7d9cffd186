pub mod events;
pub mod pii;

pub use events::{DomainEvent, LoadChangedEvent, RequestChangedEvent, TripChangedEvent};
pub use pii::Masked;
