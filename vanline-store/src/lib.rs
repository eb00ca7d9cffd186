pub mod app_config;
pub mod database;
pub mod events;
pub mod memory;
pub mod pg;

pub use app_config::Config;
pub use database::DbClient;
pub use events::{EventProducer, KafkaNotifier};
pub use memory::{CancellationAudit, FailPoint, MemoryLedger, NullNotifier, RecordingNotifier};
pub use pg::PgLedger;
