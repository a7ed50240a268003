//! Synchronization engine: batch catalog sync, realtime price ingestion,
//! historical backfill, retention, and the orchestrator wiring them together.

pub mod backfill;
pub mod batch;
pub mod lock;
pub mod orchestrator;
pub mod realtime;
pub mod retention;

pub use backfill::BackfillManager;
pub use batch::BatchSyncManager;
pub use orchestrator::Orchestrator;
pub use realtime::RealtimeSyncManager;
pub use retention::RetentionSweeper;
