//! Synchronization between the local store and the platform

pub mod delta;
pub mod health;
pub mod items;
pub mod orchestrator;
pub mod retry_queue;
pub mod types;

pub use delta::DeltaSyncEngine;
pub use health::{FlowHealth, HealthSnapshot, HealthStatus, SyncHealthProvider};
pub use items::ItemProcessor;
pub use orchestrator::{MIN_AUTO_SYNC_INTERVAL, SyncEvent, SyncFlow, SyncOrchestrator};
pub use retry_queue::{RetryPassSummary, RetryProcessor, RetryQueue, RetryQueueConfig};
pub use types::{
    DeltaItem, DeltaOutcome, DeltaResult, SyncError, SyncItemError, SyncPayload, SyncResult, SyncType,
};
