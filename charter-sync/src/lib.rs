//! Offline-tolerant CRM event sync for Charter.
//!
//! The app records user activity and booking milestones as events. Events
//! are queued durably on the device and replayed to the CRM whenever the
//! device is online, so nothing is lost across restarts or dead zones.
//!
//! # Architecture
//!
//! - **Queue**: durable outbox with retry bookkeeping and a failed set
//! - **Identity**: resolves users and organizations to CRM records, cached
//!   with a TTL and deduplicated while in flight
//! - **Delivery**: turns a queued event into notes or opportunity changes
//! - **Backend**: the CRM adapter contract and its HTTP implementation
//! - **Scheduler**: replay and status timers driven by lifecycle signals
//! - **Orchestrator**: the public API tying the pieces together
//!
//! # Example
//!
//! ```no_run
//! use charter_sync::{MemoryQueueStore, OrchestratorParts, OrchestratorSlot, SyncConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> charter_sync::SyncResult<()> {
//! let config = SyncConfig::new("https://api.example.com/functions/v1", "anon-key");
//! let parts = OrchestratorParts::http(config, Arc::new(MemoryQueueStore::new()))?;
//!
//! let slot = OrchestratorSlot::new();
//! let sync = slot.acquire(Some(parts)).await?;
//! sync.initialize().await;
//! sync.track_screen_view("search").await;
//! sync.force_sync().await;
//! # Ok(())
//! # }
//! ```

pub mod backend;
mod config;
pub mod delivery;
mod error;
pub mod identity;
mod orchestrator;
pub mod queue;
pub mod scheduler;
mod status;
pub mod store;

pub use backend::{
    ActivityNote, BackendResponse, CompanyDraft, ContactDraft, CrmBackend, HttpCrmBackend,
    OpportunityDraft, OpportunityStage, OpportunityUpdate,
};
pub use backend::http::PROXY_PATH;
pub use config::{DEFAULT_STORAGE_KEY, RetryPolicy, SyncConfig};
pub use delivery::{CurrentIdentity, DeliveryRoute, EventDelivery};
pub use error::{SyncError, SyncResult};
pub use identity::{DEFAULT_CONTACT_TTL, IdentityCandidate, IdentityNamespace, IdentityResolver};
pub use orchestrator::{OrchestratorParts, OrchestratorSlot, SyncOrchestrator, UNKNOWN_ERROR};
pub use queue::{
    DrainReport, EventProcessor, EventQueue, FnProcessor, PROCESSOR_PANICKED, QueueItem, SkipReason,
};
pub use scheduler::{AppLifecycle, Scheduler, SchedulerHandle, SyncSignal};
pub use status::SyncStatus;
pub use store::{MemoryQueueStore, QueueStore, SqliteQueueStore};
