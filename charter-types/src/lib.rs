//! Core type definitions for the charter CRM sync core.
//!
//! This crate defines the plain data the sync core moves around:
//! - Event, queue item and CRM identifiers
//! - The closed set of tracked event kinds and the event itself
//! - User and organization profiles used for identity resolution
//!
//! Nothing here performs I/O.

mod event;
mod ids;
mod profile;

pub use event::{Event, EventCategory, EventKind, EventMetadata, Properties};
pub use ids::{ContactId, EventId, OpportunityId, QueueItemId};
pub use profile::{OrganizationProfile, UserProfile};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("unknown event kind: {0}")]
    UnknownEventKind(String),
}
