//! Tracked events.
//!
//! An event records something a user did in the booking app, or a business
//! milestone (a charter request, a confirmed booking). Events are immutable
//! once built and are the unit of delivery to the CRM.
//!
//! The set of kinds is closed: adding one is a compile error in every
//! `match` that decides how the kind is delivered.

use crate::{ContactId, EventId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Free-form event properties.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// Coarse grouping of event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    /// UI activity: screens, taps, forms, client errors.
    Activity,
    /// Account lifecycle.
    Account,
    /// Requests, quotes, bookings and payments.
    Business,
}

/// The kind of a tracked event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ScreenViewed,
    ButtonClicked,
    FormSubmitted,
    FormAbandoned,
    ErrorOccurred,
    SearchPerformed,
    UserSignedUp,
    UserLoggedIn,
    UserLoggedOut,
    CharterRequested,
    QuoteReceived,
    QuoteAccepted,
    QuoteDeclined,
    BookingConfirmed,
    BookingCancelled,
    PaymentCompleted,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; 16] = [
        EventKind::ScreenViewed,
        EventKind::ButtonClicked,
        EventKind::FormSubmitted,
        EventKind::FormAbandoned,
        EventKind::ErrorOccurred,
        EventKind::SearchPerformed,
        EventKind::UserSignedUp,
        EventKind::UserLoggedIn,
        EventKind::UserLoggedOut,
        EventKind::CharterRequested,
        EventKind::QuoteReceived,
        EventKind::QuoteAccepted,
        EventKind::QuoteDeclined,
        EventKind::BookingConfirmed,
        EventKind::BookingCancelled,
        EventKind::PaymentCompleted,
    ];

    /// Wire name, identical to the serde representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventKind::ScreenViewed => "screen_viewed",
            EventKind::ButtonClicked => "button_clicked",
            EventKind::FormSubmitted => "form_submitted",
            EventKind::FormAbandoned => "form_abandoned",
            EventKind::ErrorOccurred => "error_occurred",
            EventKind::SearchPerformed => "search_performed",
            EventKind::UserSignedUp => "user_signed_up",
            EventKind::UserLoggedIn => "user_logged_in",
            EventKind::UserLoggedOut => "user_logged_out",
            EventKind::CharterRequested => "charter_requested",
            EventKind::QuoteReceived => "quote_received",
            EventKind::QuoteAccepted => "quote_accepted",
            EventKind::QuoteDeclined => "quote_declined",
            EventKind::BookingConfirmed => "booking_confirmed",
            EventKind::BookingCancelled => "booking_cancelled",
            EventKind::PaymentCompleted => "payment_completed",
        }
    }

    /// Human-readable title, used as the headline of CRM notes.
    #[must_use]
    pub const fn title(&self) -> &'static str {
        match self {
            EventKind::ScreenViewed => "Screen viewed",
            EventKind::ButtonClicked => "Button clicked",
            EventKind::FormSubmitted => "Form submitted",
            EventKind::FormAbandoned => "Form abandoned",
            EventKind::ErrorOccurred => "Error occurred",
            EventKind::SearchPerformed => "Search performed",
            EventKind::UserSignedUp => "Signed up",
            EventKind::UserLoggedIn => "Logged in",
            EventKind::UserLoggedOut => "Logged out",
            EventKind::CharterRequested => "Charter requested",
            EventKind::QuoteReceived => "Quote received",
            EventKind::QuoteAccepted => "Quote accepted",
            EventKind::QuoteDeclined => "Quote declined",
            EventKind::BookingConfirmed => "Booking confirmed",
            EventKind::BookingCancelled => "Booking cancelled",
            EventKind::PaymentCompleted => "Payment completed",
        }
    }

    #[must_use]
    pub const fn category(&self) -> EventCategory {
        match self {
            EventKind::ScreenViewed
            | EventKind::ButtonClicked
            | EventKind::FormSubmitted
            | EventKind::FormAbandoned
            | EventKind::ErrorOccurred
            | EventKind::SearchPerformed => EventCategory::Activity,
            EventKind::UserSignedUp | EventKind::UserLoggedIn | EventKind::UserLoggedOut => {
                EventCategory::Account
            }
            EventKind::CharterRequested
            | EventKind::QuoteReceived
            | EventKind::QuoteAccepted
            | EventKind::QuoteDeclined
            | EventKind::BookingConfirmed
            | EventKind::BookingCancelled
            | EventKind::PaymentCompleted => EventCategory::Business,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| crate::Error::UnknownEventKind(s.to_string()))
    }
}

/// Context stamped on every event by the producer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Session the event was produced in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Client platform (`ios`, `android`, `web`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
}

impl EventMetadata {
    /// Returns true when no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.session_id.is_none() && self.platform.is_none() && self.app_version.is_none()
    }
}

/// A tracked event.
///
/// Built with the `with_*` methods and never modified after it is handed
/// to the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event.
    pub id: EventId,

    /// What happened.
    #[serde(rename = "type")]
    pub kind: EventKind,

    /// When it happened.
    pub timestamp: DateTime<Utc>,

    /// Application user the event belongs to, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// CRM contact the event is attributed to, if known at creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<ContactId>,

    #[serde(default, skip_serializing_if = "Properties::is_empty")]
    pub properties: Properties,

    #[serde(default, skip_serializing_if = "EventMetadata::is_empty")]
    pub metadata: EventMetadata,
}

impl Event {
    /// Creates an event of the given kind stamped with the current time.
    #[must_use]
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: EventId::new(),
            kind,
            timestamp: Utc::now(),
            user_id: None,
            contact_id: None,
            properties: Properties::new(),
            metadata: EventMetadata::default(),
        }
    }

    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn with_contact(mut self, contact_id: ContactId) -> Self {
        self.contact_id = Some(contact_id);
        self
    }

    /// Merges `properties` into the event, overwriting existing keys.
    #[must_use]
    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties.extend(properties);
        self
    }

    #[must_use]
    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Returns a string property, if present and a string.
    #[must_use]
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }
}
