//! Delivery of queued events to the CRM.
//!
//! [`EventDelivery`] is the processor the orchestrator registers on the
//! queue. It attributes each event to a contact and routes it by kind:
//! charter requests open an opportunity, quote and booking milestones
//! advance one when the event names it, everything else becomes a note on
//! the contact's timeline.
//!
//! An event that cannot be attributed to any contact is reported as
//! delivered. Retrying it would never succeed and would hold up the queue.

use crate::backend::{ActivityNote, CrmBackend, OpportunityDraft, OpportunityStage, OpportunityUpdate};
use crate::error::SyncResult;
use crate::identity::IdentityResolver;
use crate::queue::EventProcessor;
use async_trait::async_trait;
use charter_types::{ContactId, Event, EventKind, OpportunityId};
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Who the app is currently acting for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CurrentIdentity {
    /// Application user id.
    pub user_id: Option<String>,
    /// Resolution key of the user (normalized email).
    pub user_key: Option<String>,
    pub contact_id: Option<ContactId>,
    /// Resolution key of the user's organization.
    pub organization_key: Option<String>,
    pub company_id: Option<ContactId>,
}

/// Where an event ends up in the CRM.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryRoute {
    /// A note on the contact's timeline.
    Note,
    /// A new opportunity for the contact.
    OpenOpportunity,
    /// A stage change on an existing opportunity.
    AdvanceOpportunity {
        id: OpportunityId,
        stage: OpportunityStage,
    },
}

/// Decides the delivery route of an event.
pub fn route(event: &Event) -> DeliveryRoute {
    let stage = match event.kind {
        EventKind::ScreenViewed
        | EventKind::ButtonClicked
        | EventKind::FormSubmitted
        | EventKind::FormAbandoned
        | EventKind::ErrorOccurred
        | EventKind::SearchPerformed
        | EventKind::UserSignedUp
        | EventKind::UserLoggedIn
        | EventKind::UserLoggedOut => return DeliveryRoute::Note,
        EventKind::CharterRequested => return DeliveryRoute::OpenOpportunity,
        EventKind::QuoteReceived => OpportunityStage::Quoted,
        EventKind::QuoteAccepted => OpportunityStage::Accepted,
        EventKind::QuoteDeclined => OpportunityStage::Declined,
        EventKind::BookingConfirmed => OpportunityStage::Booked,
        EventKind::BookingCancelled => OpportunityStage::Cancelled,
        EventKind::PaymentCompleted => OpportunityStage::Paid,
    };

    match event.property_str("opportunity_id") {
        Some(id) if !id.is_empty() => DeliveryRoute::AdvanceOpportunity {
            id: OpportunityId::new(id),
            stage,
        },
        _ => DeliveryRoute::Note,
    }
}

/// Renders event properties as `key: value` lines, sorted by key.
fn note_body(event: &Event) -> String {
    let mut keys: Vec<&String> = event.properties.keys().collect();
    keys.sort();

    let mut body = String::new();
    for key in keys {
        let value = &event.properties[key.as_str()];
        let rendered = match value.as_str() {
            Some(s) => s.to_string(),
            None => value.to_string(),
        };
        let _ = writeln!(body, "{key}: {rendered}");
    }
    if let Some(platform) = &event.metadata.platform {
        let _ = writeln!(body, "platform: {platform}");
    }
    body
}

fn note_title(event: &Event) -> String {
    let subject = match event.kind {
        EventKind::ScreenViewed => event.property_str("screen"),
        EventKind::ButtonClicked => event.property_str("button"),
        EventKind::FormSubmitted | EventKind::FormAbandoned => event.property_str("form"),
        _ => None,
    };
    match subject {
        Some(subject) => format!("{}: {}", event.kind.title(), subject),
        None => event.kind.title().to_string(),
    }
}

fn property_f64(event: &Event, key: &str) -> Option<f64> {
    event.properties.get(key).and_then(|v| v.as_f64())
}

/// The queue processor that forwards events to the CRM.
pub struct EventDelivery {
    backend: Arc<dyn CrmBackend>,
    resolver: IdentityResolver,
    identity: Arc<RwLock<CurrentIdentity>>,
}

impl EventDelivery {
    pub fn new(
        backend: Arc<dyn CrmBackend>,
        resolver: IdentityResolver,
        identity: Arc<RwLock<CurrentIdentity>>,
    ) -> Self {
        Self {
            backend,
            resolver,
            identity,
        }
    }

    /// Finds the contact an event belongs to.
    ///
    /// The event's own contact wins. Otherwise the current identity is used,
    /// unless the event was produced for a different user.
    async fn attribute(&self, event: &Event) -> (Option<ContactId>, Option<ContactId>) {
        let identity = self.identity.read().await.clone();
        let same_user = match (&event.user_id, &identity.user_id) {
            (Some(event_user), Some(current)) => event_user == current,
            (Some(_), None) => false,
            (None, _) => true,
        };

        if let Some(contact_id) = &event.contact_id {
            let company_id = if same_user { identity.company_id } else { None };
            return (Some(contact_id.clone()), company_id);
        }
        if !same_user {
            return (None, None);
        }

        let contact_id = match identity.contact_id {
            Some(contact_id) => Some(contact_id),
            None => match &identity.user_key {
                Some(key) => self.resolver.cached_user(key).await,
                None => None,
            },
        };
        (contact_id, identity.company_id)
    }
}

#[async_trait]
impl EventProcessor for EventDelivery {
    async fn process(&self, event: &Event) -> SyncResult<bool> {
        let (Some(contact_id), company_id) = self.attribute(event).await else {
            debug!("No contact for {} event {}, nothing to deliver", event.kind, event.id);
            return Ok(true);
        };

        match route(event) {
            DeliveryRoute::Note => {
                let note = ActivityNote {
                    contact_id,
                    company_id,
                    title: note_title(event),
                    body: note_body(event),
                    occurred_at: event.timestamp,
                };
                self.backend.add_note(&note).await?;
            }
            DeliveryRoute::OpenOpportunity => {
                let name = match event.property_str("route") {
                    Some(route) => format!("Charter {route}"),
                    None => "Charter request".to_string(),
                };
                let draft = OpportunityDraft {
                    contact_id,
                    company_id,
                    name,
                    stage: OpportunityStage::Requested,
                    amount: property_f64(event, "estimated_price"),
                    properties: event.properties.clone(),
                };
                let opportunity_id = self.backend.create_opportunity(&draft).await?;
                info!("Opened opportunity {} for event {}", opportunity_id, event.id);
            }
            DeliveryRoute::AdvanceOpportunity { id, stage } => {
                let update = OpportunityUpdate {
                    stage: Some(stage),
                    amount: property_f64(event, "amount"),
                    properties: event.properties.clone(),
                };
                self.backend.update_opportunity(&id, &update).await?;
                debug!("Moved opportunity {} to {:?}", id, stage);
            }
        }

        Ok(true)
    }
}
