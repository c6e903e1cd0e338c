use charter_types::{ContactId, Event, EventCategory, EventKind, EventMetadata, Properties};
use pretty_assertions::assert_eq;
use std::str::FromStr;

// ── EventKind ────────────────────────────────────────────────────

#[test]
fn kind_serializes_snake_case() {
    let json = serde_json::to_string(&EventKind::ScreenViewed).unwrap();
    assert_eq!(json, r#""screen_viewed""#);
}

#[test]
fn kind_as_str_matches_serde() {
    for kind in EventKind::ALL {
        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json, format!("\"{}\"", kind.as_str()));
    }
}

#[test]
fn kind_from_str() {
    assert_eq!(EventKind::from_str("booking_confirmed").unwrap(), EventKind::BookingConfirmed);
    assert!(EventKind::from_str("flight_landed").is_err());
}

#[test]
fn kind_categories() {
    assert_eq!(EventKind::ButtonClicked.category(), EventCategory::Activity);
    assert_eq!(EventKind::UserLoggedIn.category(), EventCategory::Account);
    assert_eq!(EventKind::PaymentCompleted.category(), EventCategory::Business);
}

#[test]
fn kind_unknown_rejected_on_deserialize() {
    let result: Result<EventKind, _> = serde_json::from_str(r#""custom_thing""#);
    assert!(result.is_err());
}

// ── Event ────────────────────────────────────────────────────────

#[test]
fn new_event_is_bare() {
    let event = Event::new(EventKind::ScreenViewed);
    assert_eq!(event.kind, EventKind::ScreenViewed);
    assert!(event.user_id.is_none());
    assert!(event.contact_id.is_none());
    assert!(event.properties.is_empty());
    assert!(event.metadata.is_empty());
}

#[test]
fn event_ids_unique() {
    let a = Event::new(EventKind::ScreenViewed);
    let b = Event::new(EventKind::ScreenViewed);
    assert_ne!(a.id, b.id);
}

#[test]
fn builder_sets_fields() {
    let event = Event::new(EventKind::ButtonClicked)
        .with_user("user-1")
        .with_contact(ContactId::new("c1"))
        .with_property("button", "request_quote")
        .with_property("screen", "aircraft_detail");

    assert_eq!(event.user_id.as_deref(), Some("user-1"));
    assert_eq!(event.contact_id, Some(ContactId::new("c1")));
    assert_eq!(event.property_str("button"), Some("request_quote"));
    assert_eq!(event.property_str("screen"), Some("aircraft_detail"));
}

#[test]
fn with_properties_overwrites_keys() {
    let mut props = Properties::new();
    props.insert("screen".into(), "home".into());
    let event = Event::new(EventKind::ScreenViewed)
        .with_property("screen", "search")
        .with_properties(props);
    assert_eq!(event.property_str("screen"), Some("home"));
}

#[test]
fn property_str_ignores_non_strings() {
    let event = Event::new(EventKind::SearchPerformed).with_property("results", 12);
    assert_eq!(event.property_str("results"), None);
}

#[test]
fn event_wire_shape_uses_type_field() {
    let event = Event::new(EventKind::QuoteAccepted).with_property("quote_id", "q-9");
    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["type"], "quote_accepted");
    assert_eq!(value["properties"]["quote_id"], "q-9");
    assert!(value.get("contact_id").is_none());
    assert!(value.get("metadata").is_none());
}

#[test]
fn event_deserializes_minimal_record() {
    let json = r#"{
        "id": "01890a5d-ac96-774b-bcce-b302099a8057",
        "type": "form_abandoned",
        "timestamp": "2025-03-01T10:00:00Z"
    }"#;
    let event: Event = serde_json::from_str(json).unwrap();
    assert_eq!(event.kind, EventKind::FormAbandoned);
    assert!(event.properties.is_empty());
    assert!(event.metadata.is_empty());
}

#[test]
fn event_serde_roundtrip_with_metadata() {
    let event = Event::new(EventKind::ErrorOccurred)
        .with_property("message", "timeout")
        .with_metadata(EventMetadata {
            session_id: Some("s-1".into()),
            platform: Some("ios".into()),
            app_version: Some("2.4.0".into()),
        });
    let json = serde_json::to_string(&event).unwrap();
    let parsed: Event = serde_json::from_str(&json).unwrap();
    assert_eq!(event, parsed);
}
