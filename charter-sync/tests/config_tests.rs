use charter_sync::{DEFAULT_STORAGE_KEY, RetryPolicy, SyncConfig, SyncError, SyncStatus};
use pretty_assertions::assert_eq;
use std::time::Duration;

// ── Defaults ────────────────────────────────────────────────────

#[test]
fn config_defaults() {
    let cfg = SyncConfig::default();
    assert!(cfg.enabled);
    assert_eq!(cfg.max_retries, 5);
    assert_eq!(cfg.sync_interval(), Duration::from_secs(30));
    assert_eq!(cfg.status_interval(), Duration::from_secs(10));
    assert_eq!(cfg.contact_cache_ttl(), Duration::from_secs(300));
    assert_eq!(cfg.request_timeout(), Duration::from_secs(30));
    assert_eq!(cfg.storage_key, DEFAULT_STORAGE_KEY);
    assert_eq!(cfg.retry_policy(), RetryPolicy::default());
}

#[test]
fn partial_json_fills_defaults() {
    let cfg: SyncConfig = serde_json::from_str(
        r#"{"backend_base_url": "https://api.example.com", "backend_key": "k", "max_retries": 3}"#,
    )
    .unwrap();

    assert_eq!(cfg.max_retries, 3);
    assert_eq!(cfg.sync_interval_secs, 30);
    assert!(cfg.enabled);
    assert!(cfg.validate().is_ok());
}

#[test]
fn retry_policy_from_config() {
    let cfg = SyncConfig {
        max_retries: 2,
        retry_base_delay_ms: 500,
        retry_max_delay_ms: 4_000,
        ..Default::default()
    };
    let policy = cfg.retry_policy();
    assert_eq!(policy.max_retries, 2);
    assert_eq!(policy.delay_for(1), Duration::from_millis(500));
    assert_eq!(policy.delay_for(10), Duration::from_millis(4_000));
}

// ── Validation ──────────────────────────────────────────────────

#[test]
fn validate_accepts_complete_config() {
    assert!(SyncConfig::new("https://api.example.com", "k").validate().is_ok());
}

#[test]
fn validate_rejects_missing_credentials() {
    for cfg in [
        SyncConfig::new("", "k"),
        SyncConfig::new("https://api.example.com", " "),
    ] {
        assert!(matches!(cfg.validate(), Err(SyncError::Config(_))));
    }
}

#[test]
fn validate_rejects_zero_intervals() {
    let cfg = SyncConfig {
        sync_interval_secs: 0,
        ..SyncConfig::new("https://api.example.com", "k")
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn disabled_config_is_always_valid() {
    let cfg = SyncConfig::disabled();
    assert!(!cfg.enabled);
    assert!(cfg.validate().is_ok());
}

// ── Errors & status ─────────────────────────────────────────────

#[test]
fn error_display() {
    let err = SyncError::Backend {
        status: Some(429),
        message: "slow down".into(),
    };
    assert_eq!(err.to_string(), "backend error (429): slow down");
    assert_eq!(SyncError::backend("boom").to_string(), "backend error: boom");
    assert_eq!(
        SyncError::Config("missing".into()).to_string(),
        "configuration error: missing"
    );
}

#[test]
fn transient_errors() {
    assert!(SyncError::Network("reset".into()).is_transient());
    assert!(SyncError::Backend { status: Some(503), message: String::new() }.is_transient());
    assert!(!SyncError::Backend { status: Some(400), message: String::new() }.is_transient());
    assert!(!SyncError::Config("x".into()).is_transient());
}

#[test]
fn status_helpers() {
    let status = SyncStatus {
        queue_length: 2,
        errors: vec!["backend error: boom".into()],
        ..Default::default()
    };
    assert!(status.has_pending());
    assert!(status.has_errors());
    assert!(!SyncStatus::default().has_pending());
}
