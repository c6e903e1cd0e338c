//! Sync orchestrator: the public face of the sync core.
//!
//! The orchestrator ties together:
//! - the event queue (durable outbox with retry bookkeeping)
//! - the identity resolver (user/organization → CRM contact)
//! - the CRM backend (through the delivery processor)
//! - the scheduler (timers and lifecycle signals)
//!
//! Producer calls (`track_*`) never block on the network and never fail:
//! they build an event and hand it to the queue. Delivery happens on
//! replay passes.
//!
//! One orchestrator exists per process. The host owns it through an
//! [`OrchestratorSlot`] at its composition root and passes it down.

use crate::backend::{CrmBackend, HttpCrmBackend};
use crate::config::SyncConfig;
use crate::delivery::{CurrentIdentity, EventDelivery};
use crate::error::{SyncError, SyncResult};
use crate::identity::IdentityResolver;
use crate::queue::{DrainReport, EventQueue, QueueItem};
use crate::scheduler::{Scheduler, SchedulerHandle};
use crate::status::SyncStatus;
use crate::store::QueueStore;
use charter_types::{
    ContactId, Event, EventKind, EventMetadata, OrganizationProfile, Properties, UserProfile,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, OnceCell, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Message reported for failed items that carry no error.
pub const UNKNOWN_ERROR: &str = "Unknown error";

struct RunningScheduler {
    handle: SchedulerHandle,
    task: JoinHandle<()>,
}

/// The sync orchestrator.
pub struct SyncOrchestrator {
    config: SyncConfig,
    queue: Arc<EventQueue>,
    resolver: IdentityResolver,
    backend: Arc<dyn CrmBackend>,
    identity: Arc<RwLock<CurrentIdentity>>,
    /// Bumped when the user side of the identity is claimed or cleared; a
    /// resolution only lands if its generation is still current.
    user_generation: AtomicU64,
    organization_generation: AtomicU64,
    session_id: String,
    last_sync_at: RwLock<Option<DateTime<Utc>>>,
    status_tx: watch::Sender<SyncStatus>,
    initialized: OnceCell<()>,
    scheduler: Mutex<Option<RunningScheduler>>,
}

impl SyncOrchestrator {
    /// Creates an orchestrator. Nothing is loaded until [`initialize`](Self::initialize).
    pub fn new(config: SyncConfig, store: Arc<dyn QueueStore>, backend: Arc<dyn CrmBackend>) -> Self {
        let queue = Arc::new(EventQueue::from_config(store, &config));
        let resolver = IdentityResolver::with_ttl(Arc::clone(&backend), config.contact_cache_ttl());
        let (status_tx, _) = watch::channel(SyncStatus {
            is_online: true,
            ..Default::default()
        });

        Self {
            config,
            queue,
            resolver,
            backend,
            identity: Arc::new(RwLock::new(CurrentIdentity::default())),
            user_generation: AtomicU64::new(0),
            organization_generation: AtomicU64::new(0),
            session_id: Uuid::new_v4().to_string(),
            last_sync_at: RwLock::new(None),
            status_tx,
            initialized: OnceCell::new(),
            scheduler: Mutex::new(None),
        }
    }

    /// Creates an orchestrator talking to the CRM proxy over HTTP.
    pub fn with_http_backend(config: SyncConfig, store: Arc<dyn QueueStore>) -> SyncResult<Self> {
        let backend = Arc::new(HttpCrmBackend::new(&config)?);
        Ok(Self::new(config, store, backend))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.initialized()
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Loads the persisted queue and registers the delivery processor.
    /// Runs once; a no-op when sync is disabled.
    pub async fn initialize(&self) {
        if !self.config.enabled {
            return;
        }
        self.initialized
            .get_or_init(|| async {
                self.queue.initialize().await;
                let delivery = EventDelivery::new(
                    Arc::clone(&self.backend),
                    self.resolver.clone(),
                    Arc::clone(&self.identity),
                );
                self.queue.set_processor(Arc::new(delivery)).await;
                info!(
                    "Sync orchestrator initialized ({} events pending)",
                    self.queue.queue_length().await
                );
            })
            .await;
        self.publish_status().await;
    }

    // ── Scheduling ───────────────────────────────────────────────

    /// Starts the background scheduler, or returns the running one's handle.
    ///
    /// When sync is disabled no scheduler runs and the returned handle is
    /// already closed.
    pub async fn start(self: &Arc<Self>) -> SchedulerHandle {
        let mut running = self.scheduler.lock().await;
        if let Some(existing) = running.as_ref() {
            if !existing.task.is_finished() {
                return existing.handle.clone();
            }
        }

        let (handle, signal_rx) = SchedulerHandle::channel();
        if !self.config.enabled {
            debug!("Sync disabled, scheduler not started");
            return handle;
        }

        self.initialize().await;
        let scheduler = Scheduler::new(
            self,
            self.config.sync_interval(),
            self.config.status_interval(),
        );
        let task = tokio::spawn(scheduler.run(signal_rx));
        *running = Some(RunningScheduler {
            handle: handle.clone(),
            task,
        });
        handle
    }

    /// Stops the background scheduler and waits for it to exit.
    pub async fn shutdown(&self) {
        let running = self.scheduler.lock().await.take();
        let Some(running) = running else {
            return;
        };
        if running.handle.shutdown().await.is_err() {
            running.task.abort();
        }
        if let Err(e) = running.task.await {
            if !e.is_cancelled() {
                warn!("Sync scheduler exited abnormally: {}", e);
            }
        }
    }

    /// Stops timers and clears in-memory derived state. The persisted queue
    /// is left untouched.
    pub async fn destroy(&self) {
        self.shutdown().await;
        self.resolver.clear_cache().await;
        self.clear_identity().await;
        *self.last_sync_at.write().await = None;
        info!("Sync orchestrator torn down");
    }

    // ── Connectivity & replay ────────────────────────────────────

    /// Updates connectivity. Coming back online replays the queue.
    pub async fn set_online_status(&self, online: bool) {
        if !self.config.enabled {
            return;
        }
        if let Some(report) = self.queue.set_online_status(online).await {
            self.record_pass(&report).await;
        }
        self.publish_status().await;
    }

    pub fn is_online(&self) -> bool {
        self.queue.is_online()
    }

    /// Runs one replay pass. `None` when disabled or not initialized.
    pub async fn replay(&self) -> Option<DrainReport> {
        if !self.config.enabled || !self.is_initialized() {
            return None;
        }
        let report = self.queue.process_queue().await;
        self.record_pass(&report).await;
        Some(report)
    }

    async fn record_pass(&self, report: &DrainReport) {
        if report.ran() {
            *self.last_sync_at.write().await = Some(Utc::now());
        }
    }

    /// Manually replays the queue and republishes status.
    ///
    /// Safe to call at any time: disabled or uninitialized orchestrators do
    /// nothing.
    pub async fn force_sync(&self) -> Option<DrainReport> {
        let report = self.replay().await;
        if report.is_some() {
            self.publish_status().await;
        }
        report
    }

    // ── Identity ─────────────────────────────────────────────────

    /// Resolves the signed-in user to a CRM contact and makes them the
    /// current identity. Returns `None` if resolution failed.
    ///
    /// If [`clear_identity`](Self::clear_identity) or another `identify_user`
    /// runs before resolution finishes, the resolved contact is returned but
    /// the current identity is left to the later call.
    pub async fn identify_user(&self, user: &UserProfile) -> Option<ContactId> {
        if !self.config.enabled {
            return None;
        }
        let generation = self.user_generation.fetch_add(1, Ordering::AcqRel) + 1;
        let contact_id = self.resolver.identify_user(user).await;

        let mut identity = self.identity.write().await;
        if self.user_generation.load(Ordering::Acquire) != generation {
            debug!("Identity changed while resolving user {}, not applying", user.id);
            return contact_id;
        }
        identity.user_id = Some(user.id.clone());
        identity.user_key = Some(user.resolution_key());
        identity.contact_id = contact_id.clone();
        contact_id
    }

    /// Resolves the user's organization to a CRM company. Superseded
    /// resolutions are not applied, as with [`identify_user`](Self::identify_user).
    pub async fn identify_organization(&self, org: &OrganizationProfile) -> Option<ContactId> {
        if !self.config.enabled {
            return None;
        }
        let generation = self.organization_generation.fetch_add(1, Ordering::AcqRel) + 1;
        let company_id = self.resolver.identify_organization(org).await;

        let mut identity = self.identity.write().await;
        if self.organization_generation.load(Ordering::Acquire) != generation {
            debug!("Identity changed while resolving organization {}, not applying", org.id);
            return company_id;
        }
        identity.organization_key = Some(org.resolution_key());
        identity.company_id = company_id.clone();
        company_id
    }

    /// Forgets the current identity, e.g. on sign-out. Resolutions still in
    /// flight will not restore it.
    pub async fn clear_identity(&self) {
        let mut identity = self.identity.write().await;
        self.user_generation.fetch_add(1, Ordering::AcqRel);
        self.organization_generation.fetch_add(1, Ordering::AcqRel);
        *identity = CurrentIdentity::default();
    }

    pub async fn current_identity(&self) -> CurrentIdentity {
        self.identity.read().await.clone()
    }

    // ── Producers ────────────────────────────────────────────────

    /// Records an event of the given kind.
    pub async fn track_event(&self, kind: EventKind, properties: Properties) {
        self.record(Event::new(kind).with_properties(properties))
            .await;
    }

    pub async fn track_screen_view(&self, screen: &str) {
        self.record(Event::new(EventKind::ScreenViewed).with_property("screen", screen))
            .await;
    }

    pub async fn track_button_click(&self, button: &str, screen: &str) {
        self.record(
            Event::new(EventKind::ButtonClicked)
                .with_property("button", button)
                .with_property("screen", screen),
        )
        .await;
    }

    pub async fn track_form_submit(&self, form: &str, success: bool) {
        self.record(
            Event::new(EventKind::FormSubmitted)
                .with_property("form", form)
                .with_property("success", success),
        )
        .await;
    }

    pub async fn track_form_abandon(&self, form: &str, fields_completed: usize) {
        self.record(
            Event::new(EventKind::FormAbandoned)
                .with_property("form", form)
                .with_property("fields_completed", fields_completed),
        )
        .await;
    }

    pub async fn track_error(&self, message: &str, context: Option<&str>) {
        let mut event = Event::new(EventKind::ErrorOccurred).with_property("message", message);
        if let Some(context) = context {
            event = event.with_property("context", context);
        }
        self.record(event).await;
    }

    pub async fn track_search(&self, origin: &str, destination: &str, passengers: u32) {
        self.record(
            Event::new(EventKind::SearchPerformed)
                .with_property("origin", origin)
                .with_property("destination", destination)
                .with_property("passengers", passengers),
        )
        .await;
    }

    pub async fn track_charter_request(
        &self,
        request_id: &str,
        route: &str,
        estimated_price: Option<f64>,
    ) {
        let mut event = Event::new(EventKind::CharterRequested)
            .with_property("request_id", request_id)
            .with_property("route", route);
        if let Some(price) = estimated_price {
            event = event.with_property("estimated_price", json!(price));
        }
        self.record(event).await;
    }

    pub async fn track_quote_accepted(
        &self,
        quote_id: &str,
        opportunity_id: Option<&str>,
        amount: Option<f64>,
    ) {
        let event = Event::new(EventKind::QuoteAccepted).with_property("quote_id", quote_id);
        self.record(with_opportunity(event, opportunity_id, amount))
            .await;
    }

    pub async fn track_booking_confirmed(
        &self,
        booking_id: &str,
        opportunity_id: Option<&str>,
        amount: Option<f64>,
    ) {
        let event = Event::new(EventKind::BookingConfirmed).with_property("booking_id", booking_id);
        self.record(with_opportunity(event, opportunity_id, amount))
            .await;
    }

    /// Stamps identity and metadata on an event and queues it.
    async fn record(&self, mut event: Event) {
        if !self.config.enabled {
            return;
        }
        self.initialize().await;

        let identity = self.identity.read().await.clone();
        if event.user_id.is_none() {
            event.user_id = identity.user_id;
        }
        if event.contact_id.is_none() {
            event.contact_id = identity.contact_id;
        }
        event.metadata = EventMetadata {
            session_id: Some(self.session_id.clone()),
            platform: self.config.platform.clone(),
            app_version: self.config.app_version.clone(),
        };

        self.queue.enqueue(event).await;
    }

    // ── Status & management ──────────────────────────────────────

    /// Computes the current status snapshot.
    pub async fn sync_status(&self) -> SyncStatus {
        let errors = self
            .queue
            .failed_events()
            .await
            .into_iter()
            .map(|item| item.error.unwrap_or_else(|| UNKNOWN_ERROR.to_string()))
            .collect();

        SyncStatus {
            is_online: self.queue.is_online(),
            last_sync_at: *self.last_sync_at.read().await,
            queue_length: self.queue.queue_length().await,
            errors,
        }
    }

    /// Recomputes the status and publishes it to subscribers.
    pub async fn publish_status(&self) {
        let status = self.sync_status().await;
        self.status_tx.send_replace(status);
    }

    /// Subscribes to published status snapshots.
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    pub async fn queue_length(&self) -> usize {
        self.queue.queue_length().await
    }

    pub async fn failed_events(&self) -> Vec<QueueItem> {
        self.queue.failed_events().await
    }

    /// Drops every queued and failed event, including the persisted copy.
    pub async fn clear_event_queue(&self) {
        if !self.config.enabled {
            return;
        }
        self.queue.clear_queue().await;
        self.publish_status().await;
    }
}

fn with_opportunity(mut event: Event, opportunity_id: Option<&str>, amount: Option<f64>) -> Event {
    if let Some(id) = opportunity_id {
        event = event.with_property("opportunity_id", id);
    }
    if let Some(amount) = amount {
        event = event.with_property("amount", json!(amount));
    }
    event
}

/// Everything needed to build the orchestrator on first acquisition.
pub struct OrchestratorParts {
    pub config: SyncConfig,
    pub store: Arc<dyn QueueStore>,
    pub backend: Arc<dyn CrmBackend>,
}

impl OrchestratorParts {
    pub fn new(config: SyncConfig, store: Arc<dyn QueueStore>, backend: Arc<dyn CrmBackend>) -> Self {
        Self {
            config,
            store,
            backend,
        }
    }

    /// Parts using the HTTP backend built from `config`.
    pub fn http(config: SyncConfig, store: Arc<dyn QueueStore>) -> SyncResult<Self> {
        let backend = Arc::new(HttpCrmBackend::new(&config)?);
        Ok(Self::new(config, store, backend))
    }
}

/// Holds the process's single orchestrator.
///
/// Owned by the host's composition root. The first acquisition needs parts;
/// later ones return the same instance until [`destroy`](Self::destroy).
/// Call `destroy` on teardown: dropping the slot releases the orchestrator,
/// but a running scheduler only notices at its next timer or signal.
#[derive(Default)]
pub struct OrchestratorSlot {
    current: Mutex<Option<Arc<SyncOrchestrator>>>,
}

impl OrchestratorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the orchestrator, building it from `parts` if none exists.
    ///
    /// Fails with [`SyncError::Config`] when nothing exists yet and no parts
    /// are given, or when the given config is invalid.
    pub async fn acquire(&self, parts: Option<OrchestratorParts>) -> SyncResult<Arc<SyncOrchestrator>> {
        let mut current = self.current.lock().await;
        if let Some(existing) = current.as_ref() {
            if parts.is_some() {
                debug!("Sync orchestrator already exists, ignoring new configuration");
            }
            return Ok(Arc::clone(existing));
        }

        let parts = parts.ok_or_else(|| {
            SyncError::Config("sync orchestrator requested before it was configured".to_string())
        })?;
        parts.config.validate()?;

        let orchestrator = Arc::new(SyncOrchestrator::new(parts.config, parts.store, parts.backend));
        *current = Some(Arc::clone(&orchestrator));
        Ok(orchestrator)
    }

    /// Returns the orchestrator if one exists.
    pub async fn current(&self) -> Option<Arc<SyncOrchestrator>> {
        self.current.lock().await.clone()
    }

    /// Tears down and forgets the orchestrator. The next acquisition needs parts again.
    pub async fn destroy(&self) {
        let orchestrator = self.current.lock().await.take();
        if let Some(orchestrator) = orchestrator {
            orchestrator.destroy().await;
        }
    }
}
