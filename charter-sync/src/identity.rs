//! Identity resolution.
//!
//! Maps application users and organizations to CRM contact ids. Results are
//! cached for a fixed TTL, and concurrent requests for the same key share a
//! single in-flight resolution, so a burst of calls for a new user creates
//! exactly one CRM contact.

use crate::backend::{CompanyDraft, ContactDraft, CrmBackend};
use charter_types::{ContactId, OrganizationProfile, UserProfile};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default lifetime of a cached resolution.
pub const DEFAULT_CONTACT_TTL: Duration = Duration::from_secs(5 * 60);

/// Cache namespace. Users and organizations never share entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityNamespace {
    User,
    Organization,
}

/// What to create in the CRM if the lookup finds nothing.
#[derive(Debug, Clone)]
pub enum IdentityCandidate {
    User(UserProfile),
    Organization(OrganizationProfile),
}

impl IdentityCandidate {
    pub fn namespace(&self) -> IdentityNamespace {
        match self {
            IdentityCandidate::User(_) => IdentityNamespace::User,
            IdentityCandidate::Organization(_) => IdentityNamespace::Organization,
        }
    }

    /// The key this candidate resolves under by default.
    pub fn resolution_key(&self) -> String {
        match self {
            IdentityCandidate::User(user) => user.resolution_key(),
            IdentityCandidate::Organization(org) => org.resolution_key(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    namespace: IdentityNamespace,
    key: String,
}

impl CacheKey {
    fn new(namespace: IdentityNamespace, key: &str) -> Self {
        Self {
            namespace,
            key: key.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    contact_id: ContactId,
    cached_at: Instant,
}

type Resolution = Shared<BoxFuture<'static, Option<ContactId>>>;

struct ResolverInner {
    backend: Arc<dyn CrmBackend>,
    ttl: Duration,
    cache: Mutex<HashMap<CacheKey, CacheEntry>>,
    inflight: Mutex<HashMap<CacheKey, Resolution>>,
    /// Bumped by `clear_cache`. Only changed while `inflight` is locked.
    epoch: AtomicU64,
}

impl ResolverInner {
    /// Returns a fresh cached id, evicting the entry if it has expired.
    async fn cached(&self, key: &CacheKey) -> Option<ContactId> {
        let mut cache = self.cache.lock().await;
        match cache.get(key) {
            Some(entry) if entry.cached_at.elapsed() < self.ttl => Some(entry.contact_id.clone()),
            Some(_) => {
                cache.remove(key);
                None
            }
            None => None,
        }
    }

    async fn resolve(
        self: Arc<Self>,
        key: CacheKey,
        candidate: IdentityCandidate,
        epoch: u64,
    ) -> Option<ContactId> {
        let resolved = match &candidate {
            IdentityCandidate::User(user) => self.resolve_user(&key.key, user).await,
            IdentityCandidate::Organization(org) => self.resolve_organization(&key.key, org).await,
        };

        let mut inflight = self.inflight.lock().await;
        if self.epoch.load(Ordering::Acquire) != epoch {
            // The cache was cleared meanwhile; the in-flight entry is already
            // gone and a newer one for this key may have taken its place.
            debug!("Discarding resolution for {} started before the cache was cleared", key.key);
            return resolved;
        }
        // Cache before leaving the in-flight map so a caller always finds one or the other.
        if let Some(contact_id) = &resolved {
            self.cache.lock().await.insert(
                key.clone(),
                CacheEntry {
                    contact_id: contact_id.clone(),
                    cached_at: Instant::now(),
                },
            );
        }
        inflight.remove(&key);
        resolved
    }

    async fn resolve_user(&self, email: &str, user: &UserProfile) -> Option<ContactId> {
        match self.backend.find_contact(email).await {
            Ok(Some(contact_id)) => {
                debug!("Found existing contact {} for {}", contact_id, email);
                return Some(contact_id);
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Contact lookup for {} failed: {}", email, e);
                return None;
            }
        }

        match self.backend.create_contact(&ContactDraft::from(user)).await {
            Ok(contact_id) => {
                info!("Created contact {} for {}", contact_id, email);
                Some(contact_id)
            }
            Err(e) => {
                warn!("Contact creation for {} failed: {}", email, e);
                None
            }
        }
    }

    async fn resolve_organization(&self, key: &str, org: &OrganizationProfile) -> Option<ContactId> {
        match self.backend.find_company(key).await {
            Ok(Some(company_id)) => {
                debug!("Found existing company {} for {}", company_id, key);
                return Some(company_id);
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Company lookup for {} failed: {}", key, e);
                return None;
            }
        }

        match self.backend.create_company(&CompanyDraft::from(org)).await {
            Ok(company_id) => {
                info!("Created company {} for {}", company_id, key);
                Some(company_id)
            }
            Err(e) => {
                warn!("Company creation for {} failed: {}", key, e);
                None
            }
        }
    }
}

/// Resolves users and organizations to CRM contact ids.
///
/// Cheap to clone; clones share the cache and the in-flight map.
#[derive(Clone)]
pub struct IdentityResolver {
    inner: Arc<ResolverInner>,
}

impl IdentityResolver {
    pub fn new(backend: Arc<dyn CrmBackend>) -> Self {
        Self::with_ttl(backend, DEFAULT_CONTACT_TTL)
    }

    pub fn with_ttl(backend: Arc<dyn CrmBackend>, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(ResolverInner {
                backend,
                ttl,
                cache: Mutex::new(HashMap::new()),
                inflight: Mutex::new(HashMap::new()),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Resolves `key` to a contact id.
    ///
    /// Order: fresh cache entry, then an in-flight resolution for the same
    /// key, then lookup, then creation from `candidate`. Returns `None` when
    /// lookup or creation fails; failures are not cached.
    pub async fn identify(&self, key: &str, candidate: IdentityCandidate) -> Option<ContactId> {
        let cache_key = CacheKey::new(candidate.namespace(), key);
        if let Some(contact_id) = self.inner.cached(&cache_key).await {
            return Some(contact_id);
        }

        let resolution = {
            let mut inflight = self.inner.inflight.lock().await;
            match inflight.get(&cache_key) {
                Some(pending) => {
                    debug!("Joining in-flight resolution for {}", key);
                    pending.clone()
                }
                None => {
                    // May have completed between the first check and taking the lock.
                    if let Some(contact_id) = self.inner.cached(&cache_key).await {
                        return Some(contact_id);
                    }
                    let epoch = self.inner.epoch.load(Ordering::Acquire);
                    let resolution = Arc::clone(&self.inner)
                        .resolve(cache_key.clone(), candidate, epoch)
                        .boxed()
                        .shared();
                    inflight.insert(cache_key, resolution.clone());
                    resolution
                }
            }
        };

        resolution.await
    }

    /// Resolves a user by normalized email.
    pub async fn identify_user(&self, user: &UserProfile) -> Option<ContactId> {
        let key = user.resolution_key();
        if key.is_empty() {
            warn!("Cannot resolve user {} without an email", user.id);
            return None;
        }
        self.identify(&key, IdentityCandidate::User(user.clone())).await
    }

    /// Resolves an organization by domain, or by normalized name.
    pub async fn identify_organization(&self, org: &OrganizationProfile) -> Option<ContactId> {
        let key = org.resolution_key();
        if key.is_empty() {
            warn!("Cannot resolve organization {} without a name or domain", org.id);
            return None;
        }
        self.identify(&key, IdentityCandidate::Organization(org.clone()))
            .await
    }

    /// Fresh cached user resolution, without touching the network.
    pub async fn cached_user(&self, key: &str) -> Option<ContactId> {
        self.inner
            .cached(&CacheKey::new(IdentityNamespace::User, key))
            .await
    }

    /// Fresh cached organization resolution, without touching the network.
    pub async fn cached_organization(&self, key: &str) -> Option<ContactId> {
        self.inner
            .cached(&CacheKey::new(IdentityNamespace::Organization, key))
            .await
    }

    /// Number of resolutions currently in flight.
    pub async fn in_flight(&self) -> usize {
        self.inner.inflight.lock().await.len()
    }

    /// Forgets every cached resolution in both namespaces.
    ///
    /// Resolutions still in flight finish for their callers but are not
    /// cached, so the next call for any key resolves again.
    pub async fn clear_cache(&self) {
        let mut inflight = self.inner.inflight.lock().await;
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);
        inflight.clear();
        self.inner.cache.lock().await.clear();
        debug!("Identity cache cleared");
    }
}
