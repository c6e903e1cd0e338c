//! Shared fakes for sync tests.

#![allow(dead_code)]

use async_trait::async_trait;
use charter_sync::{
    ActivityNote, CompanyDraft, ContactDraft, CrmBackend, MemoryQueueStore, OpportunityDraft,
    OpportunityUpdate, QueueStore, SyncError, SyncResult,
};
use charter_types::{ContactId, OpportunityId, Properties};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// A call received by [`FakeCrm`].
#[derive(Debug, Clone, PartialEq)]
pub enum CrmCall {
    FindContact(String),
    CreateContact(ContactDraft),
    UpdateContact(ContactId),
    FindCompany(String),
    CreateCompany(CompanyDraft),
    AddNote(ActivityNote),
    CreateOpportunity(OpportunityDraft),
    UpdateOpportunity(OpportunityId, OpportunityUpdate),
}

/// In-memory CRM that records every call.
///
/// Created contacts get ids `c1`, `c2`, ...; companies `co1`, `co2`, ...;
/// opportunities `o1`, `o2`, ...
#[derive(Default)]
pub struct FakeCrm {
    calls: Mutex<Vec<CrmCall>>,
    contacts: Mutex<HashMap<String, ContactId>>,
    companies: Mutex<HashMap<String, ContactId>>,
    next_contact: AtomicUsize,
    next_company: AtomicUsize,
    next_opportunity: AtomicUsize,
    lookup_delay: Mutex<Duration>,
    pub fail_lookups: AtomicBool,
    pub fail_creates: AtomicBool,
    pub fail_writes: AtomicBool,
}

impl FakeCrm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every lookup sleep before answering.
    pub fn with_lookup_delay(self, delay: Duration) -> Self {
        *self.lookup_delay.lock().unwrap() = delay;
        self
    }

    pub fn with_contact(self, email: &str, id: &str) -> Self {
        self.contacts
            .lock()
            .unwrap()
            .insert(email.to_string(), ContactId::new(id));
        self
    }

    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<CrmCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn lookups(&self) -> usize {
        self.count(|c| matches!(c, CrmCall::FindContact(_) | CrmCall::FindCompany(_)))
    }

    pub fn creates(&self) -> usize {
        self.count(|c| matches!(c, CrmCall::CreateContact(_) | CrmCall::CreateCompany(_)))
    }

    pub fn notes(&self) -> Vec<ActivityNote> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                CrmCall::AddNote(note) => Some(note),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&CrmCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: CrmCall) {
        self.calls.lock().unwrap().push(call);
    }

    async fn lookup_pause(&self) {
        let delay = *self.lookup_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn check(flag: &AtomicBool, what: &str) -> SyncResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(SyncError::Backend {
                status: Some(503),
                message: format!("{what} unavailable"),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CrmBackend for FakeCrm {
    async fn find_contact(&self, email: &str) -> SyncResult<Option<ContactId>> {
        self.record(CrmCall::FindContact(email.to_string()));
        self.lookup_pause().await;
        Self::check(&self.fail_lookups, "lookup")?;
        Ok(self.contacts.lock().unwrap().get(email).cloned())
    }

    async fn create_contact(&self, draft: &ContactDraft) -> SyncResult<ContactId> {
        self.record(CrmCall::CreateContact(draft.clone()));
        Self::check(&self.fail_creates, "create")?;
        let n = self.next_contact.fetch_add(1, Ordering::SeqCst) + 1;
        let id = ContactId::new(format!("c{n}"));
        self.contacts
            .lock()
            .unwrap()
            .insert(draft.email.to_lowercase(), id.clone());
        Ok(id)
    }

    async fn update_contact(&self, id: &ContactId, _properties: &Properties) -> SyncResult<()> {
        self.record(CrmCall::UpdateContact(id.clone()));
        Self::check(&self.fail_writes, "update")
    }

    async fn find_company(&self, key: &str) -> SyncResult<Option<ContactId>> {
        self.record(CrmCall::FindCompany(key.to_string()));
        self.lookup_pause().await;
        Self::check(&self.fail_lookups, "lookup")?;
        Ok(self.companies.lock().unwrap().get(key).cloned())
    }

    async fn create_company(&self, draft: &CompanyDraft) -> SyncResult<ContactId> {
        self.record(CrmCall::CreateCompany(draft.clone()));
        Self::check(&self.fail_creates, "create")?;
        let n = self.next_company.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ContactId::new(format!("co{n}")))
    }

    async fn add_note(&self, note: &ActivityNote) -> SyncResult<()> {
        self.record(CrmCall::AddNote(note.clone()));
        Self::check(&self.fail_writes, "note")
    }

    async fn create_opportunity(&self, draft: &OpportunityDraft) -> SyncResult<OpportunityId> {
        self.record(CrmCall::CreateOpportunity(draft.clone()));
        Self::check(&self.fail_writes, "opportunity")?;
        let n = self.next_opportunity.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(OpportunityId::new(format!("o{n}")))
    }

    async fn update_opportunity(
        &self,
        id: &OpportunityId,
        update: &OpportunityUpdate,
    ) -> SyncResult<()> {
        self.record(CrmCall::UpdateOpportunity(id.clone(), update.clone()));
        Self::check(&self.fail_writes, "opportunity")
    }
}

/// Memory store that counts operations and can be told to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryQueueStore,
    pub gets: AtomicUsize,
    pub sets: AtomicUsize,
    pub deletes: AtomicUsize,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Reads a value without counting it.
    pub async fn peek(&self, key: &str) -> Option<String> {
        self.inner.get(key).await.unwrap()
    }
}

#[async_trait]
impl QueueStore for FlakyStore {
    async fn get(&self, key: &str) -> SyncResult<Option<String>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(SyncError::Storage("disk unavailable".into()));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> SyncResult<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::Storage("disk full".into()));
        }
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> SyncResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::Storage("disk full".into()));
        }
        self.inner.delete(key).await
    }
}

/// Installs a test subscriber once; honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
