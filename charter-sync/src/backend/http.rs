//! HTTP implementation of the CRM adapter.
//!
//! Every call is a `POST {base_url}/crm-proxy` carrying `{action, payload}`.
//! The proxy holds the real CRM credentials and answers with a
//! [`BackendResponse`] envelope.

use super::contract::{
    ActivityNote, BackendResponse, CompanyDraft, ContactDraft, CrmBackend, OpportunityDraft,
    OpportunityUpdate,
};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use charter_types::{ContactId, OpportunityId, Properties};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

/// Path of the proxy endpoint, relative to the configured base URL.
pub const PROXY_PATH: &str = "crm-proxy";

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
enum CrmAction {
    FindContact,
    CreateContact,
    UpdateContact,
    FindCompany,
    CreateCompany,
    AddNote,
    CreateOpportunity,
    UpdateOpportunity,
}

#[derive(Debug, Serialize)]
struct ProxyRequest<'a, P: Serialize> {
    action: CrmAction,
    payload: &'a P,
}

/// Reference to a CRM record, as returned by find/create actions.
#[derive(Debug, Deserialize)]
struct RecordRef {
    id: String,
}

/// CRM adapter speaking to the proxy over HTTPS.
pub struct HttpCrmBackend {
    endpoint: String,
    api_key: String,
    client: Client,
}

impl HttpCrmBackend {
    /// Creates a backend from the sync config.
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let base = config.backend_base_url.trim().trim_end_matches('/');
        if base.is_empty() {
            return Err(SyncError::Config("backend_base_url is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| SyncError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            endpoint: format!("{base}/{PROXY_PATH}"),
            api_key: config.backend_key.clone(),
            client,
        })
    }

    /// Full URL every request is posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call<P, T>(&self, action: CrmAction, payload: &P) -> SyncResult<Option<T>>
    where
        P: Serialize + Sync,
        T: DeserializeOwned,
    {
        debug!("CRM request {:?}", action);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&ProxyRequest { action, payload })
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("{action:?} request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SyncError::Network(format!("{action:?} response unreadable: {e}")))?;

        let envelope: BackendResponse<T> = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(e) if status.is_success() => return Err(SyncError::Serialization(e)),
            Err(_) => {
                return Err(SyncError::Backend {
                    status: Some(status.as_u16()),
                    message: body,
                })
            }
        };

        match envelope.into_result() {
            Err(SyncError::Backend { status: None, message }) if !status.is_success() => {
                Err(SyncError::Backend {
                    status: Some(status.as_u16()),
                    message,
                })
            }
            other => other,
        }
    }

    async fn call_for_record<P>(&self, action: CrmAction, payload: &P) -> SyncResult<String>
    where
        P: Serialize + Sync,
    {
        self.call::<_, RecordRef>(action, payload)
            .await?
            .map(|record| record.id)
            .ok_or_else(|| SyncError::backend(format!("{action:?} returned no record")))
    }
}

#[async_trait]
impl CrmBackend for HttpCrmBackend {
    async fn find_contact(&self, email: &str) -> SyncResult<Option<ContactId>> {
        let found: Option<RecordRef> = self
            .call(CrmAction::FindContact, &json!({ "email": email }))
            .await?;
        Ok(found.map(|record| ContactId::new(record.id)))
    }

    async fn create_contact(&self, draft: &ContactDraft) -> SyncResult<ContactId> {
        self.call_for_record(CrmAction::CreateContact, draft)
            .await
            .map(ContactId::new)
    }

    async fn update_contact(&self, id: &ContactId, properties: &Properties) -> SyncResult<()> {
        self.call::<_, serde_json::Value>(
            CrmAction::UpdateContact,
            &json!({ "contact_id": id, "properties": properties }),
        )
        .await?;
        Ok(())
    }

    async fn find_company(&self, key: &str) -> SyncResult<Option<ContactId>> {
        let found: Option<RecordRef> = self
            .call(CrmAction::FindCompany, &json!({ "key": key }))
            .await?;
        Ok(found.map(|record| ContactId::new(record.id)))
    }

    async fn create_company(&self, draft: &CompanyDraft) -> SyncResult<ContactId> {
        self.call_for_record(CrmAction::CreateCompany, draft)
            .await
            .map(ContactId::new)
    }

    async fn add_note(&self, note: &ActivityNote) -> SyncResult<()> {
        self.call::<_, serde_json::Value>(CrmAction::AddNote, note)
            .await?;
        Ok(())
    }

    async fn create_opportunity(&self, draft: &OpportunityDraft) -> SyncResult<OpportunityId> {
        self.call_for_record(CrmAction::CreateOpportunity, draft)
            .await
            .map(OpportunityId::new)
    }

    async fn update_opportunity(
        &self,
        id: &OpportunityId,
        update: &OpportunityUpdate,
    ) -> SyncResult<()> {
        self.call::<_, serde_json::Value>(
            CrmAction::UpdateOpportunity,
            &json!({ "opportunity_id": id, "update": update }),
        )
        .await?;
        Ok(())
    }
}
