//! The CRM adapter contract.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use charter_types::{
    ContactId, OpportunityId, OrganizationProfile, Properties, UserProfile,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Uniform response envelope returned by the CRM proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "statusCode", default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl<T> BackendResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            status_code: None,
        }
    }

    pub fn failure(error: impl Into<String>, status_code: Option<u16>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            status_code,
        }
    }

    /// Converts the envelope into a result. A successful envelope may carry no data.
    pub fn into_result(self) -> SyncResult<Option<T>> {
        if self.success {
            Ok(self.data)
        } else {
            Err(SyncError::Backend {
                status: self.status_code,
                message: self.error.unwrap_or_else(|| "unknown backend error".to_string()),
            })
        }
    }
}

/// Fields for a new CRM contact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactDraft {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    /// Application user id, stored on the contact for cross-reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_user_id: Option<String>,
}

impl From<&UserProfile> for ContactDraft {
    fn from(user: &UserProfile) -> Self {
        Self {
            email: user.email.trim().to_string(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            phone: user.phone.clone(),
            company: user.company.clone(),
            app_user_id: Some(user.id.clone()),
        }
    }
}

/// Fields for a new CRM company.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyDraft {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_organization_id: Option<String>,
}

impl From<&OrganizationProfile> for CompanyDraft {
    fn from(org: &OrganizationProfile) -> Self {
        Self {
            name: org.name.clone(),
            domain: org.domain.clone(),
            phone: org.phone.clone(),
            app_organization_id: Some(org.id.clone()),
        }
    }
}

/// A timeline note attached to a contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityNote {
    pub contact_id: ContactId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_id: Option<ContactId>,
    pub title: String,
    pub body: String,
    pub occurred_at: DateTime<Utc>,
}

/// Pipeline stage of a charter opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityStage {
    Requested,
    Quoted,
    Accepted,
    Declined,
    Booked,
    Cancelled,
    Paid,
}

/// Fields for a new opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityDraft {
    pub contact_id: ContactId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_id: Option<ContactId>,
    pub name: String,
    pub stage: OpportunityStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Properties::is_empty")]
    pub properties: Properties,
}

/// Changes to an existing opportunity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpportunityUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<OpportunityStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Properties::is_empty")]
    pub properties: Properties,
}

/// Operations the sync core needs from the CRM.
///
/// Transport details (verbs, auth, timeouts) belong to the implementation.
#[async_trait]
pub trait CrmBackend: Send + Sync {
    /// Looks up a contact by (normalized) email.
    async fn find_contact(&self, email: &str) -> SyncResult<Option<ContactId>>;

    async fn create_contact(&self, draft: &ContactDraft) -> SyncResult<ContactId>;

    async fn update_contact(&self, id: &ContactId, properties: &Properties) -> SyncResult<()>;

    /// Looks up a company by domain or normalized name.
    async fn find_company(&self, key: &str) -> SyncResult<Option<ContactId>>;

    async fn create_company(&self, draft: &CompanyDraft) -> SyncResult<ContactId>;

    async fn add_note(&self, note: &ActivityNote) -> SyncResult<()>;

    async fn create_opportunity(&self, draft: &OpportunityDraft) -> SyncResult<OpportunityId>;

    async fn update_opportunity(
        &self,
        id: &OpportunityId,
        update: &OpportunityUpdate,
    ) -> SyncResult<()>;
}
