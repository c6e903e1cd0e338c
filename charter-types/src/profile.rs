//! Identity candidates handed to the resolver.
//!
//! A candidate carries the key the CRM is searched by and the fields used
//! to create a record when none exists yet.

use serde::{Deserialize, Serialize};

/// An application user who should map to a CRM contact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Application-side user id.
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
}

impl UserProfile {
    #[must_use]
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            ..Default::default()
        }
    }

    /// Cache and lookup key: the trimmed, lower-cased email.
    #[must_use]
    pub fn resolution_key(&self) -> String {
        self.email.trim().to_lowercase()
    }
}

/// An operator or broker organization that should map to a CRM company.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrganizationProfile {
    /// Application-side organization id.
    pub id: String,
    pub name: String,
    /// Web domain, preferred as the lookup key when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl OrganizationProfile {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Cache and lookup key: the domain when set, otherwise the name.
    #[must_use]
    pub fn resolution_key(&self) -> String {
        match self.domain.as_deref().map(str::trim) {
            Some(domain) if !domain.is_empty() => domain.to_lowercase(),
            _ => self.name.trim().to_lowercase(),
        }
    }
}
