//! CRM backend adapter.
//!
//! The sync core talks to the CRM only through [`CrmBackend`]. The HTTP
//! implementation forwards every call to a proxy that answers with the
//! uniform `{success, data, error, statusCode}` envelope.

pub mod contract;
pub mod http;

pub use contract::{
    ActivityNote, BackendResponse, CompanyDraft, ContactDraft, CrmBackend, OpportunityDraft,
    OpportunityStage, OpportunityUpdate,
};
pub use http::HttpCrmBackend;
