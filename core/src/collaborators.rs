//! Contracts for everything the dialogue engine talks to but does not own.
//!
//! The four "soft" collaborators (classifier, validator, synthesizer, response
//! generator) may fail at any time; their callers always hold a fallback.
//! The stores are the durable side of a call.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CollaboratorError, StoreError};
use crate::prompts::{PromptContext, PromptExtras};
use crate::records::{
    CallLogWithCustomer, CallStatus, Customer, CustomerWithRequests, NewCustomer, RecordStats,
    ServiceRequest, ServiceRequestWithCustomer, TraceEntry,
};
use crate::session::Intent;

/// Entities keyed by kind ("phone", "zip_code", "address", ...).
pub type Entities = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierVerdict {
    pub intent: Intent,
    pub confidence: f64,
    pub entities: Entities,
}

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// Tag reported as the classification method when this classifier wins.
    fn method(&self) -> &'static str;

    async fn classify(&self, text: &str) -> Result<ClassifierVerdict, CollaboratorError>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddressComponents {
    pub street_number: Option<String>,
    pub street_name: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zipcode: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddressValidation {
    pub is_valid: bool,
    pub confidence: f64,
    pub normalized: Option<String>,
    pub components: AddressComponents,
}

#[async_trait]
pub trait AddressValidator: Send + Sync {
    async fn validate(&self, text: &str) -> Result<AddressValidation, CollaboratorError>;
}

/// Publicly reachable reference to synthesized audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioRef {
    pub url: String,
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<AudioRef, CollaboratorError>;
}

#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn render(
        &self,
        context: PromptContext,
        last_utterance: Option<&str>,
        extras: &PromptExtras,
    ) -> Result<String, CollaboratorError>;
}

/// Append-only conversation log, one record per call.
#[async_trait]
pub trait TraceWriter: Send + Sync {
    async fn open_call(&self, call_id: &str, caller_number: Option<&str>) -> Result<(), StoreError>;

    /// Appends one entry. Never rewrites earlier entries.
    async fn append(&self, call_id: &str, entry: TraceEntry) -> Result<(), StoreError>;

    async fn set_status(
        &self,
        call_id: &str,
        status: CallStatus,
        customer_id: Option<Uuid>,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Stores a customer and their pending service request as one unit.
    /// On error neither row exists.
    async fn create_customer_with_request(
        &self,
        customer: NewCustomer,
        intent: Intent,
    ) -> Result<(Customer, ServiceRequest), StoreError>;
}

/// Read side of the durable records, newest first.
#[async_trait]
pub trait RecordQueries: Send + Sync {
    async fn list_customers(&self, limit: usize) -> Result<Vec<CustomerWithRequests>, StoreError>;

    async fn list_service_requests(
        &self,
        limit: usize,
    ) -> Result<Vec<ServiceRequestWithCustomer>, StoreError>;

    async fn list_call_logs(&self, limit: usize) -> Result<Vec<CallLogWithCustomer>, StoreError>;

    async fn stats(&self) -> Result<RecordStats, StoreError>;
}

/// Stand-in for a collaborator with no credentials. Every call reports
/// `Unavailable`, which the fallback tiers treat as an immediate miss.
#[derive(Debug, Clone, Copy)]
pub struct Unconfigured(pub &'static str);

#[async_trait]
impl IntentClassifier for Unconfigured {
    fn method(&self) -> &'static str {
        self.0
    }

    async fn classify(&self, _text: &str) -> Result<ClassifierVerdict, CollaboratorError> {
        Err(CollaboratorError::Unavailable(self.0))
    }
}

#[async_trait]
impl AddressValidator for Unconfigured {
    async fn validate(&self, _text: &str) -> Result<AddressValidation, CollaboratorError> {
        Err(CollaboratorError::Unavailable(self.0))
    }
}

#[async_trait]
impl SpeechSynthesizer for Unconfigured {
    async fn synthesize(&self, _text: &str) -> Result<AudioRef, CollaboratorError> {
        Err(CollaboratorError::Unavailable(self.0))
    }
}

#[async_trait]
impl ResponseGenerator for Unconfigured {
    async fn render(
        &self,
        _context: PromptContext,
        _last_utterance: Option<&str>,
        _extras: &PromptExtras,
    ) -> Result<String, CollaboratorError> {
        Err(CollaboratorError::Unavailable(self.0))
    }
}
