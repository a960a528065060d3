use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::session::{DialogueStep, Intent};

/// Lifecycle of a service request. Dialogues only ever create `pending` ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Processed,
    Completed,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Processed => "processed",
            RequestStatus::Completed => "completed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(RequestStatus::Pending),
            "processed" => Some(RequestStatus::Processed),
            "completed" => Some(RequestStatus::Completed),
            _ => None,
        }
    }
}

/// Outcome recorded on a call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    InProgress,
    Forwarded,
    Completed,
    Failed,
}

impl CallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CallStatus::InProgress => "in_progress",
            CallStatus::Forwarded => "forwarded",
            CallStatus::Completed => "completed",
            CallStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "in_progress" => Some(CallStatus::InProgress),
            "forwarded" => Some(CallStatus::Forwarded),
            "completed" => Some(CallStatus::Completed),
            "failed" => Some(CallStatus::Failed),
            _ => None,
        }
    }
}

/// Customer as persisted at the end of a completed dialogue.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Customer {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCustomer {
    pub first_name: String,
    pub last_name: String,
    pub address: String,
    pub phone_number: Option<String>,
}

/// The terminal artifact a dialogue exists to produce.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceRequest {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub intent: Intent,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Caller,
    Agent,
}

/// One line of the append-only conversation trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TraceEntry {
    pub speaker: Speaker,
    pub step: DialogueStep,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl TraceEntry {
    pub fn caller(step: DialogueStep, text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Caller,
            step,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn agent(step: DialogueStep, text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Agent,
            step,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Durable record of one call: who called, how it ended and what was said.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CallLog {
    pub id: Uuid,
    pub call_sid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub call_status: CallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<Uuid>,
    pub conversation_log: Vec<TraceEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CustomerWithRequests {
    #[serde(flatten)]
    pub customer: Customer,
    pub service_requests: Vec<ServiceRequest>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ServiceRequestWithCustomer {
    #[serde(flatten)]
    pub request: ServiceRequest,
    pub customer: Option<Customer>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CallLogWithCustomer {
    #[serde(flatten)]
    pub call: CallLog,
    pub customer: Option<Customer>,
}

/// Row counts reported by the health endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RecordStats {
    pub total_calls: i64,
    pub total_customers: i64,
    pub total_requests: i64,
}
