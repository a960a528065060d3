//! In-process record store. Backs tests and local runs without a database.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::collaborators::{RecordQueries, RequestStore, TraceWriter};
use crate::error::StoreError;
use crate::records::{
    CallLog, CallLogWithCustomer, CallStatus, Customer, CustomerWithRequests, NewCustomer,
    RecordStats, RequestStatus, ServiceRequest, ServiceRequestWithCustomer, TraceEntry,
};
use crate::session::Intent;

#[derive(Debug, Default)]
struct Tables {
    calls: Vec<CallLog>,
    customers: Vec<Customer>,
    requests: Vec<ServiceRequest>,
}

#[derive(Debug, Default)]
pub struct MemoryRecords {
    tables: Mutex<Tables>,
    fail_writes: AtomicBool,
    fail_requests: AtomicBool,
}

impl MemoryRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every customer/request write fail until switched back.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Reject the service request half of a customer/request write, after
    /// the customer row has been built.
    pub fn fail_requests(&self, fail: bool) {
        self.fail_requests.store(fail, Ordering::SeqCst);
    }

    pub fn call(&self, call_sid: &str) -> Option<CallLog> {
        self.lock()
            .ok()?
            .calls
            .iter()
            .find(|c| c.call_sid == call_sid)
            .cloned()
    }

    pub fn customers(&self) -> Vec<Customer> {
        self.lock().map(|t| t.customers.clone()).unwrap_or_default()
    }

    pub fn service_requests(&self) -> Vec<ServiceRequest> {
        self.lock().map(|t| t.requests.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Backend("record tables poisoned".to_string()))
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("writes disabled".to_string()));
        }
        Ok(())
    }
}

fn find_call<'a>(tables: &'a mut Tables, call_sid: &str) -> Result<&'a mut CallLog, StoreError> {
    tables
        .calls
        .iter_mut()
        .find(|c| c.call_sid == call_sid)
        .ok_or_else(|| StoreError::NotFound(format!("call log {call_sid}")))
}

#[async_trait]
impl TraceWriter for MemoryRecords {
    async fn open_call(&self, call_id: &str, caller_number: Option<&str>) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        if tables.calls.iter().any(|c| c.call_sid == call_id) {
            return Ok(());
        }
        let now = Utc::now();
        tables.calls.push(CallLog {
            id: Uuid::now_v7(),
            call_sid: call_id.to_string(),
            phone_number: caller_number.map(str::to_string),
            call_status: CallStatus::InProgress,
            customer_id: None,
            conversation_log: Vec::new(),
            created_at: now,
            updated_at: now,
        });
        Ok(())
    }

    async fn append(&self, call_id: &str, entry: TraceEntry) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let call = find_call(&mut tables, call_id)?;
        call.conversation_log.push(entry);
        call.updated_at = Utc::now();
        Ok(())
    }

    async fn set_status(
        &self,
        call_id: &str,
        status: CallStatus,
        customer_id: Option<Uuid>,
    ) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let call = find_call(&mut tables, call_id)?;
        call.call_status = status;
        if customer_id.is_some() {
            call.customer_id = customer_id;
        }
        call.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl RequestStore for MemoryRecords {
    async fn create_customer_with_request(
        &self,
        customer: NewCustomer,
        intent: Intent,
    ) -> Result<(Customer, ServiceRequest), StoreError> {
        self.check_writable()?;
        let mut tables = self.lock()?;
        let customer = Customer {
            id: Uuid::now_v7(),
            first_name: customer.first_name,
            last_name: customer.last_name,
            address: customer.address,
            phone_number: customer.phone_number,
            created_at: Utc::now(),
        };
        if self.fail_requests.load(Ordering::SeqCst) {
            return Err(StoreError::Constraint(format!(
                "service request for customer {} rejected",
                customer.id
            )));
        }
        let request = ServiceRequest {
            id: Uuid::now_v7(),
            customer_id: customer.id,
            intent,
            status: RequestStatus::Pending,
            created_at: Utc::now(),
        };
        tables.customers.push(customer.clone());
        tables.requests.push(request.clone());
        Ok((customer, request))
    }
}

#[async_trait]
impl RecordQueries for MemoryRecords {
    async fn list_customers(&self, limit: usize) -> Result<Vec<CustomerWithRequests>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .customers
            .iter()
            .rev()
            .take(limit)
            .map(|customer| CustomerWithRequests {
                customer: customer.clone(),
                service_requests: tables
                    .requests
                    .iter()
                    .filter(|r| r.customer_id == customer.id)
                    .cloned()
                    .collect(),
            })
            .collect())
    }

    async fn list_service_requests(
        &self,
        limit: usize,
    ) -> Result<Vec<ServiceRequestWithCustomer>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .requests
            .iter()
            .rev()
            .take(limit)
            .map(|request| ServiceRequestWithCustomer {
                request: request.clone(),
                customer: tables
                    .customers
                    .iter()
                    .find(|c| c.id == request.customer_id)
                    .cloned(),
            })
            .collect())
    }

    async fn list_call_logs(&self, limit: usize) -> Result<Vec<CallLogWithCustomer>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .calls
            .iter()
            .rev()
            .take(limit)
            .map(|call| CallLogWithCustomer {
                call: call.clone(),
                customer: call
                    .customer_id
                    .and_then(|id| tables.customers.iter().find(|c| c.id == id).cloned()),
            })
            .collect())
    }

    async fn stats(&self) -> Result<RecordStats, StoreError> {
        let tables = self.lock()?;
        Ok(RecordStats {
            total_calls: tables.calls.len() as i64,
            total_customers: tables.customers.len() as i64,
            total_requests: tables.requests.len() as i64,
        })
    }
}
