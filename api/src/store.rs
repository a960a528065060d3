//! Postgres-backed trace writer, customer/request store and read queries.

use std::collections::HashMap;

use async_trait::async_trait;
use callflow_core::collaborators::{RecordQueries, RequestStore, TraceWriter};
use callflow_core::error::StoreError;
use callflow_core::records::{
    CallLog, CallLogWithCustomer, CallStatus, Customer, CustomerWithRequests, NewCustomer,
    RecordStats, RequestStatus, ServiceRequest, ServiceRequestWithCustomer, TraceEntry,
};
use callflow_core::session::Intent;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

#[derive(Clone)]
pub struct PgRecords {
    pool: PgPool,
}

impl PgRecords {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn store_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::RowNotFound => StoreError::NotFound(err.to_string()),
        sqlx::Error::Database(db)
            if db
                .code()
                .is_some_and(|code| code.starts_with("23")) =>
        {
            StoreError::Constraint(db.message().to_string())
        }
        _ => StoreError::Backend(err.to_string()),
    }
}

#[derive(sqlx::FromRow)]
struct CustomerRow {
    id: Uuid,
    first_name: String,
    last_name: String,
    address: String,
    phone_number: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<CustomerRow> for Customer {
    fn from(row: CustomerRow) -> Self {
        Customer {
            id: row.id,
            first_name: row.first_name,
            last_name: row.last_name,
            address: row.address,
            phone_number: row.phone_number,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RequestRow {
    id: Uuid,
    customer_id: Uuid,
    intent: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<RequestRow> for ServiceRequest {
    type Error = StoreError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        let status = RequestStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Backend(format!("unknown request status '{}'", row.status))
        })?;
        Ok(ServiceRequest {
            id: row.id,
            customer_id: row.customer_id,
            intent: Intent::parse(&row.intent),
            status,
            created_at: row.created_at,
        })
    }
}

/// Joined rows carry the customer in `c_*` columns, all null when absent.
#[derive(sqlx::FromRow)]
struct JoinedCustomer {
    c_id: Option<Uuid>,
    c_first_name: Option<String>,
    c_last_name: Option<String>,
    c_address: Option<String>,
    c_phone_number: Option<String>,
    c_created_at: Option<DateTime<Utc>>,
}

impl JoinedCustomer {
    fn into_customer(self) -> Option<Customer> {
        Some(Customer {
            id: self.c_id?,
            first_name: self.c_first_name.unwrap_or_default(),
            last_name: self.c_last_name.unwrap_or_default(),
            address: self.c_address.unwrap_or_default(),
            phone_number: self.c_phone_number,
            created_at: self.c_created_at?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RequestWithCustomerRow {
    #[sqlx(flatten)]
    request: RequestRow,
    #[sqlx(flatten)]
    customer: JoinedCustomer,
}

#[derive(sqlx::FromRow)]
struct CallLogRow {
    id: Uuid,
    call_sid: String,
    phone_number: Option<String>,
    call_status: String,
    customer_id: Option<Uuid>,
    conversation_log: Json<Vec<TraceEntry>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[sqlx(flatten)]
    customer: JoinedCustomer,
}

const JOINED_CUSTOMER_COLUMNS: &str = r#"
    c.id AS c_id,
    c.first_name AS c_first_name,
    c.last_name AS c_last_name,
    c.address AS c_address,
    c.phone_number AS c_phone_number,
    c.created_at AS c_created_at
"#;

#[async_trait]
impl TraceWriter for PgRecords {
    async fn open_call(&self, call_id: &str, caller_number: Option<&str>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO call_logs (id, call_sid, phone_number)
            VALUES ($1, $2, $3)
            ON CONFLICT (call_sid) DO NOTHING
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(call_id)
        .bind(caller_number)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    async fn append(&self, call_id: &str, entry: TraceEntry) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE call_logs
            SET conversation_log = conversation_log || jsonb_build_array($2::jsonb),
                updated_at = now()
            WHERE call_sid = $1
            "#,
        )
        .bind(call_id)
        .bind(Json(&entry))
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("call log {call_id}")));
        }
        Ok(())
    }

    async fn set_status(
        &self,
        call_id: &str,
        status: CallStatus,
        customer_id: Option<Uuid>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE call_logs
            SET call_status = $2,
                customer_id = COALESCE($3, customer_id),
                updated_at = now()
            WHERE call_sid = $1
            "#,
        )
        .bind(call_id)
        .bind(status.as_str())
        .bind(customer_id)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("call log {call_id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl RequestStore for PgRecords {
    async fn create_customer_with_request(
        &self,
        customer: NewCustomer,
        intent: Intent,
    ) -> Result<(Customer, ServiceRequest), StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        let customer = sqlx::query_as::<_, CustomerRow>(
            r#"
            INSERT INTO customers (id, first_name, last_name, address, phone_number)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, first_name, last_name, address, phone_number, created_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&customer.first_name)
        .bind(&customer.last_name)
        .bind(&customer.address)
        .bind(customer.phone_number.as_deref())
        .fetch_one(&mut *tx)
        .await
        .map_err(store_error)?;

        let request = sqlx::query_as::<_, RequestRow>(
            r#"
            INSERT INTO service_requests (id, customer_id, intent, status)
            VALUES ($1, $2, $3, $4)
            RETURNING id, customer_id, intent, status, created_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(customer.id)
        .bind(intent.as_str())
        .bind(RequestStatus::Pending.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(store_error)?;

        // Dropping `tx` on any early return above rolls both inserts back.
        let request = ServiceRequest::try_from(request)?;
        tx.commit().await.map_err(store_error)?;
        Ok((customer.into(), request))
    }
}

#[async_trait]
impl RecordQueries for PgRecords {
    async fn list_customers(&self, limit: usize) -> Result<Vec<CustomerWithRequests>, StoreError> {
        let customers = sqlx::query_as::<_, CustomerRow>(
            r#"
            SELECT id, first_name, last_name, address, phone_number, created_at
            FROM customers
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        let ids: Vec<Uuid> = customers.iter().map(|c| c.id).collect();
        let requests = sqlx::query_as::<_, RequestRow>(
            r#"
            SELECT id, customer_id, intent, status, created_at
            FROM service_requests
            WHERE customer_id = ANY($1)
            ORDER BY created_at DESC
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        let mut by_customer: HashMap<Uuid, Vec<ServiceRequest>> = HashMap::new();
        for row in requests {
            let request = ServiceRequest::try_from(row)?;
            by_customer
                .entry(request.customer_id)
                .or_default()
                .push(request);
        }

        Ok(customers
            .into_iter()
            .map(|row| {
                let service_requests = by_customer.remove(&row.id).unwrap_or_default();
                CustomerWithRequests {
                    customer: row.into(),
                    service_requests,
                }
            })
            .collect())
    }

    async fn list_service_requests(
        &self,
        limit: usize,
    ) -> Result<Vec<ServiceRequestWithCustomer>, StoreError> {
        let rows = sqlx::query_as::<_, RequestWithCustomerRow>(&format!(
            r#"
            SELECT r.id, r.customer_id, r.intent, r.status, r.created_at,
                   {JOINED_CUSTOMER_COLUMNS}
            FROM service_requests r
            LEFT JOIN customers c ON c.id = r.customer_id
            ORDER BY r.created_at DESC
            LIMIT $1
            "#
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.into_iter()
            .map(|row| {
                Ok(ServiceRequestWithCustomer {
                    request: row.request.try_into()?,
                    customer: row.customer.into_customer(),
                })
            })
            .collect()
    }

    async fn list_call_logs(&self, limit: usize) -> Result<Vec<CallLogWithCustomer>, StoreError> {
        let rows = sqlx::query_as::<_, CallLogRow>(&format!(
            r#"
            SELECT l.id, l.call_sid, l.phone_number, l.call_status, l.customer_id,
                   l.conversation_log, l.created_at, l.updated_at,
                   {JOINED_CUSTOMER_COLUMNS}
            FROM call_logs l
            LEFT JOIN customers c ON c.id = l.customer_id
            ORDER BY l.created_at DESC
            LIMIT $1
            "#
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.into_iter()
            .map(|row| {
                let call_status = CallStatus::parse(&row.call_status).ok_or_else(|| {
                    StoreError::Backend(format!("unknown call status '{}'", row.call_status))
                })?;
                Ok(CallLogWithCustomer {
                    call: CallLog {
                        id: row.id,
                        call_sid: row.call_sid,
                        phone_number: row.phone_number,
                        call_status,
                        customer_id: row.customer_id,
                        conversation_log: row.conversation_log.0,
                        created_at: row.created_at,
                        updated_at: row.updated_at,
                    },
                    customer: row.customer.into_customer(),
                })
            })
            .collect()
    }

    async fn stats(&self) -> Result<RecordStats, StoreError> {
        let (total_calls, total_customers, total_requests) =
            sqlx::query_as::<_, (i64, i64, i64)>(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM call_logs),
                    (SELECT COUNT(*) FROM customers),
                    (SELECT COUNT(*) FROM service_requests)
                "#,
            )
            .fetch_one(&self.pool)
            .await
            .map_err(store_error)?;

        Ok(RecordStats {
            total_calls,
            total_customers,
            total_requests,
        })
    }
}
