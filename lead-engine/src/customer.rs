use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::time::timeout;

use crate::error::EngineError;
use crate::lead::{CustomerId, LeadId, TeamId, UserId};

/// A customer directory record. The engine only reads these; ownership
/// of the record and its schema stays with the host.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Customer {
    pub id: CustomerId,
    pub name: Option<String>,
    pub contact_name: Option<String>,
    pub tax_id: Option<String>,
    pub phone: Option<String>,
    pub mobile: Option<String>,
    pub email: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub owner: Option<UserId>,
    pub team: Option<TeamId>,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: Option<DateTime<Utc>>,
}

impl Customer {
    /// Recency key for selector tie-breaking: last modification,
    /// falling back to creation time.
    pub fn recency(&self) -> DateTime<Utc> {
        self.last_modified_at.unwrap_or(self.created_at)
    }
}

/// A lead reference returned by the ownership-conflict lookup.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OwnedLead {
    pub id: LeadId,
    pub owner: UserId,
}

/// Read-only query interface over the host's customer directory.
///
/// Every method is an exact-equality lookup on a normalized value,
/// excluding the lead's own linked record where given.
#[async_trait]
pub trait CustomerDirectory {
    async fn find_by_tax_id(
        &self,
        tax_id: &str,
        exclude: Option<CustomerId>,
    ) -> Result<Vec<Customer>, EngineError>;

    async fn find_by_phone_or_mobile(
        &self,
        phone: &str,
        exclude: Option<CustomerId>,
    ) -> Result<Vec<Customer>, EngineError>;

    async fn find_by_email(
        &self,
        email: &str,
        exclude: Option<CustomerId>,
    ) -> Result<Vec<Customer>, EngineError>;

    /// Other leads linked to `customer` whose owner differs from
    /// `proposed_owner`, for assignment-conflict validation.
    async fn find_other_leads_owned_by_different_user(
        &self,
        customer: CustomerId,
        proposed_owner: UserId,
        exclude_lead: LeadId,
    ) -> Result<Vec<OwnedLead>, EngineError>;
}

/// Directory backed by the host's Postgres database.
pub struct PgCustomerDirectory {
    pool: PgPool,
    query_timeout: Duration,
}

impl PgCustomerDirectory {
    pub fn new(database_url: &str, query_timeout: Duration) -> Result<Self, EngineError> {
        let pool = PgPoolOptions::new()
            .connect_lazy(database_url)
            .map_err(|error| EngineError::ConnectionError { error })?;

        Ok(Self {
            pool,
            query_timeout,
        })
    }

    pub fn from_pool(pool: PgPool, query_timeout: Duration) -> Self {
        Self {
            pool,
            query_timeout,
        }
    }

    async fn fetch_customers(
        &self,
        command: &str,
        query: sqlx::query::QueryAs<'_, sqlx::Postgres, Customer, sqlx::postgres::PgArguments>,
    ) -> Result<Vec<Customer>, EngineError> {
        let fut = query.fetch_all(&self.pool);
        match timeout(self.query_timeout, fut).await {
            Ok(Ok(rows)) => Ok(rows),
            Ok(Err(error)) => Err(EngineError::QueryError {
                command: command.to_owned(),
                error,
            }),
            Err(_) => Err(EngineError::QueryTimeout {
                command: command.to_owned(),
                timeout_ms: self.query_timeout.as_millis() as u64,
            }),
        }
    }
}

const CUSTOMER_COLUMNS: &str = r#"
id, name, contact_name, tax_id, phone, mobile, email, street, city,
owner_id AS owner, team_id AS team, created_at, last_modified_at
"#;

#[async_trait]
impl CustomerDirectory for PgCustomerDirectory {
    async fn find_by_tax_id(
        &self,
        tax_id: &str,
        exclude: Option<CustomerId>,
    ) -> Result<Vec<Customer>, EngineError> {
        let sql = format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE tax_id = $1 AND ($2::uuid IS NULL OR id != $2)"
        );
        let query = sqlx::query_as::<_, Customer>(&sql)
            .bind(tax_id)
            .bind(exclude);
        self.fetch_customers("find_by_tax_id", query).await
    }

    async fn find_by_phone_or_mobile(
        &self,
        phone: &str,
        exclude: Option<CustomerId>,
    ) -> Result<Vec<Customer>, EngineError> {
        let sql = format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE (phone = $1 OR mobile = $1) AND ($2::uuid IS NULL OR id != $2)"
        );
        let query = sqlx::query_as::<_, Customer>(&sql)
            .bind(phone)
            .bind(exclude);
        self.fetch_customers("find_by_phone_or_mobile", query).await
    }

    async fn find_by_email(
        &self,
        email: &str,
        exclude: Option<CustomerId>,
    ) -> Result<Vec<Customer>, EngineError> {
        let sql = format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE email = $1 AND ($2::uuid IS NULL OR id != $2)"
        );
        let query = sqlx::query_as::<_, Customer>(&sql)
            .bind(email)
            .bind(exclude);
        self.fetch_customers("find_by_email", query).await
    }

    async fn find_other_leads_owned_by_different_user(
        &self,
        customer: CustomerId,
        proposed_owner: UserId,
        exclude_lead: LeadId,
    ) -> Result<Vec<OwnedLead>, EngineError> {
        let sql = r#"
SELECT id, owner_id AS owner
FROM leads
WHERE customer_id = $1
  AND owner_id IS NOT NULL
  AND owner_id != $2
  AND id != $3
"#;
        let fut = sqlx::query_as::<_, OwnedLead>(sql)
            .bind(customer)
            .bind(proposed_owner)
            .bind(exclude_lead)
            .fetch_all(&self.pool);
        match timeout(self.query_timeout, fut).await {
            Ok(Ok(rows)) => Ok(rows),
            Ok(Err(error)) => Err(EngineError::QueryError {
                command: "find_other_leads_owned_by_different_user".to_owned(),
                error,
            }),
            Err(_) => Err(EngineError::QueryTimeout {
                command: "find_other_leads_owned_by_different_user".to_owned(),
                timeout_ms: self.query_timeout.as_millis() as u64,
            }),
        }
    }
}

/// In-memory directory for tests and local development.
///
/// Lookups can be toggled to fail per identifier to exercise the
/// partial-failure path, and every call is counted so tests can assert
/// that incomplete leads never trigger lookups.
#[derive(Default)]
pub struct MemoryDirectory {
    customers: Mutex<Vec<Customer>>,
    other_leads: Mutex<HashMap<CustomerId, Vec<OwnedLead>>>,
    lookup_calls: AtomicUsize,
    fail_tax_id: std::sync::atomic::AtomicBool,
    fail_phone: std::sync::atomic::AtomicBool,
    fail_email: std::sync::atomic::AtomicBool,
    fail_ownership: std::sync::atomic::AtomicBool,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_customer(&self, customer: Customer) {
        self.customers.lock().unwrap().push(customer);
    }

    pub fn insert_other_lead(&self, customer: CustomerId, lead: OwnedLead) {
        self.other_leads
            .lock()
            .unwrap()
            .entry(customer)
            .or_default()
            .push(lead);
    }

    pub fn fail_tax_id_lookups(&self, fail: bool) {
        self.fail_tax_id.store(fail, Ordering::SeqCst);
    }

    pub fn fail_phone_lookups(&self, fail: bool) {
        self.fail_phone.store(fail, Ordering::SeqCst);
    }

    pub fn fail_email_lookups(&self, fail: bool) {
        self.fail_email.store(fail, Ordering::SeqCst);
    }

    pub fn fail_ownership_lookups(&self, fail: bool) {
        self.fail_ownership.store(fail, Ordering::SeqCst);
    }

    pub fn lookup_calls(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    fn filtered<F>(&self, exclude: Option<CustomerId>, pred: F) -> Vec<Customer>
    where
        F: Fn(&Customer) -> bool,
    {
        self.customers
            .lock()
            .unwrap()
            .iter()
            .filter(|c| Some(c.id) != exclude && pred(c))
            .cloned()
            .collect()
    }

    fn simulated_failure(command: &str) -> EngineError {
        EngineError::QueryTimeout {
            command: command.to_owned(),
            timeout_ms: 0,
        }
    }
}

#[async_trait]
impl CustomerDirectory for MemoryDirectory {
    async fn find_by_tax_id(
        &self,
        tax_id: &str,
        exclude: Option<CustomerId>,
    ) -> Result<Vec<Customer>, EngineError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_tax_id.load(Ordering::SeqCst) {
            return Err(Self::simulated_failure("find_by_tax_id"));
        }
        Ok(self.filtered(exclude, |c| c.tax_id.as_deref() == Some(tax_id)))
    }

    async fn find_by_phone_or_mobile(
        &self,
        phone: &str,
        exclude: Option<CustomerId>,
    ) -> Result<Vec<Customer>, EngineError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_phone.load(Ordering::SeqCst) {
            return Err(Self::simulated_failure("find_by_phone_or_mobile"));
        }
        Ok(self.filtered(exclude, |c| {
            c.phone.as_deref() == Some(phone) || c.mobile.as_deref() == Some(phone)
        }))
    }

    async fn find_by_email(
        &self,
        email: &str,
        exclude: Option<CustomerId>,
    ) -> Result<Vec<Customer>, EngineError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_email.load(Ordering::SeqCst) {
            return Err(Self::simulated_failure("find_by_email"));
        }
        Ok(self.filtered(exclude, |c| c.email.as_deref() == Some(email)))
    }

    async fn find_other_leads_owned_by_different_user(
        &self,
        customer: CustomerId,
        proposed_owner: UserId,
        exclude_lead: LeadId,
    ) -> Result<Vec<OwnedLead>, EngineError> {
        if self.fail_ownership.load(Ordering::SeqCst) {
            return Err(Self::simulated_failure(
                "find_other_leads_owned_by_different_user",
            ));
        }
        let map = self.other_leads.lock().unwrap();
        Ok(map
            .get(&customer)
            .map(|leads| {
                leads
                    .iter()
                    .filter(|l| l.owner != proposed_owner && l.id != exclude_lead)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
