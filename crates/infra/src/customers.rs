//! Customer lookup used to validate invoice ownership.
//!
//! Customer management lives outside invoicing. This boundary only answers
//! "may an invoice be issued to this customer?".

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::instrument;

use forgebill_core::CustomerId;

use crate::invoice_store::StoreError;

#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    /// `true` if the customer exists and is active.
    async fn customer_exists(&self, id: CustomerId) -> Result<bool, StoreError>;
}

#[async_trait]
impl<D> CustomerDirectory for Arc<D>
where
    D: CustomerDirectory + ?Sized,
{
    async fn customer_exists(&self, id: CustomerId) -> Result<bool, StoreError> {
        (**self).customer_exists(id).await
    }
}

/// In-memory directory for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCustomerDirectory {
    customers: RwLock<HashSet<CustomerId>>,
}

impl InMemoryCustomerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: CustomerId) {
        // A poisoned lock only means another registration panicked; the set is still usable.
        let mut guard = self.customers.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(id);
    }
}

#[async_trait]
impl CustomerDirectory for InMemoryCustomerDirectory {
    async fn customer_exists(&self, id: CustomerId) -> Result<bool, StoreError> {
        let guard = self
            .customers
            .read()
            .map_err(|_| StoreError::Database("lock poisoned".to_string()))?;
        Ok(guard.contains(&id))
    }
}

/// Reads the `customers` table.
#[derive(Debug, Clone)]
pub struct PostgresCustomerDirectory {
    pool: PgPool,
}

impl PostgresCustomerDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CustomerDirectory for PostgresCustomerDirectory {
    #[instrument(skip(self), fields(customer_id = %id), err)]
    async fn customer_exists(&self, id: CustomerId) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM customers WHERE id = $1 AND is_active)",
        )
        .bind(id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("customer_exists: {e}")))
    }
}
