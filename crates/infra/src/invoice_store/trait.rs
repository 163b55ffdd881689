use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use forgebill_core::{CustomerId, DomainError, DomainResult, ExpectedVersion, InvoiceId, Money};
use forgebill_invoicing::{Invoice, InvoiceNumber, InvoiceStatus, Payment};

/// Builds the draft for a freshly allocated number inside the create transaction.
pub type InvoiceBuilder = Box<dyn FnOnce(InvoiceNumber) -> DomainResult<Invoice> + Send>;

/// Invoice store operation error.
///
/// These are **infrastructure errors** (storage, concurrency, integrity) as opposed to
/// domain errors (validation, lifecycle rules).
///
/// - **Conflict**: optimistic concurrency check failed, or a concurrent writer won a
///   uniqueness race. Safe to retry after re-reading.
/// - **NotFound**: the invoice row does not exist.
/// - **DuplicateNumber**: an invoice number was inserted twice (allocator bug).
/// - **Corrupt**: persisted data no longer satisfies a domain invariant.
/// - **Database**: anything else the backend reports.
/// - **Rejected**: the invoice builder refused the allocated number; nothing was written.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate invoice number: {0}")]
    DuplicateNumber(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error(transparent)]
    Rejected(DomainError),
}

/// An invoice together with its full payment history, read at one consistent point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceLedger {
    pub invoice: Invoice,
    /// Oldest first.
    pub payments: Vec<Payment>,
}

/// An invoice plus the pre-aggregated sum of its payments, for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceListing {
    pub invoice: Invoice,
    pub amount_paid: Money,
}

/// Listing filter. Empty filter lists everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvoiceFilter {
    pub status: Option<InvoiceStatus>,
    pub customer_id: Option<CustomerId>,
}

impl InvoiceFilter {
    pub fn matches(&self, invoice: &Invoice) -> bool {
        self.status.is_none_or(|s| s == invoice.status())
            && self.customer_id.is_none_or(|c| c == invoice.customer_id())
    }
}

/// Transactional persistence boundary for invoices, their line items and payments.
///
/// ## Implementation Requirements
///
/// Implementations must:
/// - allocate the number in `create_invoice` with a single atomic increment-and-return
///   per year, in the same transaction as the insert, so a failed create rolls it back
/// - reject `save_invoice` / `commit_payment` with `StoreError::Conflict` when the stored
///   version differs from the expectation
/// - persist the payment row and the invoice update of `commit_payment` atomically
/// - enforce uniqueness of `(invoice_id, idempotency_key)` and of invoice numbers
/// - return payments oldest first
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    /// Increment the `year` counter (initializing it at 0), build the draft for the new
    /// number and insert it, all or nothing.
    async fn create_invoice(
        &self,
        year: i32,
        build: InvoiceBuilder,
    ) -> Result<Invoice, StoreError>;

    /// Load an invoice and its payments consistently with each other.
    async fn load_ledger(&self, id: InvoiceId) -> Result<Option<InvoiceLedger>, StoreError>;

    /// Persist a mutated invoice (header + line items) if the stored version still
    /// equals `expected`.
    async fn save_invoice(
        &self,
        invoice: &Invoice,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError>;

    /// Append `payment` and persist the invoice mutation it caused, atomically, if the
    /// stored invoice version still equals `expected`.
    async fn commit_payment(
        &self,
        invoice: &Invoice,
        payment: &Payment,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError>;

    /// Invoices matching `filter`, ordered by invoice number.
    async fn list_invoices(
        &self,
        filter: InvoiceFilter,
    ) -> Result<Vec<InvoiceListing>, StoreError>;
}

#[async_trait]
impl<S> InvoiceStore for Arc<S>
where
    S: InvoiceStore + ?Sized,
{
    async fn create_invoice(
        &self,
        year: i32,
        build: InvoiceBuilder,
    ) -> Result<Invoice, StoreError> {
        (**self).create_invoice(year, build).await
    }

    async fn load_ledger(&self, id: InvoiceId) -> Result<Option<InvoiceLedger>, StoreError> {
        (**self).load_ledger(id).await
    }

    async fn save_invoice(
        &self,
        invoice: &Invoice,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        (**self).save_invoice(invoice, expected).await
    }

    async fn commit_payment(
        &self,
        invoice: &Invoice,
        payment: &Payment,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        (**self).commit_payment(invoice, payment, expected).await
    }

    async fn list_invoices(
        &self,
        filter: InvoiceFilter,
    ) -> Result<Vec<InvoiceListing>, StoreError> {
        (**self).list_invoices(filter).await
    }
}
