//! Invoice use cases (application-level orchestration).
//!
//! Every mutating operation follows the same pipeline:
//!
//! ```text
//! Request
//!   ↓
//! 1. Load invoice (and payments) from the store, remembering its version
//!   ↓
//! 2. Decide: call the pure aggregate method (mutates an in-memory copy)
//!   ↓
//! 3. Commit with ExpectedVersion::Exact(loaded version)
//! ```
//!
//! A stale version surfaces as `DomainError::Conflict`. Payment recording re-runs the
//! whole pipeline on conflict (bounded by `ServiceConfig::payment_max_retries`), so racing
//! payments are serialized and the loser is re-evaluated against the winner's state. All
//! other operations surface the conflict to the caller.

use chrono::{DateTime, Datelike, Utc};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use forgebill_core::{
    AggregateRoot, CustomerId, DomainError, ExpectedVersion, InvoiceId, Money, PaymentId,
};
use forgebill_invoicing::{
    CustomerBalance, Invoice, InvoiceStatus, InvoiceSummary, InvoiceUpdate, LineItemInput,
    NewInvoice, Payment, PaymentOutcome, RecordPayment, balance,
};

use crate::customers::CustomerDirectory;
use crate::invoice_store::{InvoiceFilter, InvoiceStore, StoreError};

/// Default optimistic retry budget for payment recording.
pub const DEFAULT_PAYMENT_MAX_RETRIES: u32 = 5;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Infrastructure failure that is not a domain outcome.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(msg) => ServiceError::Domain(DomainError::Conflict(msg)),
            StoreError::NotFound(msg) => ServiceError::Domain(DomainError::NotFound(msg)),
            StoreError::Rejected(err) => ServiceError::Domain(err),
            other => ServiceError::Store(other),
        }
    }
}

impl ServiceError {
    /// Stable machine-readable code for the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Domain(e) => e.code(),
            ServiceError::Store(_) => "INTERNAL",
        }
    }

    fn is_conflict(&self) -> bool {
        matches!(self, ServiceError::Domain(e) if e.is_retryable())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Extra attempts after an optimistic conflict while recording a payment.
    pub payment_max_retries: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            payment_max_retries: DEFAULT_PAYMENT_MAX_RETRIES,
        }
    }
}

/// An invoice plus its computed monetary position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceView {
    pub invoice: Invoice,
    pub amount_paid: Money,
    pub balance: Money,
}

impl InvoiceView {
    fn from_payments(invoice: Invoice, payments: &[Payment]) -> ServiceResult<Self> {
        let amount_paid = balance::amount_paid(payments)?;
        let balance = invoice.total().checked_sub(amount_paid)?;
        Ok(Self {
            invoice,
            amount_paid,
            balance,
        })
    }
}

/// Result of `record_payment`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPayment {
    pub payment: Payment,
    /// `true` when the idempotency key had already been used and nothing was written.
    pub replayed: bool,
    pub invoice_status: InvoiceStatus,
    pub balance: Money,
}

/// Orchestrates invoice use cases over an `InvoiceStore` and a `CustomerDirectory`.
#[derive(Debug)]
pub struct InvoiceService<S, C> {
    store: S,
    customers: C,
    config: ServiceConfig,
}

impl<S, C> InvoiceService<S, C> {
    pub fn new(store: S, customers: C) -> Self {
        Self::with_config(store, customers, ServiceConfig::default())
    }

    pub fn with_config(store: S, customers: C, config: ServiceConfig) -> Self {
        Self {
            store,
            customers,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn customers(&self) -> &C {
        &self.customers
    }

    pub fn config(&self) -> ServiceConfig {
        self.config
    }
}

impl<S, C> InvoiceService<S, C>
where
    S: InvoiceStore,
    C: CustomerDirectory,
{
    /// Create a draft invoice numbered for the current year.
    #[instrument(
        skip(self, input),
        fields(customer_id = %input.customer_id, line_items = input.line_items.len()),
        err
    )]
    pub async fn create_invoice(&self, input: NewInvoice) -> ServiceResult<InvoiceView> {
        input.validate()?;

        if !self.customers.customer_exists(input.customer_id).await? {
            return Err(DomainError::not_found(format!("customer {}", input.customer_id)).into());
        }

        let now = Utc::now();
        let id = InvoiceId::new();
        let invoice = self
            .store
            .create_invoice(
                now.year(),
                Box::new(move |number| Invoice::create(id, number, input, now)),
            )
            .await?;

        info!(
            invoice_id = %invoice.invoice_id(),
            number = %invoice.number(),
            total = %invoice.total(),
            "invoice created"
        );
        InvoiceView::from_payments(invoice, &[])
    }

    #[instrument(skip(self), err)]
    pub async fn get_invoice(&self, id: InvoiceId) -> ServiceResult<InvoiceView> {
        let ledger = self
            .store
            .load_ledger(id)
            .await?
            .ok_or_else(|| invoice_not_found(id))?;
        InvoiceView::from_payments(ledger.invoice, &ledger.payments)
    }

    /// Apply a partial update to a draft. `expected_version` lets callers detect edits
    /// made since they last read the invoice.
    #[instrument(skip(self, update), err)]
    pub async fn update_invoice(
        &self,
        id: InvoiceId,
        update: InvoiceUpdate,
        expected_version: Option<u64>,
    ) -> ServiceResult<InvoiceView> {
        self.mutate(id, expected_version, |invoice, now| invoice.update(update, now))
            .await
    }

    #[instrument(skip(self, items), fields(line_items = items.len()), err)]
    pub async fn replace_line_items(
        &self,
        id: InvoiceId,
        items: Vec<LineItemInput>,
        expected_version: Option<u64>,
    ) -> ServiceResult<InvoiceView> {
        self.mutate(id, expected_version, |invoice, now| {
            invoice.replace_line_items(&items, now)
        })
        .await
    }

    #[instrument(skip(self), err)]
    pub async fn apply_discount(
        &self,
        id: InvoiceId,
        discount: Money,
        expected_version: Option<u64>,
    ) -> ServiceResult<InvoiceView> {
        self.mutate(id, expected_version, |invoice, now| {
            invoice.apply_discount(discount, now)
        })
        .await
    }

    /// `Draft -> Sent`.
    #[instrument(skip(self), err)]
    pub async fn send_invoice(&self, id: InvoiceId) -> ServiceResult<InvoiceView> {
        let view = self.mutate(id, None, |invoice, now| invoice.send(now)).await?;
        info!(invoice_id = %id, number = %view.invoice.number(), "invoice sent");
        Ok(view)
    }

    /// Record a payment, or return the payment previously recorded under the same
    /// idempotency key.
    #[instrument(
        skip(self, request),
        fields(
            invoice_id = %request.invoice_id,
            amount = %request.amount,
            idempotency_key = %request.idempotency_key
        ),
        err
    )]
    pub async fn record_payment(&self, request: RecordPayment) -> ServiceResult<RecordedPayment> {
        let mut attempt: u32 = 0;
        loop {
            match self.try_record_payment(&request).await {
                Err(err) if err.is_conflict() && attempt < self.config.payment_max_retries => {
                    attempt += 1;
                    warn!(attempt, error = %err, "payment lost an optimistic race; retrying");
                }
                outcome => return outcome,
            }
        }
    }

    async fn try_record_payment(&self, request: &RecordPayment) -> ServiceResult<RecordedPayment> {
        let ledger = self
            .store
            .load_ledger(request.invoice_id)
            .await?
            .ok_or_else(|| invoice_not_found(request.invoice_id))?;
        let mut invoice = ledger.invoice;
        let payments = ledger.payments;
        let expected = ExpectedVersion::Exact(invoice.version());

        let outcome = invoice.accept_payment(request, &payments, PaymentId::new(), Utc::now())?;
        match outcome {
            PaymentOutcome::Replayed(payment) => {
                debug!(payment_id = %payment.id, "idempotent replay; returning existing payment");
                Ok(RecordedPayment {
                    payment,
                    replayed: true,
                    invoice_status: invoice.status(),
                    balance: balance::balance(invoice.total(), &payments)?,
                })
            }
            PaymentOutcome::Accepted { payment, settles } => {
                self.store
                    .commit_payment(&invoice, &payment, expected)
                    .await?;

                let remaining = balance::balance(invoice.total(), &payments)?
                    .checked_sub(payment.amount)?;
                info!(
                    payment_id = %payment.id,
                    amount = %payment.amount,
                    balance = %remaining,
                    "payment recorded"
                );
                if settles {
                    info!(number = %invoice.number(), "invoice paid");
                }

                Ok(RecordedPayment {
                    payment,
                    replayed: false,
                    invoice_status: invoice.status(),
                    balance: remaining,
                })
            }
        }
    }

    /// Payment history of one invoice, oldest first.
    #[instrument(skip(self), err)]
    pub async fn list_payments(&self, invoice_id: InvoiceId) -> ServiceResult<Vec<Payment>> {
        let ledger = self
            .store
            .load_ledger(invoice_id)
            .await?
            .ok_or_else(|| invoice_not_found(invoice_id))?;
        Ok(ledger.payments)
    }

    /// Invoice summaries ordered by invoice number.
    #[instrument(skip(self), err)]
    pub async fn list_invoices(
        &self,
        filter: InvoiceFilter,
    ) -> ServiceResult<Vec<InvoiceSummary>> {
        let today = Utc::now().date_naive();
        let listings = self.store.list_invoices(filter).await?;
        listings
            .iter()
            .map(|l| {
                InvoiceSummary::from_paid(&l.invoice, l.amount_paid, today)
                    .map_err(ServiceError::from)
            })
            .collect()
    }

    /// Outstanding position of a customer across their sent invoices.
    #[instrument(skip(self), err)]
    pub async fn customer_balance(
        &self,
        customer_id: CustomerId,
    ) -> ServiceResult<CustomerBalance> {
        if !self.customers.customer_exists(customer_id).await? {
            return Err(DomainError::not_found(format!("customer {customer_id}")).into());
        }
        let summaries = self
            .list_invoices(InvoiceFilter {
                status: Some(InvoiceStatus::Sent),
                customer_id: Some(customer_id),
            })
            .await?;
        Ok(CustomerBalance::from_summaries(customer_id, &summaries)?)
    }

    /// Load, check the caller's expectation, mutate, save at the loaded version.
    async fn mutate<F>(
        &self,
        id: InvoiceId,
        expected_version: Option<u64>,
        change: F,
    ) -> ServiceResult<InvoiceView>
    where
        F: FnOnce(&mut Invoice, DateTime<Utc>) -> Result<(), DomainError>,
    {
        let ledger = self
            .store
            .load_ledger(id)
            .await?
            .ok_or_else(|| invoice_not_found(id))?;
        let mut invoice = ledger.invoice;
        let loaded = invoice.version();

        ExpectedVersion::from(expected_version).check(loaded)?;
        change(&mut invoice, Utc::now())?;

        self.store
            .save_invoice(&invoice, ExpectedVersion::Exact(loaded))
            .await?;
        InvoiceView::from_payments(invoice, &ledger.payments)
    }
}

fn invoice_not_found(id: InvoiceId) -> ServiceError {
    DomainError::not_found(format!("invoice {id}")).into()
}
