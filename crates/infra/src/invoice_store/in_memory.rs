use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use forgebill_core::{AggregateRoot, ExpectedVersion, InvoiceId};
use forgebill_invoicing::{Invoice, InvoiceNumber, Payment, balance};

use super::r#trait::{
    InvoiceBuilder, InvoiceFilter, InvoiceLedger, InvoiceListing, InvoiceStore, StoreError,
};

#[derive(Debug, Default)]
struct State {
    invoices: HashMap<InvoiceId, Invoice>,
    payments: HashMap<InvoiceId, Vec<Payment>>,
    numbers: HashSet<InvoiceNumber>,
    counters: HashMap<i32, u32>,
}

/// In-memory invoice store.
///
/// Intended for tests/dev. Every operation runs under one lock, which gives the same
/// atomicity the Postgres store gets from transactions. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryInvoiceStore {
    state: RwLock<State>,
}

impl State {
    fn insert_built(
        &mut self,
        year: i32,
        sequence: u32,
        build: InvoiceBuilder,
    ) -> Result<Invoice, StoreError> {
        let number =
            InvoiceNumber::new(year, sequence).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let invoice = build(number).map_err(StoreError::Rejected)?;

        let id = invoice.invoice_id();
        if invoice.number() != number {
            return Err(StoreError::Corrupt(format!(
                "invoice {id} built with {} instead of {number}",
                invoice.number()
            )));
        }
        if self.invoices.contains_key(&id) {
            return Err(StoreError::Conflict(format!("invoice {id} already exists")));
        }
        if self.numbers.contains(&number) {
            return Err(StoreError::DuplicateNumber(number.to_string()));
        }
        self.numbers.insert(number);
        self.invoices.insert(id, invoice.clone());
        Ok(invoice)
    }
}

impl InMemoryInvoiceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> StoreError {
    StoreError::Database("lock poisoned".to_string())
}

fn check_version(stored: &Invoice, expected: ExpectedVersion) -> Result<(), StoreError> {
    let current = stored.version();
    if !expected.matches(current) {
        return Err(StoreError::Conflict(format!(
            "invoice {} expected {expected:?}, found {current}",
            stored.number()
        )));
    }
    Ok(())
}

#[async_trait]
impl InvoiceStore for InMemoryInvoiceStore {
    async fn create_invoice(
        &self,
        year: i32,
        build: InvoiceBuilder,
    ) -> Result<Invoice, StoreError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        let previous = state.counters.get(&year).copied().unwrap_or(0);
        let sequence = previous + 1;
        state.counters.insert(year, sequence);

        match state.insert_built(year, sequence, build) {
            Ok(invoice) => Ok(invoice),
            Err(err) => {
                // Nobody else could allocate while we hold the lock.
                state.counters.insert(year, previous);
                Err(err)
            }
        }
    }

    async fn load_ledger(&self, id: InvoiceId) -> Result<Option<InvoiceLedger>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.invoices.get(&id).map(|invoice| InvoiceLedger {
            invoice: invoice.clone(),
            payments: state.payments.get(&id).cloned().unwrap_or_default(),
        }))
    }

    async fn save_invoice(
        &self,
        invoice: &Invoice,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        let id = invoice.invoice_id();
        let stored = state
            .invoices
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("invoice {id}")))?;
        check_version(stored, expected)?;
        *stored = invoice.clone();
        Ok(())
    }

    async fn commit_payment(
        &self,
        invoice: &Invoice,
        payment: &Payment,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        let id = invoice.invoice_id();
        if payment.invoice_id != id {
            return Err(StoreError::Corrupt(format!(
                "payment {} targets invoice {}, not {id}",
                payment.id, payment.invoice_id
            )));
        }

        let stored = state
            .invoices
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("invoice {id}")))?;
        check_version(stored, expected)?;

        let ledger = state.payments.entry(id).or_default();
        if ledger
            .iter()
            .any(|p| p.idempotency_key == payment.idempotency_key)
        {
            return Err(StoreError::Conflict(format!(
                "idempotency key {} already used on invoice {id}",
                payment.idempotency_key
            )));
        }
        ledger.push(payment.clone());
        state.invoices.insert(id, invoice.clone());
        Ok(())
    }

    async fn list_invoices(
        &self,
        filter: InvoiceFilter,
    ) -> Result<Vec<InvoiceListing>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        let mut listings = state
            .invoices
            .values()
            .filter(|inv| filter.matches(inv))
            .map(|inv| {
                let payments = state
                    .payments
                    .get(&inv.invoice_id())
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let amount_paid = balance::amount_paid(payments)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?;
                Ok(InvoiceListing {
                    invoice: inv.clone(),
                    amount_paid,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        listings.sort_by_key(|l| l.invoice.number());
        Ok(listings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use forgebill_core::{CustomerId, DomainError, DomainResult, IdempotencyKey, Money, PaymentId};
    use forgebill_invoicing::{
        LineItemInput, NewInvoice, PaymentMethod, PaymentOutcome, RecordPayment,
    };
    use rust_decimal_macros::dec;

    fn draft(id: InvoiceId, number: InvoiceNumber) -> DomainResult<Invoice> {
        Invoice::create(
            id,
            number,
            NewInvoice {
                customer_id: CustomerId::new(),
                line_items: vec![LineItemInput {
                    description: "Audit".to_string(),
                    quantity: dec!(1),
                    unit_price: Money::new(dec!(100)),
                }],
                discount: Money::ZERO,
                due_date: None,
                notes: None,
            },
            Utc::now(),
        )
    }

    fn builder() -> InvoiceBuilder {
        Box::new(|number| draft(InvoiceId::new(), number))
    }

    async fn stored_invoice(store: &InMemoryInvoiceStore) -> Invoice {
        store.create_invoice(2025, builder()).await.unwrap()
    }

    async fn payments_of(store: &InMemoryInvoiceStore, id: InvoiceId) -> Vec<Payment> {
        store.load_ledger(id).await.unwrap().unwrap().payments
    }

    #[tokio::test]
    async fn counters_are_per_year_and_start_at_one() {
        let store = InMemoryInvoiceStore::new();
        let a = store.create_invoice(2024, builder()).await.unwrap();
        let b = store.create_invoice(2024, builder()).await.unwrap();
        let c = store.create_invoice(2025, builder()).await.unwrap();
        assert_eq!(a.number().to_string(), "INV-2024-0001");
        assert_eq!(b.number().to_string(), "INV-2024-0002");
        assert_eq!(c.number().to_string(), "INV-2025-0001");
    }

    #[tokio::test]
    async fn rejected_build_rolls_back_the_counter() {
        let store = InMemoryInvoiceStore::new();
        let err = store
            .create_invoice(2025, Box::new(|_| Err(DomainError::validation("bad draft"))))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(DomainError::Validation(_))));

        let next = stored_invoice(&store).await;
        assert_eq!(next.number().sequence(), 1);
    }

    #[tokio::test]
    async fn failed_insert_rolls_back_the_counter() {
        let store = InMemoryInvoiceStore::new();
        let first = stored_invoice(&store).await;

        // Reusing an existing id makes the insert fail after the number was taken.
        let taken = first.invoice_id();
        let err = store
            .create_invoice(2025, Box::new(move |number| draft(taken, number)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let next = stored_invoice(&store).await;
        assert_eq!(next.number().sequence(), 2);
    }

    #[tokio::test]
    async fn stale_save_is_a_conflict() {
        let store = InMemoryInvoiceStore::new();
        let invoice = stored_invoice(&store).await;

        let mut first = invoice.clone();
        first.apply_discount(Money::new(dec!(10)), Utc::now()).unwrap();
        store
            .save_invoice(&first, ExpectedVersion::Exact(invoice.version()))
            .await
            .unwrap();

        let mut second = invoice.clone();
        second.apply_discount(Money::new(dec!(20)), Utc::now()).unwrap();
        let err = store
            .save_invoice(&second, ExpectedVersion::Exact(invoice.version()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let loaded = store.load_ledger(invoice.invoice_id()).await.unwrap().unwrap();
        assert_eq!(loaded.invoice.total(), Money::new(dec!(90)));
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_is_rejected_at_commit() {
        let store = InMemoryInvoiceStore::new();
        let mut invoice = stored_invoice(&store).await;
        let v = invoice.version();
        invoice.send(Utc::now()).unwrap();
        store.save_invoice(&invoice, ExpectedVersion::Exact(v)).await.unwrap();

        let req = RecordPayment {
            invoice_id: invoice.invoice_id(),
            amount: Money::new(dec!(10)),
            method: PaymentMethod::Cash,
            payment_date: None,
            notes: None,
            idempotency_key: IdempotencyKey::new(),
        };

        let mut a = invoice.clone();
        let PaymentOutcome::Accepted { payment: pa, .. } =
            a.accept_payment(&req, &[], PaymentId::new(), Utc::now()).unwrap()
        else {
            panic!("expected acceptance");
        };
        store
            .commit_payment(&a, &pa, ExpectedVersion::Exact(invoice.version()))
            .await
            .unwrap();

        let mut b = a.clone();
        let PaymentOutcome::Accepted { payment: pb, .. } =
            b.accept_payment(&req, &[], PaymentId::new(), Utc::now()).unwrap()
        else {
            panic!("expected acceptance");
        };
        let err = store
            .commit_payment(&b, &pb, ExpectedVersion::Exact(a.version()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(payments_of(&store, invoice.invoice_id()).await.len(), 1);
    }
}
