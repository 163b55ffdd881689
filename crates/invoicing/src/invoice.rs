use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use forgebill_core::{AggregateRoot, CustomerId, DomainError, DomainResult, InvoiceId, Money};

use crate::line_item::{LineItem, LineItemInput, LineItemLedger};
use crate::number::InvoiceNumber;

/// Invoice status lifecycle: `Draft -> Sent -> Paid`. No transition goes backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "DRAFT",
            InvoiceStatus::Sent => "SENT",
            InvoiceStatus::Paid => "PAID",
        }
    }
}

impl core::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for InvoiceStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DRAFT" => Ok(InvoiceStatus::Draft),
            "SENT" => Ok(InvoiceStatus::Sent),
            "PAID" => Ok(InvoiceStatus::Paid),
            other => Err(DomainError::validation(format!(
                "status must be one of DRAFT, SENT, PAID (got {other})"
            ))),
        }
    }
}

/// Input for creating a draft invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInvoice {
    pub customer_id: CustomerId,
    pub line_items: Vec<LineItemInput>,
    pub discount: Money,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl NewInvoice {
    /// Check line items and discount without building the aggregate.
    ///
    /// Lets callers reject bad input before consuming an invoice number.
    pub fn validate(&self) -> DomainResult<()> {
        LineItemLedger::from_inputs(&self.line_items)?.total_after(self.discount)?;
        Ok(())
    }
}

/// Partial update of a draft. `None` leaves the field untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InvoiceUpdate {
    pub line_items: Option<Vec<LineItemInput>>,
    pub discount: Option<Money>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl InvoiceUpdate {
    pub fn is_empty(&self) -> bool {
        self.line_items.is_none()
            && self.discount.is_none()
            && self.due_date.is_none()
            && self.notes.is_none()
    }
}

/// Persisted form of an invoice, used by stores to rehydrate the aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceSnapshot {
    pub id: InvoiceId,
    pub customer_id: CustomerId,
    pub number: InvoiceNumber,
    pub status: InvoiceStatus,
    pub line_items: Vec<LineItem>,
    pub discount: Money,
    pub total: Money,
    pub due_date: Option<NaiveDate>,
    pub issued_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate root: Invoice.
///
/// Owns its line items, discount and total. `total` is always
/// `subtotal(line items) - discount`; the outstanding balance is never stored here
/// (see [`crate::balance`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    id: InvoiceId,
    customer_id: CustomerId,
    number: InvoiceNumber,
    status: InvoiceStatus,
    ledger: LineItemLedger,
    discount: Money,
    total: Money,
    due_date: Option<NaiveDate>,
    issued_date: Option<DateTime<Utc>>,
    notes: Option<String>,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Build a new draft. The number must already be allocated for this invoice.
    pub fn create(
        id: InvoiceId,
        number: InvoiceNumber,
        input: NewInvoice,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let ledger = LineItemLedger::from_inputs(&input.line_items)?;
        let total = ledger.total_after(input.discount)?;

        Ok(Self {
            id,
            customer_id: input.customer_id,
            number,
            status: InvoiceStatus::Draft,
            ledger,
            discount: input.discount,
            total,
            due_date: input.due_date,
            issued_date: None,
            notes: normalize_notes(input.notes),
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }

    /// Rehydrate from persisted state, re-checking the total invariant.
    pub fn rehydrate(snapshot: InvoiceSnapshot) -> DomainResult<Self> {
        let ledger = LineItemLedger::from_items(snapshot.line_items)?;
        let total = ledger.total_after(snapshot.discount)?;
        if total != snapshot.total {
            return Err(DomainError::validation(format!(
                "stored total {} of invoice {} does not match recomputed total {total}",
                snapshot.total, snapshot.number
            )));
        }

        Ok(Self {
            id: snapshot.id,
            customer_id: snapshot.customer_id,
            number: snapshot.number,
            status: snapshot.status,
            ledger,
            discount: snapshot.discount,
            total,
            due_date: snapshot.due_date,
            issued_date: snapshot.issued_date,
            notes: snapshot.notes,
            version: snapshot.version,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
        })
    }

    pub fn snapshot(&self) -> InvoiceSnapshot {
        InvoiceSnapshot {
            id: self.id,
            customer_id: self.customer_id,
            number: self.number,
            status: self.status,
            line_items: self.ledger.items().to_vec(),
            discount: self.discount,
            total: self.total,
            due_date: self.due_date,
            issued_date: self.issued_date,
            notes: self.notes.clone(),
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn invoice_id(&self) -> InvoiceId {
        self.id
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    pub fn number(&self) -> InvoiceNumber {
        self.number
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn line_items(&self) -> &[LineItem] {
        self.ledger.items()
    }

    pub fn subtotal(&self) -> Money {
        self.ledger.subtotal()
    }

    pub fn discount(&self) -> Money {
        self.discount
    }

    pub fn total(&self) -> Money {
        self.total
    }

    pub fn due_date(&self) -> Option<NaiveDate> {
        self.due_date
    }

    pub fn issued_date(&self) -> Option<DateTime<Utc>> {
        self.issued_date
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Replace all line items and recompute the total. Draft only.
    pub fn replace_line_items(
        &mut self,
        items: &[LineItemInput],
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_draft("replace line items")?;
        let ledger = LineItemLedger::replacement(items)?;
        let total = ledger.total_after(self.discount)?;
        self.ledger = ledger;
        self.total = total;
        self.touch(now);
        Ok(())
    }

    /// Set the discount and recompute the total. Draft only.
    pub fn apply_discount(&mut self, discount: Money, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_draft("change the discount")?;
        self.total = self.ledger.total_after(discount)?;
        self.discount = discount;
        self.touch(now);
        Ok(())
    }

    /// Apply a partial update as a single mutation (one version bump). Draft only.
    ///
    /// Either every field is applied or none is.
    pub fn update(&mut self, update: InvoiceUpdate, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_draft("update")?;
        if update.is_empty() {
            return Err(DomainError::validation("update contains no changes"));
        }

        let ledger = match &update.line_items {
            Some(items) => LineItemLedger::replacement(items)?,
            None => self.ledger.clone(),
        };
        let discount = update.discount.unwrap_or(self.discount);
        let total = ledger.total_after(discount)?;

        self.ledger = ledger;
        self.discount = discount;
        self.total = total;
        if let Some(due) = update.due_date {
            self.due_date = Some(due);
        }
        if update.notes.is_some() {
            self.notes = normalize_notes(update.notes);
        }
        self.touch(now);
        Ok(())
    }

    /// `Draft -> Sent`. Requires at least one line item; stamps the issued date.
    pub fn send(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_draft("send")?;
        if self.ledger.is_empty() {
            return Err(DomainError::invalid_state(format!(
                "invoice {} has no line items and cannot be sent",
                self.number
            )));
        }
        self.status = InvoiceStatus::Sent;
        self.issued_date = Some(now);
        self.touch(now);
        Ok(())
    }

    /// Record that a payment was appended. Settling payments flip `Sent -> Paid`.
    pub(crate) fn register_payment(&mut self, settles: bool, now: DateTime<Utc>) {
        if settles {
            self.status = InvoiceStatus::Paid;
        }
        self.touch(now);
    }

    fn ensure_draft(&self, action: &str) -> DomainResult<()> {
        if self.status != InvoiceStatus::Draft {
            return Err(DomainError::invalid_state(format!(
                "cannot {action} invoice {} in status {}",
                self.number, self.status
            )));
        }
        Ok(())
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.version += 1;
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

fn normalize_notes(notes: Option<String>) -> Option<String> {
    notes
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn line(qty: Decimal, price: Decimal) -> LineItemInput {
        LineItemInput {
            description: "Widget".to_string(),
            quantity: qty,
            unit_price: Money::new(price),
        }
    }

    fn draft_with(lines: Vec<LineItemInput>, discount: Money) -> Invoice {
        Invoice::create(
            InvoiceId::new(),
            InvoiceNumber::new(2025, 1).unwrap(),
            NewInvoice {
                customer_id: CustomerId::new(),
                line_items: lines,
                discount,
                due_date: None,
                notes: Some("  net 30 ".to_string()),
            },
            test_time(),
        )
        .unwrap()
    }

    #[test]
    fn create_computes_total_and_starts_in_draft() {
        let invoice = draft_with(vec![line(dec!(2), dec!(500))], Money::ZERO);
        assert_eq!(invoice.status(), InvoiceStatus::Draft);
        assert_eq!(invoice.total(), Money::new(dec!(1000)));
        assert_eq!(invoice.version(), 1);
        assert_eq!(invoice.notes(), Some("net 30"));
        assert!(invoice.issued_date().is_none());
    }

    #[test]
    fn create_rejects_discount_above_subtotal() {
        let err = Invoice::create(
            InvoiceId::new(),
            InvoiceNumber::new(2025, 1).unwrap(),
            NewInvoice {
                customer_id: CustomerId::new(),
                line_items: vec![line(dec!(1), dec!(10))],
                discount: Money::new(dec!(11)),
                due_date: None,
                notes: None,
            },
            test_time(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn send_transitions_draft_to_sent_once() {
        let mut invoice = draft_with(vec![line(dec!(1), dec!(10))], Money::ZERO);
        invoice.send(test_time()).unwrap();
        assert_eq!(invoice.status(), InvoiceStatus::Sent);
        assert!(invoice.issued_date().is_some());
        assert_eq!(invoice.version(), 2);

        let err = invoice.send(test_time()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
        assert_eq!(invoice.version(), 2);
    }

    #[test]
    fn send_requires_line_items() {
        let mut invoice = draft_with(vec![], Money::ZERO);
        let err = invoice.send(test_time()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
        assert_eq!(invoice.status(), InvoiceStatus::Draft);
    }

    #[test]
    fn line_items_are_frozen_after_send() {
        let mut invoice = draft_with(vec![line(dec!(1), dec!(10))], Money::ZERO);
        invoice.send(test_time()).unwrap();

        let err = invoice
            .replace_line_items(&[line(dec!(5), dec!(10))], test_time())
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));

        let err = invoice.apply_discount(Money::from_cents(100), test_time()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
        assert_eq!(invoice.total(), Money::new(dec!(10)));
    }

    #[test]
    fn replace_line_items_recomputes_total_with_existing_discount() {
        let mut invoice = draft_with(vec![line(dec!(1), dec!(100))], Money::new(dec!(10)));
        assert_eq!(invoice.total(), Money::new(dec!(90)));

        invoice
            .replace_line_items(&[line(dec!(3), dec!(100)), line(dec!(1), dec!(0.5))], test_time())
            .unwrap();
        assert_eq!(invoice.subtotal(), Money::new(dec!(300.5)));
        assert_eq!(invoice.total(), Money::new(dec!(290.5)));
        assert_eq!(invoice.line_items().len(), 2);
        assert_eq!(invoice.version(), 2);
    }

    #[test]
    fn failed_update_leaves_invoice_untouched() {
        let mut invoice = draft_with(vec![line(dec!(1), dec!(100))], Money::ZERO);
        let before = invoice.clone();

        let err = invoice
            .update(
                InvoiceUpdate {
                    line_items: Some(vec![line(dec!(1), dec!(5))]),
                    discount: Some(Money::new(dec!(50))),
                    due_date: NaiveDate::from_ymd_opt(2030, 1, 1),
                    notes: None,
                },
                test_time(),
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(invoice, before);
    }

    #[test]
    fn update_bumps_version_once() {
        let mut invoice = draft_with(vec![line(dec!(1), dec!(100))], Money::ZERO);
        invoice
            .update(
                InvoiceUpdate {
                    line_items: Some(vec![line(dec!(2), dec!(100))]),
                    discount: Some(Money::new(dec!(50))),
                    due_date: NaiveDate::from_ymd_opt(2030, 1, 1),
                    notes: None,
                },
                test_time(),
            )
            .unwrap();
        assert_eq!(invoice.total(), Money::new(dec!(150)));
        assert_eq!(invoice.due_date(), NaiveDate::from_ymd_opt(2030, 1, 1));
        assert_eq!(invoice.version(), 2);
    }

    #[test]
    fn rehydrate_detects_tampered_totals() {
        let invoice = draft_with(vec![line(dec!(1), dec!(100))], Money::ZERO);
        let mut snapshot = invoice.snapshot();
        assert_eq!(Invoice::rehydrate(snapshot.clone()).unwrap(), invoice);

        snapshot.total = Money::new(dec!(99));
        assert!(Invoice::rehydrate(snapshot).is_err());
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("sent".parse::<InvoiceStatus>().unwrap(), InvoiceStatus::Sent);
        assert!("void".parse::<InvoiceStatus>().is_err());
    }
}
