//! Read model: balances computed on read.
//!
//! The balance is never stored. It is always `total - sum(payments)`, derived from
//! the authoritative invoice total and the payment ledger, so there is only one
//! writer of monetary state.

use chrono::NaiveDate;
use serde::Serialize;

use forgebill_core::{CustomerId, DomainResult, InvoiceId, Money};

use crate::invoice::{Invoice, InvoiceStatus};
use crate::number::InvoiceNumber;
use crate::payment::Payment;

/// `total - sum(payments.amount)`.
pub fn balance(total: Money, payments: &[Payment]) -> DomainResult<Money> {
    let paid = amount_paid(payments)?;
    total.checked_sub(paid)
}

pub fn amount_paid(payments: &[Payment]) -> DomainResult<Money> {
    Money::try_sum(payments.iter().map(|p| p.amount))
}

/// Invoice header plus computed monetary position, for listings and reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceSummary {
    pub invoice_id: InvoiceId,
    pub customer_id: CustomerId,
    pub number: InvoiceNumber,
    pub status: InvoiceStatus,
    pub total: Money,
    pub amount_paid: Money,
    pub balance: Money,
    pub due_date: Option<NaiveDate>,
    pub overdue: bool,
}

impl InvoiceSummary {
    /// Summarize an invoice given its full payment history.
    pub fn build(invoice: &Invoice, payments: &[Payment], today: NaiveDate) -> DomainResult<Self> {
        let paid = amount_paid(payments)?;
        Self::from_paid(invoice, paid, today)
    }

    /// Summarize an invoice given the pre-aggregated sum of its payments.
    pub fn from_paid(
        invoice: &Invoice,
        amount_paid: Money,
        today: NaiveDate,
    ) -> DomainResult<Self> {
        let balance = invoice.total().checked_sub(amount_paid)?;
        Ok(Self {
            invoice_id: invoice.invoice_id(),
            customer_id: invoice.customer_id(),
            number: invoice.number(),
            status: invoice.status(),
            total: invoice.total(),
            amount_paid,
            balance,
            due_date: invoice.due_date(),
            overdue: is_overdue(invoice.status(), invoice.due_date(), today),
        })
    }
}

/// A sent invoice is overdue once its due date has passed.
pub fn is_overdue(status: InvoiceStatus, due_date: Option<NaiveDate>, today: NaiveDate) -> bool {
    status == InvoiceStatus::Sent && due_date.is_some_and(|d| d < today)
}

/// Outstanding position of one customer across their sent invoices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerBalance {
    pub customer_id: CustomerId,
    pub open_invoices: usize,
    pub overdue_invoices: usize,
    pub outstanding: Money,
}

impl CustomerBalance {
    /// Fold summaries into a customer position. Drafts are not receivables and paid
    /// invoices have nothing outstanding, so only `Sent` invoices count.
    pub fn from_summaries<'a, I>(customer_id: CustomerId, summaries: I) -> DomainResult<Self>
    where
        I: IntoIterator<Item = &'a InvoiceSummary>,
    {
        let mut open_invoices = 0;
        let mut overdue_invoices = 0;
        let mut outstanding = Money::ZERO;

        for s in summaries {
            if s.customer_id != customer_id || s.status != InvoiceStatus::Sent {
                continue;
            }
            open_invoices += 1;
            if s.overdue {
                overdue_invoices += 1;
            }
            outstanding = outstanding.checked_add(s.balance)?;
        }

        Ok(Self {
            customer_id,
            open_invoices,
            overdue_invoices,
            outstanding,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::NewInvoice;
    use crate::line_item::LineItemInput;
    use crate::payment::PaymentMethod;
    use chrono::Utc;
    use forgebill_core::{IdempotencyKey, PaymentId};
    use rust_decimal_macros::dec;

    fn invoice(customer_id: CustomerId, seq: u32, total: Money, due: Option<NaiveDate>) -> Invoice {
        Invoice::create(
            InvoiceId::new(),
            InvoiceNumber::new(2025, seq).unwrap(),
            NewInvoice {
                customer_id,
                line_items: vec![LineItemInput {
                    description: "Hosting".to_string(),
                    quantity: dec!(1),
                    unit_price: total,
                }],
                discount: Money::ZERO,
                due_date: due,
                notes: None,
            },
            Utc::now(),
        )
        .unwrap()
    }

    fn payment(invoice_id: InvoiceId, amount: Money) -> Payment {
        Payment {
            id: PaymentId::new(),
            invoice_id,
            amount,
            method: PaymentMethod::Cash,
            payment_date: Utc::now().date_naive(),
            notes: None,
            idempotency_key: IdempotencyKey::new(),
            created_at: Utc::now(),
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn balance_is_total_minus_payments() {
        let id = InvoiceId::new();
        let payments = vec![
            payment(id, Money::new(dec!(100.10))),
            payment(id, Money::new(dec!(0.20))),
        ];
        assert_eq!(
            balance(Money::new(dec!(1000)), &payments).unwrap(),
            Money::new(dec!(899.70))
        );
        assert_eq!(balance(Money::new(dec!(5)), &[]).unwrap(), Money::new(dec!(5)));
    }

    #[test]
    fn summary_flags_overdue_sent_invoices_only() {
        let customer = CustomerId::new();
        let mut inv = invoice(customer, 1, Money::new(dec!(100)), Some(day(2025, 1, 31)));
        let today = day(2025, 2, 1);

        let draft = InvoiceSummary::build(&inv, &[], today).unwrap();
        assert!(!draft.overdue);

        inv.send(Utc::now()).unwrap();
        let sent = InvoiceSummary::build(&inv, &[], today).unwrap();
        assert!(sent.overdue);
        assert!(!InvoiceSummary::build(&inv, &[], day(2025, 1, 31)).unwrap().overdue);
    }

    #[test]
    fn customer_balance_counts_only_sent_invoices_of_that_customer() {
        let customer = CustomerId::new();
        let other = CustomerId::new();
        let today = day(2025, 6, 1);

        let mut a = invoice(customer, 1, Money::new(dec!(300)), Some(day(2025, 5, 1)));
        a.send(Utc::now()).unwrap();
        let mut b = invoice(customer, 2, Money::new(dec!(200)), None);
        b.send(Utc::now()).unwrap();
        let draft = invoice(customer, 3, Money::new(dec!(999)), None);
        let mut foreign = invoice(other, 4, Money::new(dec!(50)), None);
        foreign.send(Utc::now()).unwrap();

        let paid_a = [payment(a.invoice_id(), Money::new(dec!(100)))];
        let summaries = vec![
            InvoiceSummary::build(&a, &paid_a, today).unwrap(),
            InvoiceSummary::build(&b, &[], today).unwrap(),
            InvoiceSummary::build(&draft, &[], today).unwrap(),
            InvoiceSummary::build(&foreign, &[], today).unwrap(),
        ];

        let position = CustomerBalance::from_summaries(customer, &summaries).unwrap();
        assert_eq!(position.open_invoices, 2);
        assert_eq!(position.overdue_invoices, 1);
        assert_eq!(position.outstanding, Money::new(dec!(400)));
    }
}
