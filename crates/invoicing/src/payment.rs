//! Payments and the ledger rules for appending them to an invoice.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use forgebill_core::{
    DomainError, DomainResult, Entity, IdempotencyKey, InvoiceId, Money, PaymentId,
};

use crate::balance;
use crate::invoice::{Invoice, InvoiceStatus};

/// How a payment was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    CreditCard,
    Check,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "CASH",
            PaymentMethod::BankTransfer => "BANK_TRANSFER",
            PaymentMethod::CreditCard => "CREDIT_CARD",
            PaymentMethod::Check => "CHECK",
            PaymentMethod::Other => "OTHER",
        }
    }
}

impl core::str::FromStr for PaymentMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CASH" => Ok(PaymentMethod::Cash),
            "BANK_TRANSFER" => Ok(PaymentMethod::BankTransfer),
            "CREDIT_CARD" => Ok(PaymentMethod::CreditCard),
            "CHECK" => Ok(PaymentMethod::Check),
            "OTHER" => Ok(PaymentMethod::Other),
            other => Err(DomainError::validation(format!("unknown payment method: {other}"))),
        }
    }
}

/// An immutable payment against one invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub invoice_id: InvoiceId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub payment_date: NaiveDate,
    pub notes: Option<String>,
    pub idempotency_key: IdempotencyKey,
    pub created_at: DateTime<Utc>,
}

impl Entity for Payment {
    type Id = PaymentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Request to record a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPayment {
    pub invoice_id: InvoiceId,
    pub amount: Money,
    pub method: PaymentMethod,
    /// Defaults to the recording day.
    pub payment_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub idempotency_key: IdempotencyKey,
}

/// Result of evaluating a payment request against an invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// The key was already used on this invoice; nothing changes.
    Replayed(Payment),
    /// A new payment must be persisted together with the mutated invoice.
    Accepted {
        payment: Payment,
        /// The payment brings the balance to exactly zero (`Sent -> Paid`).
        settles: bool,
    },
}

impl PaymentOutcome {
    pub fn payment(&self) -> &Payment {
        match self {
            PaymentOutcome::Replayed(p) => p,
            PaymentOutcome::Accepted { payment, .. } => payment,
        }
    }

    pub fn into_payment(self) -> Payment {
        match self {
            PaymentOutcome::Replayed(p) => p,
            PaymentOutcome::Accepted { payment, .. } => payment,
        }
    }
}

impl Invoice {
    /// Decide whether `request` may be appended to this invoice's payment ledger.
    ///
    /// `existing` must be every payment already persisted for this invoice, read in the
    /// same transaction (or at the same version) as `self`. On acceptance the invoice is
    /// mutated in place (version bump, and `Paid` when the balance reaches zero); the
    /// caller must persist both atomically.
    pub fn accept_payment(
        &mut self,
        request: &RecordPayment,
        existing: &[Payment],
        payment_id: PaymentId,
        now: DateTime<Utc>,
    ) -> DomainResult<PaymentOutcome> {
        if request.invoice_id != self.invoice_id() {
            return Err(DomainError::validation("payment invoice_id mismatch"));
        }

        if let Some(prior) = existing
            .iter()
            .find(|p| p.idempotency_key == request.idempotency_key)
        {
            return Ok(PaymentOutcome::Replayed(prior.clone()));
        }

        match self.status() {
            InvoiceStatus::Draft => {
                return Err(DomainError::invalid_state(format!(
                    "invoice {} is a draft and cannot accept payments",
                    self.number()
                )));
            }
            InvoiceStatus::Paid => {
                return Err(DomainError::invalid_state(format!(
                    "invoice {} is already paid",
                    self.number()
                )));
            }
            InvoiceStatus::Sent => {}
        }

        if !request.amount.is_positive() {
            return Err(DomainError::validation(format!(
                "payment amount must be positive (got {})",
                request.amount
            )));
        }

        let outstanding = balance::balance(self.total(), existing)?;
        if request.amount > outstanding {
            return Err(DomainError::overpayment(format!(
                "payment of {} exceeds outstanding balance {outstanding} on invoice {}",
                request.amount,
                self.number()
            )));
        }
        let remaining = outstanding.checked_sub(request.amount)?;
        let settles = remaining.is_zero();

        let payment = Payment {
            id: payment_id,
            invoice_id: request.invoice_id,
            amount: request.amount,
            method: request.method,
            payment_date: request.payment_date.unwrap_or_else(|| now.date_naive()),
            notes: request
                .notes
                .as_ref()
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
            idempotency_key: request.idempotency_key,
            created_at: now,
        };

        self.register_payment(settles, now);
        Ok(PaymentOutcome::Accepted { payment, settles })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line_item::LineItemInput;
    use crate::invoice::NewInvoice;
    use crate::number::InvoiceNumber;
    use forgebill_core::{AggregateRoot, CustomerId};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn sent_invoice(total: Money) -> Invoice {
        let mut invoice = Invoice::create(
            InvoiceId::new(),
            InvoiceNumber::new(2025, 1).unwrap(),
            NewInvoice {
                customer_id: CustomerId::new(),
                line_items: vec![LineItemInput {
                    description: "Service".to_string(),
                    quantity: dec!(1),
                    unit_price: total,
                }],
                discount: Money::ZERO,
                due_date: None,
                notes: None,
            },
            test_time(),
        )
        .unwrap();
        invoice.send(test_time()).unwrap();
        invoice
    }

    fn request(invoice: &Invoice, amount: Money) -> RecordPayment {
        RecordPayment {
            invoice_id: invoice.invoice_id(),
            amount,
            method: PaymentMethod::BankTransfer,
            payment_date: None,
            notes: None,
            idempotency_key: IdempotencyKey::new(),
        }
    }

    /// Evaluate and, if accepted, append to the in-test ledger.
    fn pay(
        invoice: &mut Invoice,
        ledger: &mut Vec<Payment>,
        req: &RecordPayment,
    ) -> DomainResult<PaymentOutcome> {
        let outcome = invoice.accept_payment(req, ledger, PaymentId::new(), test_time())?;
        if let PaymentOutcome::Accepted { payment, .. } = &outcome {
            ledger.push(payment.clone());
        }
        Ok(outcome)
    }

    fn pay_amount(
        invoice: &mut Invoice,
        ledger: &mut Vec<Payment>,
        amount: Money,
    ) -> DomainResult<PaymentOutcome> {
        let req = request(invoice, amount);
        pay(invoice, ledger, &req)
    }

    #[test]
    fn partial_then_final_payment_marks_invoice_paid() {
        let mut invoice = sent_invoice(Money::new(dec!(1000)));
        let mut ledger = Vec::new();

        let first = pay_amount(&mut invoice, &mut ledger, Money::new(dec!(400))).unwrap();
        assert!(matches!(first, PaymentOutcome::Accepted { settles: false, .. }));
        assert_eq!(invoice.status(), InvoiceStatus::Sent);
        assert_eq!(balance::balance(invoice.total(), &ledger).unwrap(), Money::new(dec!(600)));

        let second = pay_amount(&mut invoice, &mut ledger, Money::new(dec!(600))).unwrap();
        assert!(matches!(second, PaymentOutcome::Accepted { settles: true, .. }));
        assert_eq!(invoice.status(), InvoiceStatus::Paid);
        assert!(balance::balance(invoice.total(), &ledger).unwrap().is_zero());
    }

    #[test]
    fn every_accepted_payment_bumps_the_version() {
        let mut invoice = sent_invoice(Money::new(dec!(100)));
        let before = invoice.version();
        let mut ledger = Vec::new();
        pay_amount(&mut invoice, &mut ledger, Money::new(dec!(10))).unwrap();
        assert_eq!(invoice.version(), before + 1);
    }

    #[test]
    fn overpayment_is_rejected_without_side_effects() {
        let mut invoice = sent_invoice(Money::new(dec!(1000)));
        let snapshot = invoice.clone();
        let mut ledger = Vec::new();

        let err = pay_amount(&mut invoice, &mut ledger, Money::new(dec!(1500))).unwrap_err();
        assert!(matches!(err, DomainError::Overpayment(_)));
        assert!(ledger.is_empty());
        assert_eq!(invoice, snapshot);
    }

    #[test]
    fn draft_invoices_reject_payments() {
        let mut invoice = sent_invoice(Money::new(dec!(10)));
        let mut draft = Invoice::rehydrate({
            let mut s = invoice.snapshot();
            s.status = InvoiceStatus::Draft;
            s.issued_date = None;
            s
        })
        .unwrap();
        let req = request(&draft, Money::new(dec!(5)));
        let err = draft.accept_payment(&req, &[], PaymentId::new(), test_time()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));

        // Sanity: the sent twin accepts the same request.
        let req = request(&invoice, Money::new(dec!(5)));
        assert!(invoice.accept_payment(&req, &[], PaymentId::new(), test_time()).is_ok());
    }

    #[test]
    fn fresh_payment_on_paid_invoice_is_invalid_state() {
        let mut invoice = sent_invoice(Money::new(dec!(50)));
        let mut ledger = Vec::new();
        pay_amount(&mut invoice, &mut ledger, Money::new(dec!(50))).unwrap();
        assert_eq!(invoice.status(), InvoiceStatus::Paid);

        let err = pay_amount(&mut invoice, &mut ledger, Money::new(dec!(0.01))).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn duplicate_key_replays_original_payment_even_after_paid() {
        let mut invoice = sent_invoice(Money::new(dec!(50)));
        let mut ledger = Vec::new();
        let req = request(&invoice, Money::new(dec!(50)));
        let original = pay(&mut invoice, &mut ledger, &req).unwrap().into_payment();
        let version = invoice.version();

        let replay = pay(&mut invoice, &mut ledger, &req).unwrap();
        assert_eq!(replay, PaymentOutcome::Replayed(original));
        assert_eq!(ledger.len(), 1);
        assert_eq!(invoice.version(), version);
        assert_eq!(invoice.status(), InvoiceStatus::Paid);
    }

    #[test]
    fn non_positive_amounts_are_validation_errors() {
        let mut invoice = sent_invoice(Money::new(dec!(50)));
        for amount in [Money::ZERO, Money::new(dec!(-1))] {
            let err = invoice
                .accept_payment(&request(&invoice, amount), &[], PaymentId::new(), test_time())
                .unwrap_err();
            assert!(matches!(err, DomainError::Validation(_)));
        }
    }

    #[test]
    fn payment_date_defaults_to_recording_day() {
        let mut invoice = sent_invoice(Money::new(dec!(50)));
        let now = test_time();
        let outcome = invoice
            .accept_payment(&request(&invoice, Money::new(dec!(1))), &[], PaymentId::new(), now)
            .unwrap();
        assert_eq!(outcome.payment().payment_date, now.date_naive());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: whatever sequence of payment attempts arrives, the persisted sum
        /// never exceeds the total, and the invoice is PAID exactly when they are equal.
        #[test]
        fn ledger_never_overpays(
            total_cents in 1i64..1_000_000i64,
            attempts in prop::collection::vec(1i64..500_000i64, 1..30),
        ) {
            let mut invoice = sent_invoice(Money::from_cents(total_cents));
            let mut ledger = Vec::new();

            for cents in attempts {
                let req = request(&invoice, Money::from_cents(cents));
                let _ = pay(&mut invoice, &mut ledger, &req);

                let paid = Money::try_sum(ledger.iter().map(|p| p.amount)).unwrap();
                prop_assert!(paid <= invoice.total());
                prop_assert_eq!(invoice.status() == InvoiceStatus::Paid, paid == invoice.total());
            }
        }
    }
}
