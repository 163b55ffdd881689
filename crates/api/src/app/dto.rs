use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};

use forgebill_core::{AggregateRoot, CustomerId, IdempotencyKey, InvoiceId, Money};
use forgebill_infra::{InvoiceFilter, InvoiceView};
use forgebill_invoicing::{
    CustomerBalance, InvoiceStatus, InvoiceSummary, InvoiceUpdate, LineItem, LineItemInput,
    NewInvoice, Payment, PaymentMethod, RecordPayment,
};

// -------------------------
// Request DTOs
// -------------------------

/// Decimals are accepted as JSON numbers or strings; monetary values are rounded to cents.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItemRequest {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvoiceRequest {
    pub customer_id: CustomerId,
    #[serde(default)]
    pub line_items: Vec<LineItemRequest>,
    pub discount: Option<Decimal>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInvoiceRequest {
    pub line_items: Option<Vec<LineItemRequest>>,
    pub discount: Option<Decimal>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    /// Version the client last read; a mismatch is a 409.
    pub version: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPaymentRequest {
    pub invoice_id: InvoiceId,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub idempotency_key: IdempotencyKey,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListInvoicesQuery {
    pub status: Option<String>,
    pub customer_id: Option<String>,
}

// -------------------------
// Request -> domain mapping
// -------------------------

fn line_items(items: Vec<LineItemRequest>) -> Vec<LineItemInput> {
    items
        .into_iter()
        .map(|l| LineItemInput {
            description: l.description,
            quantity: l.quantity,
            unit_price: Money::new(l.unit_price),
        })
        .collect()
}

impl From<CreateInvoiceRequest> for NewInvoice {
    fn from(req: CreateInvoiceRequest) -> Self {
        NewInvoice {
            customer_id: req.customer_id,
            line_items: line_items(req.line_items),
            discount: req.discount.map(Money::new).unwrap_or(Money::ZERO),
            due_date: req.due_date,
            notes: req.notes,
        }
    }
}

impl UpdateInvoiceRequest {
    /// Split into the domain update and the optional expected version.
    pub fn into_parts(self) -> (InvoiceUpdate, Option<u64>) {
        (
            InvoiceUpdate {
                line_items: self.line_items.map(line_items),
                discount: self.discount.map(Money::new),
                due_date: self.due_date,
                notes: self.notes,
            },
            self.version,
        )
    }
}

impl From<RecordPaymentRequest> for RecordPayment {
    fn from(req: RecordPaymentRequest) -> Self {
        RecordPayment {
            invoice_id: req.invoice_id,
            amount: Money::new(req.amount),
            method: req.payment_method,
            payment_date: req.payment_date,
            notes: req.notes,
            idempotency_key: req.idempotency_key,
        }
    }
}

impl ListInvoicesQuery {
    pub fn into_filter(self) -> Result<InvoiceFilter, String> {
        let status = self
            .status
            .as_deref()
            .map(str::parse::<InvoiceStatus>)
            .transpose()
            .map_err(|e| e.to_string())?;
        let customer_id = self
            .customer_id
            .as_deref()
            .map(str::parse::<CustomerId>)
            .transpose()
            .map_err(|e| e.to_string())?;
        Ok(InvoiceFilter {
            status,
            customer_id,
        })
    }
}

// -------------------------
// JSON mapping helpers
// -------------------------

fn line_item_to_json(item: &LineItem) -> Value {
    json!({
        "id": item.id.to_string(),
        "description": item.description,
        "quantity": item.quantity.normalize().to_string(),
        "unitPrice": item.unit_price.to_string(),
        "amount": item.amount.to_string(),
    })
}

pub fn invoice_to_json(view: &InvoiceView) -> Value {
    let invoice = &view.invoice;
    json!({
        "id": invoice.invoice_id().to_string(),
        "customerId": invoice.customer_id().to_string(),
        "invoiceNumber": invoice.number().to_string(),
        "status": invoice.status().as_str(),
        "lineItems": invoice.line_items().iter().map(line_item_to_json).collect::<Vec<_>>(),
        "subtotal": invoice.subtotal().to_string(),
        "discount": invoice.discount().to_string(),
        "total": invoice.total().to_string(),
        "amountPaid": view.amount_paid.to_string(),
        "balance": view.balance.to_string(),
        "dueDate": invoice.due_date(),
        "issuedDate": invoice.issued_date().map(|d| d.to_rfc3339()),
        "notes": invoice.notes(),
        "version": invoice.version(),
        "createdAt": invoice.created_at().to_rfc3339(),
        "updatedAt": invoice.updated_at().to_rfc3339(),
    })
}

pub fn payment_to_json(payment: &Payment) -> Value {
    json!({
        "id": payment.id.to_string(),
        "invoiceId": payment.invoice_id.to_string(),
        "amount": payment.amount.to_string(),
        "paymentMethod": payment.method.as_str(),
        "paymentDate": payment.payment_date,
        "notes": payment.notes,
        "idempotencyKey": payment.idempotency_key.to_string(),
        "createdAt": payment.created_at.to_rfc3339(),
    })
}

pub fn summary_to_json(summary: &InvoiceSummary) -> Value {
    json!({
        "id": summary.invoice_id.to_string(),
        "customerId": summary.customer_id.to_string(),
        "invoiceNumber": summary.number.to_string(),
        "status": summary.status.as_str(),
        "total": summary.total.to_string(),
        "amountPaid": summary.amount_paid.to_string(),
        "balance": summary.balance.to_string(),
        "dueDate": summary.due_date,
        "overdue": summary.overdue,
    })
}

pub fn customer_balance_to_json(position: &CustomerBalance) -> Value {
    json!({
        "customerId": position.customer_id.to_string(),
        "openInvoices": position.open_invoices,
        "overdueInvoices": position.overdue_invoices,
        "outstanding": position.outstanding.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_accepts_numbers_and_strings() {
        let body = json!({
            "customerId": CustomerId::new().to_string(),
            "lineItems": [
                {"description": "Design", "quantity": 2, "unitPrice": 500},
                {"description": "Hosting", "quantity": "1.5", "unitPrice": "10.005"}
            ],
            "discount": "25"
        });
        let req: CreateInvoiceRequest = serde_json::from_value(body).unwrap();
        let input = NewInvoice::from(req);
        assert_eq!(input.line_items.len(), 2);
        assert_eq!(input.line_items[1].unit_price.to_string(), "10.00");
        assert_eq!(input.discount.to_string(), "25.00");
    }

    #[test]
    fn list_query_rejects_unknown_status() {
        let q = ListInvoicesQuery {
            status: Some("ARCHIVED".to_string()),
            customer_id: None,
        };
        assert!(q.into_filter().is_err());

        let q = ListInvoicesQuery {
            status: Some("sent".to_string()),
            customer_id: None,
        };
        assert_eq!(q.into_filter().unwrap().status, Some(InvoiceStatus::Sent));
    }

    #[test]
    fn payment_method_uses_screaming_snake_case() {
        let body = json!({
            "invoiceId": InvoiceId::new().to_string(),
            "amount": 10,
            "paymentMethod": "BANK_TRANSFER",
            "idempotencyKey": IdempotencyKey::new().to_string(),
        });
        let req: RecordPaymentRequest = serde_json::from_value(body).unwrap();
        assert_eq!(req.payment_method, PaymentMethod::BankTransfer);
        assert!(req.payment_date.is_none());
    }
}
