//! Invoicing domain module.
//!
//! This crate contains the business rules for invoices, line items and the payment
//! ledger, implemented purely as deterministic domain logic (no IO, no HTTP, no
//! storage). Stores and services in `forgebill-infra` drive these types inside
//! transactions.

pub mod balance;
pub mod invoice;
pub mod line_item;
pub mod number;
pub mod payment;

pub use balance::{CustomerBalance, InvoiceSummary};
pub use invoice::{Invoice, InvoiceSnapshot, InvoiceStatus, InvoiceUpdate, NewInvoice};
pub use line_item::{LineItem, LineItemInput, LineItemLedger};
pub use number::InvoiceNumber;
pub use payment::{Payment, PaymentMethod, PaymentOutcome, RecordPayment};
