//! Infrastructure layer: invoice persistence, customer lookup, use-case orchestration.

pub mod customers;
pub mod invoice_store;
pub mod service;


pub use customers::{CustomerDirectory, InMemoryCustomerDirectory, PostgresCustomerDirectory};
pub use invoice_store::{
    InMemoryInvoiceStore, InvoiceFilter, InvoiceLedger, InvoiceListing, InvoiceStore,
    PostgresInvoiceStore, StoreError,
};
pub use service::{
    DEFAULT_PAYMENT_MAX_RETRIES, InvoiceService, InvoiceView, RecordedPayment, ServiceConfig,
    ServiceError, ServiceResult,
};
