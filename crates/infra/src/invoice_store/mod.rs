//! Transactional invoice persistence boundary.
//!
//! The trait makes no storage assumptions; `InMemoryInvoiceStore` backs tests and local
//! runs, `PostgresInvoiceStore` backs production.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryInvoiceStore;
pub use postgres::PostgresInvoiceStore;
pub use r#trait::{
    InvoiceBuilder, InvoiceFilter, InvoiceLedger, InvoiceListing, InvoiceStore, StoreError,
};
