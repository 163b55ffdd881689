//! `forgebill-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! fixed-point money, typed identifiers, the domain error model and the
//! aggregate/versioning contracts shared by the invoicing domain.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod money;
pub mod value_object;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{CustomerId, IdempotencyKey, InvoiceId, LineItemId, PaymentId};
pub use money::{Money, MONEY_SCALE};
pub use value_object::ValueObject;
