//! Line items and the ledger that derives an invoice's subtotal from them.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use forgebill_core::{DomainError, DomainResult, Entity, LineItemId, Money};

/// Caller-supplied line item, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemInput {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Money,
}

/// One billable row of an invoice. `amount = round(quantity * unit_price)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: LineItemId,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Money,
    pub amount: Money,
}

impl LineItem {
    /// Validate an input row and compute its amount.
    pub fn build(id: LineItemId, input: &LineItemInput) -> DomainResult<Self> {
        if input.quantity <= Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "line item quantity must be positive (got {})",
                input.quantity
            )));
        }
        if input.unit_price.is_negative() {
            return Err(DomainError::validation(format!(
                "line item unit_price must not be negative (got {})",
                input.unit_price
            )));
        }

        let amount = Money::extend(input.quantity, input.unit_price)?;
        Ok(Self {
            id,
            description: input.description.trim().to_string(),
            quantity: input.quantity,
            unit_price: input.unit_price,
            amount,
        })
    }
}

impl Entity for LineItem {
    type Id = LineItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Ordered line items of one invoice plus their derived subtotal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LineItemLedger {
    items: Vec<LineItem>,
    subtotal: Money,
}

impl LineItemLedger {
    /// Build a ledger from inputs. An empty input list yields an empty ledger.
    pub fn from_inputs(inputs: &[LineItemInput]) -> DomainResult<Self> {
        let items = inputs
            .iter()
            .enumerate()
            .map(|(idx, input)| {
                LineItem::build(LineItemId::new(), input).map_err(|e| match e {
                    DomainError::Validation(msg) => {
                        DomainError::validation(format!("lineItems[{idx}]: {msg}"))
                    }
                    other => other,
                })
            })
            .collect::<DomainResult<Vec<_>>>()?;
        Self::from_items(items)
    }

    /// Rebuild a ledger from already-persisted items (subtotal is recomputed).
    pub fn from_items(items: Vec<LineItem>) -> DomainResult<Self> {
        let subtotal = Money::try_sum(items.iter().map(|i| i.amount))?;
        Ok(Self { items, subtotal })
    }

    /// Validate a replacement set. Replacements must not be empty.
    pub fn replacement(inputs: &[LineItemInput]) -> DomainResult<Self> {
        if inputs.is_empty() {
            return Err(DomainError::validation("lineItems must not be empty"));
        }
        Self::from_inputs(inputs)
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn subtotal(&self) -> Money {
        self.subtotal
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// `subtotal - discount`, rejecting negative discounts and discounts larger
    /// than the subtotal.
    pub fn total_after(&self, discount: Money) -> DomainResult<Money> {
        if discount.is_negative() {
            return Err(DomainError::validation(format!(
                "discount must not be negative (got {discount})"
            )));
        }
        if discount > self.subtotal {
            return Err(DomainError::validation(format!(
                "discount {discount} exceeds subtotal {}",
                self.subtotal
            )));
        }
        self.subtotal.checked_sub(discount)
    }
}
