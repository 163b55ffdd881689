//! Invoice numbers: `INV-{year}-{seq:04}`.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use forgebill_core::{DomainError, ValueObject};

const PREFIX: &str = "INV";

/// Year-scoped, human-facing invoice number.
///
/// The sequence is zero-padded to four digits; sequences past 9999 keep growing
/// (`INV-2025-10000`) rather than wrapping.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InvoiceNumber {
    year: i32,
    sequence: u32,
}

impl InvoiceNumber {
    pub fn new(year: i32, sequence: u32) -> Result<Self, DomainError> {
        if !(1..=9999).contains(&year) {
            return Err(DomainError::validation(format!(
                "invoice number year out of range: {year}"
            )));
        }
        if sequence == 0 {
            return Err(DomainError::validation(
                "invoice number sequence must start at 1",
            ));
        }
        Ok(Self { year, sequence })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}

impl fmt::Display for InvoiceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}-{:04}-{:04}", self.year, self.sequence)
    }
}

impl FromStr for InvoiceNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::validation(format!("malformed invoice number: {s}"));

        let mut parts = s.splitn(3, '-');
        let (Some(prefix), Some(year), Some(seq)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        if prefix != PREFIX || year.len() != 4 || seq.len() < 4 {
            return Err(invalid());
        }
        if !year.bytes().all(|b| b.is_ascii_digit()) || !seq.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let year: i32 = year.parse().map_err(|_| invalid())?;
        let sequence: u32 = seq.parse().map_err(|_| invalid())?;
        Self::new(year, sequence)
    }
}

impl TryFrom<String> for InvoiceNumber {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<InvoiceNumber> for String {
    fn from(value: InvoiceNumber) -> Self {
        value.to_string()
    }
}

impl ValueObject for InvoiceNumber {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_four_digit_padding() {
        let n = InvoiceNumber::new(2025, 7).unwrap();
        assert_eq!(n.to_string(), "INV-2025-0007");

        let n = InvoiceNumber::new(2025, 12345).unwrap();
        assert_eq!(n.to_string(), "INV-2025-12345");
    }

    #[test]
    fn parses_its_own_format() {
        let n: InvoiceNumber = "INV-2024-0042".parse().unwrap();
        assert_eq!(n.year(), 2024);
        assert_eq!(n.sequence(), 42);
    }

    #[test]
    fn rejects_malformed_numbers() {
        for bad in [
            "",
            "INV-2024",
            "INV-24-0001",
            "BILL-2024-0001",
            "INV-2024-01",
            "INV-2024-00a1",
            "INV-2024-0000",
        ] {
            assert!(bad.parse::<InvoiceNumber>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn orders_by_year_then_sequence() {
        let a = InvoiceNumber::new(2024, 9999).unwrap();
        let b = InvoiceNumber::new(2025, 1).unwrap();
        let c = InvoiceNumber::new(2025, 2).unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn serializes_as_display_string() {
        let n = InvoiceNumber::new(2025, 1).unwrap();
        assert_eq!(serde_json::to_string(&n).unwrap(), "\"INV-2025-0001\"");
    }
}
