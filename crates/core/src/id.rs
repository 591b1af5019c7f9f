//! Strongly-typed identifiers and identifier generation.
//!
//! Identifiers are opaque strings (e.g. `BATCH000042`, `P-7f3a...`) because they
//! are minted by an external generator and stored verbatim by the document store.

use core::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a product (system of record for batches).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

/// Identifier of one receipt lot inside a product.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

/// Internal identifier of a Stocks projection row (pagination tiebreaker).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StockRowId(String);

/// Identifier of a committed sale.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SaleId(String);

macro_rules! impl_string_id {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Wrap a raw identifier. Empty identifiers are allowed here because
            /// legacy data contains them; use `parse` for validated input.
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }

            /// Parse a caller-supplied identifier, rejecting blanks.
            pub fn parse(raw: &str) -> Result<Self, DomainError> {
                raw.parse()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $t {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $t {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(DomainError::invalid_id(format!("{} cannot be empty", $name)));
                }
                Ok(Self(trimmed.to_string()))
            }
        }
    };
}

impl_string_id!(ProductId, "ProductId");
impl_string_id!(BatchId, "BatchId");
impl_string_id!(StockRowId, "StockRowId");
impl_string_id!(SaleId, "SaleId");

/// Externally supplied identifier source.
///
/// Implementations must return identifiers that are unique per prefix.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self, prefix: &str) -> String;

    fn next_batch_id(&self) -> BatchId {
        BatchId(self.next_id("BATCH"))
    }

    fn next_stock_row_id(&self) -> StockRowId {
        StockRowId(self.next_id("STK"))
    }

    fn next_sale_id(&self) -> SaleId {
        SaleId(self.next_id("SALE"))
    }
}

impl<G> IdGenerator for std::sync::Arc<G>
where
    G: IdGenerator + ?Sized,
{
    fn next_id(&self, prefix: &str) -> String {
        (**self).next_id(prefix)
    }
}

/// Counter-based generator producing `PREFIX000001`, `PREFIX000002`, ...
///
/// Deterministic; used by tests and single-process tools. The zero padding keeps
/// lexicographic order equal to issue order up to a million ids.
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    next: AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&self, prefix: &str) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{prefix}{n:06}")
    }
}

/// UUIDv7 generator (time-ordered), for multi-process deployments.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", Uuid::now_v7())
    }
}
