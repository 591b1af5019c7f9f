//! `stockledger-core`: shared primitives for the stock engine.
//!
//! This crate contains **pure** building blocks (no storage, no IO): the domain
//! error taxonomy, typed identifiers, identifier generation, and optimistic
//! concurrency versions.

pub mod aggregate;
pub mod error;
pub mod id;

pub use aggregate::ExpectedVersion;
pub use error::{DomainError, DomainResult};
pub use id::{
    BatchId, IdGenerator, ProductId, SaleId, SequentialIdGenerator, StockRowId, UuidIdGenerator,
};
