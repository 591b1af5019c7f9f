//! Inventory domain module (batch-based).
//!
//! This crate contains the business rules for per-expiry batches inside a
//! product, implemented purely as deterministic domain logic (no IO, no
//! storage). Every ledger operation takes `&self` and returns a new product
//! value, so a rejected command never leaves partial state behind.

pub mod allocation;
pub mod batch;
pub mod ledger;
pub mod product;
pub mod status;
pub mod stock;

pub use allocation::{Allocation, BatchDraw};
pub use batch::{Batch, same_expiry_day};
pub use ledger::{AddStock, DeleteBatch, EditBatchDetails, EditBatchStock, RemoveStockFromBatch};
pub use product::{CreateProduct, Product};
pub use status::{QuantityRange, StatusFilter, StockStatus};
pub use stock::{ProjectedStock, StockItem, StockRow};
