//! Read model builders.
//!
//! The Stocks projection is derived from `Products.batches` and is always
//! rebuildable from it; it never feeds back into ledger decisions.

pub mod stock_sync;

pub use stock_sync::{
    FixReport, IntegrityReport, IntegrityStatus, StockStatistics, StockSyncEngine, SyncReport,
};
