//! Infrastructure layer: stores, services, projection sync, pagination, config.

pub mod allocator;
pub mod config;
mod deadline;
pub mod error;
pub mod ledger;
pub mod listing;
pub mod pagination;
pub mod projections;
pub mod reports;
pub mod store;


pub use allocator::{FefoAllocator, RecordedSale};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use ledger::{BatchLedger, Committed, SyncWarning};
pub use listing::StockListing;
pub use pagination::{Cursor, Page, PerPage};
pub use reports::{ExpiringStock, ReportAggregator, StockStatusCounts};
pub use store::{InMemoryStore, ProductStore, SaleStore, StockStore, StoreError};
pub use projections::{FixReport, IntegrityReport, IntegrityStatus, StockStatistics, StockSyncEngine, SyncReport};

#[cfg(feature = "postgres")]
pub use store::{PostgresStore, postgres::run_migrations};
