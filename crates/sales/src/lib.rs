//! Sales domain module.
//!
//! Committed sales, order-summary arithmetic and the daily sales roll-up,
//! implemented purely as deterministic domain logic (no IO, no storage).

pub mod sale;
pub mod summary;

pub use sale::{
    DiscountType, NewSale, NewSaleItem, OrderSummary, PaymentMethod, Sale, SaleItem,
    calculate_change,
};
pub use summary::{
    DailyReport, DailySalesSummary, InventoryTotals, ProductSoldSummary, TOP_PRODUCTS_LIMIT,
    day_bounds, summarize,
};
