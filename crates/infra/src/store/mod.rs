//! Typed persistence ports for products, stock rows and sales.
//!
//! The ledger, allocator, sync engine and listings depend only on these
//! traits. `InMemoryStore` backs tests and tooling; the Postgres adapter is
//! behind the `postgres` feature.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use stockledger_core::{ExpectedVersion, ProductId, StockRowId};
use stockledger_inventory::{Product, ProjectedStock, QuantityRange, StockRow};
use stockledger_sales::Sale;

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use in_memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Conditional write lost against a concurrent writer, or duplicate key.
    #[error("write conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Position of the last row returned by a listing page.
///
/// `id == None` is a legacy timestamp-only position: rows are matched with
/// `updated_at < position.updated_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorPosition {
    pub updated_at: DateTime<Utc>,
    pub id: Option<String>,
}

impl CursorPosition {
    pub fn new(updated_at: DateTime<Utc>, id: impl Into<String>) -> Self {
        Self {
            updated_at,
            id: Some(id.into()),
        }
    }

    /// True when a row keyed `(updated_at, id)` sorts strictly after this
    /// position in `(updated_at DESC, id DESC)` order.
    pub fn precedes(&self, updated_at: DateTime<Utc>, id: &str) -> bool {
        match self.id.as_deref().filter(|s| !s.is_empty()) {
            Some(cursor_id) => {
                updated_at < self.updated_at || (updated_at == self.updated_at && id < cursor_id)
            }
            None => updated_at < self.updated_at,
        }
    }
}

/// Product query predicate. Soft-deleted products never match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProductFilter {
    /// Range over the product total `stock_qty`.
    pub quantity: Option<QuantityRange>,
}

impl ProductFilter {
    pub fn active() -> Self {
        Self::default()
    }

    pub fn with_quantity(range: QuantityRange) -> Self {
        Self {
            quantity: Some(range),
        }
    }

    pub fn matches(&self, product: &Product) -> bool {
        !product.deleted && self.quantity.is_none_or(|r| r.contains(product.stock_qty))
    }
}

/// One row of a projection upsert. `id_on_insert` is only used when no row
/// for `(product_id, batch_id)` exists yet, like `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockRowUpsert {
    pub id_on_insert: StockRowId,
    pub stock: ProjectedStock,
}

/// The projected rows of one product version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductProjection {
    pub product_id: ProductId,
    /// Version of the product the rows were derived from.
    pub version: u64,
    pub rows: Vec<StockRowUpsert>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionMode {
    /// Rows of the product that are not in the projection are deleted,
    /// including orphans.
    Replace,
    /// Upsert only.
    Merge,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectionOutcome {
    pub rows_removed: u64,
    pub rows_written: u64,
    /// Products left untouched because a newer version was already projected.
    pub stale: Vec<ProductId>,
}

#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Fetch by id, including soft-deleted products.
    async fn find_product(&self, id: &ProductId) -> StoreResult<Option<Product>>;

    /// Insert a new product. Fails `Conflict` if the id is taken.
    async fn insert_product(&self, product: &Product) -> StoreResult<Product>;

    /// Whole-document conditional write; returns the stored product with its
    /// bumped version. Fails `Conflict` when `expected` does not match.
    async fn save_product(
        &self,
        product: &Product,
        expected: ExpectedVersion,
    ) -> StoreResult<Product>;

    /// Products matching `filter`, ordered by product id, for batch scans.
    async fn scan_products(
        &self,
        filter: &ProductFilter,
        offset: u64,
        limit: usize,
    ) -> StoreResult<Vec<Product>>;

    /// Products matching `filter` after `after`, in `(updated_at DESC, id DESC)`.
    async fn page_products(
        &self,
        filter: &ProductFilter,
        after: Option<&CursorPosition>,
        limit: usize,
    ) -> StoreResult<Vec<Product>>;

    /// Count of products matching `filter` and positioned after `after`.
    async fn count_products(
        &self,
        filter: &ProductFilter,
        after: Option<&CursorPosition>,
    ) -> StoreResult<u64>;
}

#[async_trait]
pub trait StockStore: Send + Sync {
    async fn rows_for_product(&self, product_id: &ProductId) -> StoreResult<Vec<StockRow>>;

    /// Write each projection atomically per product.
    ///
    /// The store remembers the highest version projected for every product.
    /// A projection older than that is skipped and reported in `stale`;
    /// otherwise the remembered version is raised to it. Upserts are keyed by
    /// `(product_id, batch_id)`: mutable fields are overwritten, `id` and
    /// `created_at` are only set on insert.
    async fn apply_projections(
        &self,
        projections: &[ProductProjection],
        mode: ProjectionMode,
    ) -> StoreResult<ProjectionOutcome>;

    /// Rows with a missing or blank batch id.
    async fn count_orphaned_rows(&self) -> StoreResult<u64>;

    async fn delete_orphaned_rows(&self) -> StoreResult<u64>;

    async fn count_rows(&self, after: Option<&CursorPosition>) -> StoreResult<u64>;

    /// Rows after `after`, in `(updated_at DESC, id DESC)`.
    async fn page_rows(
        &self,
        after: Option<&CursorPosition>,
        limit: usize,
    ) -> StoreResult<Vec<StockRow>>;

    async fn distinct_product_ids(&self) -> StoreResult<Vec<ProductId>>;
}

#[async_trait]
pub trait SaleStore: Send + Sync {
    async fn insert_sale(&self, sale: &Sale) -> StoreResult<()>;

    /// Sales with `start <= created_at < end`.
    async fn sales_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<Sale>>;
}

#[async_trait]
impl<T> ProductStore for Arc<T>
where
    T: ProductStore + ?Sized,
{
    async fn find_product(&self, id: &ProductId) -> StoreResult<Option<Product>> {
        (**self).find_product(id).await
    }

    async fn insert_product(&self, product: &Product) -> StoreResult<Product> {
        (**self).insert_product(product).await
    }

    async fn save_product(
        &self,
        product: &Product,
        expected: ExpectedVersion,
    ) -> StoreResult<Product> {
        (**self).save_product(product, expected).await
    }

    async fn scan_products(
        &self,
        filter: &ProductFilter,
        offset: u64,
        limit: usize,
    ) -> StoreResult<Vec<Product>> {
        (**self).scan_products(filter, offset, limit).await
    }

    async fn page_products(
        &self,
        filter: &ProductFilter,
        after: Option<&CursorPosition>,
        limit: usize,
    ) -> StoreResult<Vec<Product>> {
        (**self).page_products(filter, after, limit).await
    }

    async fn count_products(
        &self,
        filter: &ProductFilter,
        after: Option<&CursorPosition>,
    ) -> StoreResult<u64> {
        (**self).count_products(filter, after).await
    }
}

#[async_trait]
impl<T> StockStore for Arc<T>
where
    T: StockStore + ?Sized,
{
    async fn rows_for_product(&self, product_id: &ProductId) -> StoreResult<Vec<StockRow>> {
        (**self).rows_for_product(product_id).await
    }

    async fn apply_projections(
        &self,
        projections: &[ProductProjection],
        mode: ProjectionMode,
    ) -> StoreResult<ProjectionOutcome> {
        (**self).apply_projections(projections, mode).await
    }

    async fn count_orphaned_rows(&self) -> StoreResult<u64> {
        (**self).count_orphaned_rows().await
    }

    async fn delete_orphaned_rows(&self) -> StoreResult<u64> {
        (**self).delete_orphaned_rows().await
    }

    async fn count_rows(&self, after: Option<&CursorPosition>) -> StoreResult<u64> {
        (**self).count_rows(after).await
    }

    async fn page_rows(
        &self,
        after: Option<&CursorPosition>,
        limit: usize,
    ) -> StoreResult<Vec<StockRow>> {
        (**self).page_rows(after, limit).await
    }

    async fn distinct_product_ids(&self) -> StoreResult<Vec<ProductId>> {
        (**self).distinct_product_ids().await
    }
}

#[async_trait]
impl<T> SaleStore for Arc<T>
where
    T: SaleStore + ?Sized,
{
    async fn insert_sale(&self, sale: &Sale) -> StoreResult<()> {
        (**self).insert_sale(sale).await
    }

    async fn sales_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<Sale>> {
        (**self).sales_between(start, end).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn compound_position_breaks_timestamp_ties_by_id() {
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let pos = CursorPosition::new(t, "STK000005");

        assert!(pos.precedes(t, "STK000004"));
        assert!(!pos.precedes(t, "STK000005"));
        assert!(!pos.precedes(t, "STK000006"));
        assert!(pos.precedes(t - chrono::Duration::seconds(1), "STK999999"));
    }

    #[test]
    fn legacy_position_skips_rows_sharing_the_timestamp() {
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let pos = CursorPosition { updated_at: t, id: None };
        assert!(!pos.precedes(t, "anything"));
        assert!(pos.precedes(t - chrono::Duration::milliseconds(1), "x"));
    }
}
