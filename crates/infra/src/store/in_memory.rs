//! In-memory store backing tests and single-process tooling.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use stockledger_core::{BatchId, ExpectedVersion, ProductId};
use stockledger_inventory::{Product, StockRow};
use stockledger_sales::Sale;

use super::{
    CursorPosition, ProductFilter, ProductProjection, ProductStore, ProjectionMode,
    ProjectionOutcome, SaleStore, StockRowUpsert, StockStore, StoreError, StoreResult,
};

/// All three collections behind `RwLock`s. Writes to one product are
/// serialized by the lock, so `save_product`'s version check is atomic.
/// Projection writes hold the stocks and projected-version locks together.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    products: RwLock<BTreeMap<ProductId, Product>>,
    stocks: RwLock<Vec<StockRow>>,
    projected_versions: RwLock<BTreeMap<ProductId, u64>>,
    sales: RwLock<Vec<Sale>>,
    fail_stock_writes: AtomicBool,
    injected_conflicts: AtomicU32,
    projection_stall: Mutex<Option<Duration>>,
}

fn read<T>(lock: &RwLock<T>) -> StoreResult<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| StoreError::Backend("in-memory lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> StoreResult<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| StoreError::Backend("in-memory lock poisoned".to_string()))
}

/// `(updated_at DESC, id DESC)`.
fn newest_first<'a>(a: (DateTime<Utc>, &'a str), b: (DateTime<Utc>, &'a str)) -> std::cmp::Ordering {
    b.0.cmp(&a.0).then_with(|| b.1.cmp(a.1))
}

fn upsert_row(stocks: &mut Vec<StockRow>, upsert: &StockRowUpsert) {
    let stock = &upsert.stock;
    let existing = stocks
        .iter_mut()
        .find(|r| r.product_id == stock.product_id && r.batch_id.as_ref() == Some(&stock.batch_id));
    match existing {
        Some(row) => {
            row.name = stock.name.clone();
            row.stock_qty = stock.stock_qty;
            row.expiry_date = stock.expiry_date;
            row.updated_at = stock.updated_at;
        }
        None => stocks.push(StockRow {
            id: upsert.id_on_insert.clone(),
            product_id: stock.product_id.clone(),
            batch_id: Some(stock.batch_id.clone()),
            name: stock.name.clone(),
            stock_qty: stock.stock_qty,
            expiry_date: stock.expiry_date,
            created_at: stock.created_at,
            updated_at: stock.updated_at,
        }),
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent Stocks write fail with a backend error.
    pub fn fail_stock_writes(&self, fail: bool) {
        self.fail_stock_writes.store(fail, Ordering::SeqCst);
    }

    /// The next `n` conditional product writes lose against a simulated
    /// concurrent writer: the stored version is bumped and `Conflict` returned.
    pub fn inject_save_conflicts(&self, n: u32) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    /// Hold the next `apply_projections` call for `delay` before it takes any
    /// lock, so a later projection can overtake it.
    pub fn stall_next_projection(&self, delay: Duration) {
        if let Ok(mut slot) = self.projection_stall.lock() {
            *slot = Some(delay);
        }
    }

    /// Highest product version projected into Stocks so far.
    pub fn projected_version(&self, product_id: &ProductId) -> StoreResult<Option<u64>> {
        Ok(read(&self.projected_versions)?.get(product_id).copied())
    }

    /// Insert a raw projection row, bypassing the sync engine.
    pub fn seed_stock_row(&self, row: StockRow) -> StoreResult<()> {
        write(&self.stocks)?.push(row);
        Ok(())
    }

    pub fn all_stock_rows(&self) -> StoreResult<Vec<StockRow>> {
        Ok(read(&self.stocks)?.clone())
    }

    fn check_stock_writes(&self) -> StoreResult<()> {
        if self.fail_stock_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("stocks collection unavailable".to_string()));
        }
        Ok(())
    }

    fn take_projection_stall(&self) -> Option<Duration> {
        self.projection_stall.lock().ok().and_then(|mut slot| slot.take())
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ProductStore for InMemoryStore {
    async fn find_product(&self, id: &ProductId) -> StoreResult<Option<Product>> {
        Ok(read(&self.products)?.get(id).cloned())
    }

    async fn insert_product(&self, product: &Product) -> StoreResult<Product> {
        let mut products = write(&self.products)?;
        if products.contains_key(&product.product_id) {
            return Err(StoreError::Conflict(format!(
                "product {} already exists",
                product.product_id
            )));
        }
        let mut stored = product.clone();
        stored.version = 1;
        products.insert(stored.product_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn save_product(
        &self,
        product: &Product,
        expected: ExpectedVersion,
    ) -> StoreResult<Product> {
        let mut products = write(&self.products)?;
        let current = products.get_mut(&product.product_id).ok_or_else(|| {
            StoreError::NotFound(format!("product {} not found", product.product_id))
        })?;

        if matches!(expected, ExpectedVersion::Exact(_)) && self.take_injected_conflict() {
            current.version += 1;
            return Err(StoreError::Conflict(format!(
                "product {} was modified concurrently",
                product.product_id
            )));
        }
        expected
            .check(current.version)
            .map_err(|e| StoreError::Conflict(format!("product {}: {e}", product.product_id)))?;

        let mut stored = product.clone();
        stored.version = current.version + 1;
        *current = stored.clone();
        Ok(stored)
    }

    async fn scan_products(
        &self,
        filter: &ProductFilter,
        offset: u64,
        limit: usize,
    ) -> StoreResult<Vec<Product>> {
        let products = read(&self.products)?;
        Ok(products
            .values()
            .filter(|p| filter.matches(p))
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn page_products(
        &self,
        filter: &ProductFilter,
        after: Option<&CursorPosition>,
        limit: usize,
    ) -> StoreResult<Vec<Product>> {
        let products = read(&self.products)?;
        let mut page: Vec<&Product> = products
            .values()
            .filter(|p| filter.matches(p))
            .filter(|p| after.is_none_or(|c| c.precedes(p.updated_at, p.product_id.as_str())))
            .collect();
        page.sort_by(|a, b| {
            newest_first(
                (a.updated_at, a.product_id.as_str()),
                (b.updated_at, b.product_id.as_str()),
            )
        });
        Ok(page.into_iter().take(limit).cloned().collect())
    }

    async fn count_products(
        &self,
        filter: &ProductFilter,
        after: Option<&CursorPosition>,
    ) -> StoreResult<u64> {
        let products = read(&self.products)?;
        Ok(products
            .values()
            .filter(|p| filter.matches(p))
            .filter(|p| after.is_none_or(|c| c.precedes(p.updated_at, p.product_id.as_str())))
            .count() as u64)
    }
}

#[async_trait]
impl StockStore for InMemoryStore {
    async fn rows_for_product(&self, product_id: &ProductId) -> StoreResult<Vec<StockRow>> {
        Ok(read(&self.stocks)?
            .iter()
            .filter(|r| &r.product_id == product_id)
            .cloned()
            .collect())
    }

    async fn apply_projections(
        &self,
        projections: &[ProductProjection],
        mode: ProjectionMode,
    ) -> StoreResult<ProjectionOutcome> {
        if let Some(delay) = self.take_projection_stall() {
            tokio::time::sleep(delay).await;
        }
        self.check_stock_writes()?;
        let mut stocks = write(&self.stocks)?;
        let mut versions = write(&self.projected_versions)?;
        let mut outcome = ProjectionOutcome::default();

        for projection in projections {
            let projected = versions.entry(projection.product_id.clone()).or_insert(0);
            if *projected > projection.version {
                outcome.stale.push(projection.product_id.clone());
                continue;
            }
            *projected = projection.version;

            if mode == ProjectionMode::Replace {
                let keep: BTreeSet<&BatchId> =
                    projection.rows.iter().map(|r| &r.stock.batch_id).collect();
                let before = stocks.len();
                stocks.retain(|r| {
                    r.product_id != projection.product_id
                        || (!r.is_orphaned() && r.batch_id.as_ref().is_some_and(|b| keep.contains(b)))
                });
                outcome.rows_removed += (before - stocks.len()) as u64;
            }
            for upsert in &projection.rows {
                upsert_row(&mut stocks, upsert);
            }
            outcome.rows_written += projection.rows.len() as u64;
        }
        Ok(outcome)
    }

    async fn count_orphaned_rows(&self) -> StoreResult<u64> {
        Ok(read(&self.stocks)?.iter().filter(|r| r.is_orphaned()).count() as u64)
    }

    async fn delete_orphaned_rows(&self) -> StoreResult<u64> {
        self.check_stock_writes()?;
        let mut stocks = write(&self.stocks)?;
        let before = stocks.len();
        stocks.retain(|r| !r.is_orphaned());
        Ok((before - stocks.len()) as u64)
    }

    async fn count_rows(&self, after: Option<&CursorPosition>) -> StoreResult<u64> {
        Ok(read(&self.stocks)?
            .iter()
            .filter(|r| after.is_none_or(|c| c.precedes(r.updated_at, r.id.as_str())))
            .count() as u64)
    }

    async fn page_rows(
        &self,
        after: Option<&CursorPosition>,
        limit: usize,
    ) -> StoreResult<Vec<StockRow>> {
        let stocks = read(&self.stocks)?;
        let mut page: Vec<&StockRow> = stocks
            .iter()
            .filter(|r| after.is_none_or(|c| c.precedes(r.updated_at, r.id.as_str())))
            .collect();
        page.sort_by(|a, b| newest_first((a.updated_at, a.id.as_str()), (b.updated_at, b.id.as_str())));
        Ok(page.into_iter().take(limit).cloned().collect())
    }

    async fn distinct_product_ids(&self) -> StoreResult<Vec<ProductId>> {
        let ids: BTreeSet<ProductId> = read(&self.stocks)?
            .iter()
            .map(|r| r.product_id.clone())
            .collect();
        Ok(ids.into_iter().collect())
    }
}

#[async_trait]
impl SaleStore for InMemoryStore {
    async fn insert_sale(&self, sale: &Sale) -> StoreResult<()> {
        let mut sales = write(&self.sales)?;
        if sales.iter().any(|s| s.sale_id == sale.sale_id) {
            return Err(StoreError::Conflict(format!("sale {} already exists", sale.sale_id)));
        }
        sales.push(sale.clone());
        Ok(())
    }

    async fn sales_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<Sale>> {
        Ok(read(&self.sales)?
            .iter()
            .filter(|s| s.created_at >= start && s.created_at < end)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn product(id: &str, qty: i64) -> Product {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        Product::legacy(ProductId::new(id), id, qty, None, at)
    }

    #[tokio::test]
    async fn conditional_save_rejects_stale_version() {
        let store = InMemoryStore::new();
        let stored = store.insert_product(&product("P1", 3)).await.unwrap();
        assert_eq!(stored.version, 1);

        let saved = store
            .save_product(&stored, ExpectedVersion::Exact(1))
            .await
            .unwrap();
        assert_eq!(saved.version, 2);

        let stale = store.save_product(&stored, ExpectedVersion::Exact(1)).await;
        assert!(matches!(stale, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn duplicate_insert_conflicts() {
        let store = InMemoryStore::new();
        store.insert_product(&product("P1", 3)).await.unwrap();
        assert!(matches!(
            store.insert_product(&product("P1", 3)).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn filtered_scan_skips_deleted_and_out_of_range() {
        let store = InMemoryStore::new();
        store.insert_product(&product("A", 3)).await.unwrap();
        store.insert_product(&product("B", 30)).await.unwrap();
        let mut deleted = product("C", 4);
        deleted.deleted = true;
        store.insert_product(&deleted).await.unwrap();

        let low = ProductFilter::with_quantity(stockledger_inventory::QuantityRange::between(0, 9));
        let found = store.scan_products(&low, 0, 100).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].product_id.as_str(), "A");
        assert_eq!(store.count_products(&ProductFilter::active(), None).await.unwrap(), 2);
    }
}
