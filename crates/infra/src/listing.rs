//! Cursor-paginated listings over the Stocks projection and Products.
//!
//! All listings sort `(updated_at DESC, id DESC)`. `has_more` is computed by
//! counting what lies after the last returned row with the same predicate;
//! `next_cursor` points at the last returned row whenever the page is non-empty.

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use stockledger_inventory::{Product, StatusFilter, StockItem};

use crate::config::EngineConfig;
use crate::deadline::with_deadline;
use crate::error::EngineResult;
use crate::pagination::{Cursor, Page, PerPage};
use crate::store::{CursorPosition, ProductFilter, ProductStore, StockStore};

#[derive(Clone)]
pub struct StockListing<P, S> {
    products: P,
    stocks: S,
    config: EngineConfig,
}

fn decode_position(cursor: Option<&str>) -> EngineResult<Option<CursorPosition>> {
    let Some(cursor) = cursor.map(Cursor::decode).transpose()? else {
        return Ok(None);
    };
    if cursor.is_legacy() {
        debug!(updated_at = %cursor.updated_at, "timestamp-only cursor, rows sharing it are skipped");
    }
    Ok(Some(cursor.position()))
}

fn last_position<T>(
    rows: &[T],
    key: impl Fn(&T) -> (DateTime<Utc>, String),
) -> Option<(CursorPosition, String)> {
    rows.last().map(|row| {
        let (updated_at, id) = key(row);
        let token = Cursor::new(updated_at, id.clone()).encode();
        (CursorPosition::new(updated_at, id), token)
    })
}

impl<P, S> StockListing<P, S>
where
    P: ProductStore,
    S: StockStore,
{
    pub fn new(products: P, stocks: S, config: EngineConfig) -> Self {
        Self {
            products,
            stocks,
            config,
        }
    }

    /// Page the Stocks projection, one row per batch.
    #[instrument(skip(self), err)]
    pub async fn list_stocks(
        &self,
        per_page: Option<usize>,
        cursor: Option<&str>,
    ) -> EngineResult<Page<StockItem>> {
        let per_page = PerPage::new(per_page);
        let after = decode_position(cursor)?;

        with_deadline("list_stocks", self.config.operation_timeout, async {
            let rows = self.stocks.page_rows(after.as_ref(), per_page.get()).await?;
            let last = last_position(&rows, |r| (r.updated_at, r.id.to_string()));

            let mut page = Page::empty(per_page);
            if let Some((position, token)) = last {
                page.has_more = self.stocks.count_rows(Some(&position)).await? > 0;
                page.next_cursor = Some(token);
            }
            page.data = rows.iter().map(StockItem::from).collect();
            page.total_count = Some(self.stocks.count_rows(None).await?);
            debug!(returned = page.data.len(), has_more = page.has_more, "stocks page");
            Ok(page)
        })
        .await
    }

    /// Page products whose total stock falls in a status band, expanded to
    /// one row per batch. `total_count` counts matching products.
    #[instrument(skip(self), err)]
    pub async fn list_stocks_filtered(
        &self,
        per_page: Option<usize>,
        cursor: Option<&str>,
        status: &str,
    ) -> EngineResult<Page<StockItem>> {
        let per_page = PerPage::new(per_page);
        let filter = ProductFilter::with_quantity(StatusFilter::parse(status)?.range());
        let after = decode_position(cursor)?;

        with_deadline("list_stocks_filtered", self.config.operation_timeout, async {
            let products = self
                .products
                .page_products(&filter, after.as_ref(), per_page.get())
                .await?;
            let last = last_position(&products, |p| (p.updated_at, p.product_id.to_string()));

            let mut page = Page::empty(per_page);
            if let Some((position, token)) = last {
                page.has_more = self.products.count_products(&filter, Some(&position)).await? > 0;
                page.next_cursor = Some(token);
            }
            page.data = products.iter().flat_map(Product::stock_items).collect();
            page.total_count = Some(self.products.count_products(&filter, None).await?);
            Ok(page)
        })
        .await
    }

    /// Page non-deleted products.
    #[instrument(skip(self), err)]
    pub async fn list_products(
        &self,
        per_page: Option<usize>,
        cursor: Option<&str>,
    ) -> EngineResult<Page<Product>> {
        let per_page = PerPage::new(per_page);
        let filter = ProductFilter::active();
        let after = decode_position(cursor)?;

        with_deadline("list_products", self.config.operation_timeout, async {
            let products = self
                .products
                .page_products(&filter, after.as_ref(), per_page.get())
                .await?;
            let last = last_position(&products, |p| (p.updated_at, p.product_id.to_string()));

            let mut page = Page::empty(per_page);
            if let Some((position, token)) = last {
                page.has_more = self.products.count_products(&filter, Some(&position)).await? > 0;
                page.next_cursor = Some(token);
            }
            page.data = products;
            Ok(page)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use base64::{Engine, engine::general_purpose::STANDARD};
    use chrono::{Duration, TimeZone};

    use stockledger_core::{BatchId, ProductId, StockRowId};
    use stockledger_inventory::{StockRow, StockStatus};

    use crate::error::EngineError;
    use crate::store::InMemoryStore;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 1, 12, 0, 0).unwrap()
    }

    fn row(id: &str, qty: i64, updated_at: DateTime<Utc>) -> StockRow {
        StockRow {
            id: StockRowId::new(id),
            product_id: ProductId::new(format!("P-{id}")),
            batch_id: Some(BatchId::new(format!("B-{id}"))),
            name: id.to_string(),
            stock_qty: qty,
            expiry_date: None,
            created_at: updated_at,
            updated_at,
        }
    }

    fn listing(store: &Arc<InMemoryStore>) -> StockListing<Arc<InMemoryStore>, Arc<InMemoryStore>> {
        StockListing::new(store.clone(), store.clone(), EngineConfig::default())
    }

    #[tokio::test]
    async fn stocks_page_carries_cursor_and_counts() {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..20 {
            store.seed_stock_row(row(&format!("R{i:02}"), i, t0() + Duration::seconds(i))).unwrap();
        }
        let listing = listing(&store);

        let first = listing.list_stocks(None, None).await.unwrap();
        assert_eq!(first.per_page, 15);
        assert_eq!(first.data.len(), 15);
        assert!(first.has_more);
        assert_eq!(first.total_count, Some(20));
        assert_eq!(first.data[0].name, "R19");
        assert_eq!(first.data[0].status, StockStatus::Average);

        let second = listing
            .list_stocks(Some(15), first.next_cursor.as_deref())
            .await
            .unwrap();
        assert_eq!(second.data.len(), 5);
        assert!(!second.has_more);
        assert!(second.next_cursor.is_some());
        assert_eq!(second.data[4].name, "R00");
    }

    #[tokio::test]
    async fn rows_sharing_a_timestamp_are_not_skipped() {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..4 {
            store.seed_stock_row(row(&format!("R{i}"), 1, t0())).unwrap();
        }
        let listing = listing(&store);

        let page = listing.list_stocks(Some(15), None).await.unwrap();
        assert_eq!(page.data.len(), 4);

        let cursor = Cursor::new(t0(), "R2").encode();
        let rest = listing.list_stocks(None, Some(&cursor)).await.unwrap();
        let names: Vec<_> = rest.data.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["R1", "R0"]);
    }

    #[tokio::test]
    async fn legacy_cursor_skips_the_shared_timestamp() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_stock_row(row("A", 1, t0())).unwrap();
        store.seed_stock_row(row("B", 1, t0())).unwrap();
        store.seed_stock_row(row("C", 1, t0() - Duration::seconds(1))).unwrap();
        let listing = listing(&store);

        let legacy = STANDARD.encode(r#"{"updated_at":"2025-02-01T12:00:00Z"}"#);
        let page = listing.list_stocks(None, Some(&legacy)).await.unwrap();

        assert_eq!(page.data.len(), 1);
        assert_eq!(page.data[0].name, "C");
    }

    #[tokio::test]
    async fn malformed_cursor_and_status_are_invalid_argument() {
        let store = Arc::new(InMemoryStore::new());
        let listing = listing(&store);

        assert!(matches!(
            listing.list_stocks(None, Some("%%%")).await,
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(matches!(
            listing.list_stocks_filtered(None, None, "Low").await,
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn empty_listing_has_no_cursor() {
        let store = Arc::new(InMemoryStore::new());
        let page = listing(&store).list_products(Some(25), None).await.unwrap();

        assert!(page.data.is_empty());
        assert_eq!(page.per_page, 25);
        assert!(page.next_cursor.is_none());
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn filtered_listing_expands_matching_products() {
        let store = Arc::new(InMemoryStore::new());
        let low = Product::legacy(ProductId::new("LOW"), "Low", 4, None, t0());
        let good = Product::legacy(ProductId::new("GOOD"), "Good", 40, None, t0());
        let mut gone = Product::legacy(ProductId::new("GONE"), "Gone", 3, None, t0());
        gone.deleted = true;
        for p in [&low, &good, &gone] {
            store.insert_product(p).await.unwrap();
        }

        let page = listing(&store)
            .list_stocks_filtered(None, None, "low")
            .await
            .unwrap();

        assert_eq!(page.total_count, Some(1));
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.data[0].product_id, ProductId::new("LOW"));
        assert_eq!(page.data[0].batch_id, None);
    }
}
