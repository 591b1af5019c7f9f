//! Read-only report aggregation.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use stockledger_core::{BatchId, ProductId};
use stockledger_inventory::{Product, StockStatus};
use stockledger_sales::{DailyReport, DailySalesSummary, InventoryTotals, day_bounds, summarize};

use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::store::{ProductFilter, ProductStore, SaleStore};

/// Number of non-deleted products in each status band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockStatusCounts {
    pub low: u64,
    pub average: u64,
    pub good: u64,
}

/// A batch (or legacy product) expiring soon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiringStock {
    pub product_id: ProductId,
    #[serde(default)]
    pub batch_id: Option<BatchId>,
    pub name: String,
    pub stock_qty: i64,
    #[serde(rename = "expiry_date")]
    pub expiry_date: DateTime<Utc>,
    /// Status of the product total, not of this batch.
    pub status: StockStatus,
}

#[derive(Clone)]
pub struct ReportAggregator<P, Q> {
    products: P,
    sales: Q,
    config: EngineConfig,
}

impl<P, Q> ReportAggregator<P, Q>
where
    P: ProductStore,
    Q: SaleStore,
{
    pub fn new(products: P, sales: Q, config: EngineConfig) -> Self {
        Self {
            products,
            sales,
            config,
        }
    }

    async fn for_each_product(&self, mut visit: impl FnMut(&Product)) -> EngineResult<()> {
        let filter = ProductFilter::active();
        let page_size = self.config.sync_page_size.max(1);
        let mut offset = 0u64;
        loop {
            let page = self.products.scan_products(&filter, offset, page_size).await?;
            page.iter().for_each(&mut visit);
            if page.len() < page_size {
                return Ok(());
            }
            offset += page.len() as u64;
        }
    }

    /// Roll up the sales of one UTC day.
    #[instrument(skip(self), err)]
    pub async fn daily_sales_summary(&self, date: NaiveDate) -> EngineResult<DailySalesSummary> {
        let (start, end) = day_bounds(date);
        let sales = self.sales.sales_between(start, end).await?;
        Ok(summarize(date, &sales, self.config.top_selling_limit))
    }

    /// Summary and current inventory totals in the persisted document shape.
    pub async fn daily_report(
        &self,
        date: NaiveDate,
        created_at: DateTime<Utc>,
    ) -> EngineResult<DailyReport> {
        let summary = self.daily_sales_summary(date).await?;
        let inventory = self.inventory_totals().await?;
        Ok(DailyReport::new(summary, inventory, created_at))
    }

    /// Total stock and its cost value over non-deleted products.
    #[instrument(skip(self), err)]
    pub async fn inventory_totals(&self) -> EngineResult<InventoryTotals> {
        let mut totals = InventoryTotals::default();
        self.for_each_product(|product| totals.add(product.stock_qty, product.cost_price))
            .await?;
        Ok(totals)
    }

    #[instrument(skip(self), err)]
    pub async fn stock_status_counts(&self) -> EngineResult<StockStatusCounts> {
        let mut counts = StockStatusCounts::default();
        for status in [StockStatus::Low, StockStatus::Average, StockStatus::Good] {
            let n = self
                .products
                .count_products(&ProductFilter::with_quantity(status.range()), None)
                .await?;
            match status {
                StockStatus::Low => counts.low = n,
                StockStatus::Average => counts.average = n,
                StockStatus::Good => counts.good = n,
            }
        }
        Ok(counts)
    }

    /// Batches (or legacy products) expiring strictly within
    /// `(now, now + expiring_window_days)`, largest quantity first.
    #[instrument(skip(self), err)]
    pub async fn top_expiring_stocks(
        &self,
        top_n: usize,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<ExpiringStock>> {
        let horizon = Duration::try_days(self.config.expiring_window_days)
            .and_then(|window| now.checked_add_signed(window))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let within = |expiry: Option<DateTime<Utc>>| expiry.filter(|e| *e > now && *e < horizon);

        let mut entries = Vec::new();
        self.for_each_product(|product| {
            let status = StockStatus::classify(product.stock_qty);
            if !product.is_batched() {
                if let Some(expiry_date) = within(product.expiry_date) {
                    entries.push(ExpiringStock {
                        product_id: product.product_id.clone(),
                        batch_id: None,
                        name: product.name.clone(),
                        stock_qty: product.stock_qty,
                        expiry_date,
                        status,
                    });
                }
                return;
            }
            for batch in &product.batches {
                if let Some(expiry_date) = within(batch.expiry_date) {
                    entries.push(ExpiringStock {
                        product_id: product.product_id.clone(),
                        batch_id: Some(batch.batch_id.clone()),
                        name: product.name.clone(),
                        stock_qty: batch.stock_qty,
                        expiry_date,
                        status,
                    });
                }
            }
        })
        .await?;

        entries.sort_by(|a, b| b.stock_qty.cmp(&a.stock_qty));
        entries.truncate(top_n);
        Ok(entries)
    }

    /// Non-deleted products with total stock below 10, lowest first.
    #[instrument(skip(self), err)]
    pub async fn low_stock_products(&self, limit: usize) -> EngineResult<Vec<Product>> {
        let filter = ProductFilter::with_quantity(StockStatus::Low.range());
        let mut low = Vec::new();
        let mut offset = 0u64;
        let page_size = self.config.sync_page_size.max(1);
        loop {
            let page = self.products.scan_products(&filter, offset, page_size).await?;
            let done = page.len() < page_size;
            offset += page.len() as u64;
            low.extend(page);
            if done {
                break;
            }
        }
        low.sort_by_key(|p| p.stock_qty);
        low.truncate(limit);
        Ok(low)
    }
}
