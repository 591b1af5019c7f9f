//! Daily sales roll-up.
//!
//! Reads historical sale lines only; live stock never feeds into it.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::ProductId;

use crate::sale::{PaymentMethod, Sale};

/// Per-product roll-up for one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSoldSummary {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: i64,
    /// Unit price of the first line seen for the product.
    pub unit_price: Decimal,
    pub total_amount: Decimal,
}

/// Length of the quantity-ranked `top_products` list.
pub const TOP_PRODUCTS_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySalesSummary {
    pub report_date: NaiveDate,
    pub total_sales: u64,
    pub total_revenue: Decimal,
    pub total_discount: Decimal,
    pub total_tax: Decimal,
    pub total_items_sold: i64,
    pub cash_sales: u64,
    pub card_sales: u64,
    pub transfer_sales: u64,
    pub cash_revenue: Decimal,
    pub card_revenue: Decimal,
    pub transfer_revenue: Decimal,
    pub sales_with_customer: u64,
    pub sales_without_customer: u64,
    /// Sorted by total amount, highest first.
    pub products_sold: Vec<ProductSoldSummary>,
    /// Head of `products_sold`.
    pub top_selling_items: Vec<ProductSoldSummary>,
    /// Highest quantity sold first, at most `TOP_PRODUCTS_LIMIT`.
    pub top_products: Vec<ProductSoldSummary>,
}

/// Stock on hand over non-deleted products, valued at product cost price.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryTotals {
    pub total_stock_quantity: i64,
    pub total_inventory_cost: Decimal,
}

impl InventoryTotals {
    pub fn add(&mut self, stock_qty: i64, cost_price: Decimal) {
        self.total_stock_quantity += stock_qty;
        self.total_inventory_cost += cost_price * Decimal::from(stock_qty);
    }
}

/// `[00:00, 24:00)` UTC of `date`.
pub fn day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN));
    (start, start + Duration::hours(24))
}

/// Roll up `sales` committed on `date`. Sales outside the day are ignored.
pub fn summarize(date: NaiveDate, sales: &[Sale], top_n: usize) -> DailySalesSummary {
    let (start, end) = day_bounds(date);

    let mut summary = DailySalesSummary {
        report_date: date,
        total_sales: 0,
        total_revenue: Decimal::ZERO,
        total_discount: Decimal::ZERO,
        total_tax: Decimal::ZERO,
        total_items_sold: 0,
        cash_sales: 0,
        card_sales: 0,
        transfer_sales: 0,
        cash_revenue: Decimal::ZERO,
        card_revenue: Decimal::ZERO,
        transfer_revenue: Decimal::ZERO,
        sales_with_customer: 0,
        sales_without_customer: 0,
        products_sold: Vec::new(),
        top_selling_items: Vec::new(),
        top_products: Vec::new(),
    };

    // insertion order keeps ties deterministic after the stable sort below
    let mut order: Vec<ProductId> = Vec::new();
    let mut by_product: HashMap<ProductId, ProductSoldSummary> = HashMap::new();

    for sale in sales.iter().filter(|s| s.created_at >= start && s.created_at < end) {
        summary.total_sales += 1;
        summary.total_revenue += sale.total;
        summary.total_discount += sale.discount;
        summary.total_tax += sale.tax;
        match sale.payment_method {
            PaymentMethod::Cash => {
                summary.cash_sales += 1;
                summary.cash_revenue += sale.total;
            }
            PaymentMethod::Card => {
                summary.card_sales += 1;
                summary.card_revenue += sale.total;
            }
            PaymentMethod::Transfer => {
                summary.transfer_sales += 1;
                summary.transfer_revenue += sale.total;
            }
        }
        if sale.has_customer() {
            summary.sales_with_customer += 1;
        } else {
            summary.sales_without_customer += 1;
        }

        for item in &sale.items {
            summary.total_items_sold += item.quantity;
            match by_product.get_mut(&item.product_id) {
                Some(existing) => {
                    existing.quantity += item.quantity;
                    existing.total_amount += item.total_price;
                }
                None => {
                    order.push(item.product_id.clone());
                    by_product.insert(
                        item.product_id.clone(),
                        ProductSoldSummary {
                            product_id: item.product_id.clone(),
                            product_name: item.product_name.clone(),
                            quantity: item.quantity,
                            unit_price: item.unit_price,
                            total_amount: item.total_price,
                        },
                    );
                }
            }
        }
    }

    let in_order: Vec<ProductSoldSummary> = order
        .iter()
        .filter_map(|id| by_product.remove(id))
        .collect();

    let mut by_quantity = in_order.clone();
    by_quantity.sort_by(|a, b| b.quantity.cmp(&a.quantity));
    by_quantity.truncate(TOP_PRODUCTS_LIMIT);
    summary.top_products = by_quantity;

    summary.products_sold = in_order;
    summary
        .products_sold
        .sort_by(|a, b| b.total_amount.cmp(&a.total_amount));
    summary.top_selling_items = summary.products_sold.iter().take(top_n).cloned().collect();
    summary
}

/// Persisted daily report; expires at the first instant of the following month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyReport {
    #[serde(flatten)]
    pub summary: DailySalesSummary,
    pub inventory: InventoryTotals,
    pub month: u32,
    pub year: i32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl DailyReport {
    pub fn new(summary: DailySalesSummary, inventory: InventoryTotals, created_at: DateTime<Utc>) -> Self {
        let date = summary.report_date;
        let (year, month) = if date.month() == 12 {
            (date.year() + 1, 1)
        } else {
            (date.year(), date.month() + 1)
        };
        let expires_at = Utc
            .with_ymd_and_hms(year, month, 1, 0, 0, 0)
            .single()
            .unwrap_or(created_at);

        Self {
            month: date.month(),
            year: date.year(),
            summary,
            inventory,
            created_at,
            expires_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sale::{DiscountType, SaleItem};
    use stockledger_core::SaleId;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn sale(id: &str, at: DateTime<Utc>, method: PaymentMethod, items: Vec<SaleItem>) -> Sale {
        let total: Decimal = items.iter().map(|i| i.total_price).sum();
        Sale {
            sale_id: SaleId::new(id),
            customer_name: None,
            mobile_number: None,
            items,
            subtotal: total,
            tax: dec("1"),
            tax_percentage: Decimal::ZERO,
            discount: dec("0.5"),
            discount_type: DiscountType::Fixed,
            total,
            payment_method: method,
            amount_received: None,
            change: None,
            created_at: at,
            updated_at: at,
        }
    }

    fn item(product: &str, qty: i64, price: &str) -> SaleItem {
        SaleItem::new(ProductId::new(product), product, qty, dec(price))
    }

    #[test]
    fn rolls_up_one_utc_day() {
        let date = NaiveDate::from_ymd_opt(2025, 5, 10).unwrap();
        let (start, end) = day_bounds(date);
        let sales = vec![
            sale("S1", start, PaymentMethod::Cash, vec![item("A", 2, "5"), item("B", 1, "30")]),
            sale("S2", end - Duration::seconds(1), PaymentMethod::Card, vec![item("A", 1, "6")]),
            sale("S3", end, PaymentMethod::Cash, vec![item("C", 100, "1")]),
        ];

        let summary = summarize(date, &sales, 10);

        assert_eq!(summary.total_sales, 2);
        assert_eq!(summary.cash_sales, 1);
        assert_eq!(summary.card_sales, 1);
        assert_eq!(summary.total_revenue, dec("46"));
        assert_eq!(summary.total_tax, dec("2"));
        assert_eq!(summary.total_discount, dec("1.0"));

        assert_eq!(summary.products_sold.len(), 2);
        assert_eq!(summary.products_sold[0].product_id.as_str(), "B");
        let a = &summary.products_sold[1];
        assert_eq!(a.quantity, 3);
        assert_eq!(a.unit_price, dec("5"));
        assert_eq!(a.total_amount, dec("16"));
    }

    #[test]
    fn top_selling_is_truncated() {
        let date = NaiveDate::from_ymd_opt(2025, 5, 10).unwrap();
        let (start, _) = day_bounds(date);
        let items: Vec<SaleItem> = (0..15).map(|i| item(&format!("P{i}"), 1, &format!("{}", i + 1))).collect();
        let summary = summarize(date, &[sale("S1", start, PaymentMethod::Cash, items)], 10);

        assert_eq!(summary.products_sold.len(), 15);
        assert_eq!(summary.top_selling_items.len(), 10);
        assert_eq!(summary.top_selling_items[0].product_id.as_str(), "P14");
    }

    #[test]
    fn payment_and_customer_breakdown() {
        let date = NaiveDate::from_ymd_opt(2025, 5, 10).unwrap();
        let (start, _) = day_bounds(date);
        let mut named = sale("S1", start, PaymentMethod::Transfer, vec![item("A", 2, "5")]);
        named.customer_name = Some("Amina".to_string());
        let mut blank = sale("S2", start, PaymentMethod::Transfer, vec![item("B", 3, "1")]);
        blank.customer_name = Some(String::new());
        let walk_in = sale("S3", start, PaymentMethod::Cash, vec![item("A", 1, "5"), item("C", 4, "2")]);

        let summary = summarize(date, &[named, blank, walk_in], 10);

        assert_eq!(summary.transfer_sales, 2);
        assert_eq!(summary.transfer_revenue, dec("13"));
        assert_eq!(summary.cash_sales, 1);
        assert_eq!(summary.card_sales, 0);
        assert_eq!(summary.sales_with_customer, 1);
        assert_eq!(summary.sales_without_customer, 2);
        assert_eq!(summary.total_items_sold, 10);
    }

    #[test]
    fn top_products_rank_by_quantity_not_revenue() {
        let date = NaiveDate::from_ymd_opt(2025, 5, 10).unwrap();
        let (start, _) = day_bounds(date);
        let mut items: Vec<SaleItem> = (0..12).map(|i| item(&format!("Q{i:02}"), i + 1, "1")).collect();
        items.push(item("PRICEY", 1, "500"));
        items.push(item("TIE", 12, "1"));

        let summary = summarize(date, &[sale("S1", start, PaymentMethod::Card, items)], 10);

        assert_eq!(summary.top_selling_items[0].product_id.as_str(), "PRICEY");
        assert_eq!(summary.top_products.len(), TOP_PRODUCTS_LIMIT);
        let ranked: Vec<_> = summary.top_products.iter().take(3).map(|p| p.product_id.as_str()).collect();
        // ties keep first-seen order
        assert_eq!(ranked, vec!["Q11", "TIE", "Q10"]);
        assert!(summary.top_products.iter().all(|p| p.product_id.as_str() != "PRICEY"));
    }

    #[test]
    fn inventory_totals_value_stock_at_cost() {
        let mut totals = InventoryTotals::default();
        totals.add(4, dec("2.50"));
        totals.add(10, dec("0.75"));

        assert_eq!(totals.total_stock_quantity, 14);
        assert_eq!(totals.total_inventory_cost, dec("17.50"));
    }

    #[test]
    fn december_report_expires_next_january() {
        let date = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        let created = Utc.with_ymd_and_hms(2025, 1, 1, 0, 5, 0).unwrap();
        let report = DailyReport::new(summarize(date, &[], 10), InventoryTotals::default(), created);

        assert_eq!(report.month, 12);
        assert_eq!(report.year, 2024);
        assert_eq!(report.expires_at, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
    }
}
