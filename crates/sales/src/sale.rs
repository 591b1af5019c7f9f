use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, ProductId, SaleId};

/// Payment method of a committed sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
}

/// How `discount` is interpreted. Anything other than `percentage` is a fixed
/// amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    Percentage,
    #[default]
    #[serde(other)]
    Fixed,
}

/// One line of a committed sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

impl SaleItem {
    pub fn new(
        product_id: ProductId,
        product_name: impl Into<String>,
        quantity: i64,
        unit_price: Decimal,
    ) -> Self {
        Self {
            product_id,
            product_name: product_name.into(),
            quantity,
            unit_price,
            total_price: unit_price * Decimal::from(quantity),
        }
    }
}

/// Derived money totals of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSummary {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
}

impl OrderSummary {
    /// `total = subtotal + tax - discount`, with tax applied only for a positive
    /// percentage.
    pub fn calculate(
        items: &[SaleItem],
        tax_percentage: Decimal,
        discount: Decimal,
        discount_type: DiscountType,
    ) -> DomainResult<Self> {
        if items.is_empty() {
            return Err(DomainError::invalid_argument("at least one item is required"));
        }

        let hundred = Decimal::ONE_HUNDRED;
        let subtotal: Decimal = items.iter().map(|i| i.total_price).sum();
        let tax = if tax_percentage > Decimal::ZERO {
            subtotal * tax_percentage / hundred
        } else {
            Decimal::ZERO
        };
        let discount = match discount_type {
            DiscountType::Percentage => subtotal * discount / hundred,
            DiscountType::Fixed => discount,
        };

        Ok(Self {
            subtotal,
            tax,
            discount,
            total: subtotal + tax - discount,
        })
    }
}

/// Change owed to the customer; fails when the amount received does not cover
/// the total.
pub fn calculate_change(total: Decimal, amount_received: Decimal) -> DomainResult<Decimal> {
    if amount_received < total {
        return Err(DomainError::invalid_argument(format!(
            "amount received {amount_received} is less than total {total}"
        )));
    }
    Ok(amount_received - total)
}

/// Line of a sale request; the line total is derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSaleItem {
    pub product_id: ProductId,
    #[serde(default)]
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: Decimal,
}

/// Command: record a sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSale {
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub mobile_number: Option<String>,
    pub items: Vec<NewSaleItem>,
    #[serde(default)]
    pub tax_percentage: Decimal,
    #[serde(default)]
    pub discount: Decimal,
    #[serde(default)]
    pub discount_type: DiscountType,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub amount_received: Option<Decimal>,
    #[serde(default = "Utc::now", skip_serializing)]
    pub occurred_at: DateTime<Utc>,
}

/// A committed sale (historical record; never re-read by the ledger).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sale {
    pub sale_id: SaleId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile_number: Option<String>,
    pub items: Vec<SaleItem>,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub tax_percentage: Decimal,
    pub discount: Decimal,
    pub discount_type: DiscountType,
    pub total: Decimal,
    pub payment_method: PaymentMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_received: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<Decimal>,
    #[serde(rename = "created_at")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updated_at")]
    pub updated_at: DateTime<Utc>,
}

impl Sale {
    /// A non-empty customer name was given.
    pub fn has_customer(&self) -> bool {
        self.customer_name.as_deref().is_some_and(|name| !name.is_empty())
    }

    /// Validate a request and derive line totals, summary and change.
    pub fn from_request(sale_id: SaleId, req: &NewSale) -> DomainResult<Self> {
        for item in &req.items {
            if item.product_id.is_empty() {
                return Err(DomainError::invalid_argument("sale item is missing productId"));
            }
            if item.quantity <= 0 {
                return Err(DomainError::invalid_argument(format!(
                    "quantity for product {} must be positive, got {}",
                    item.product_id, item.quantity
                )));
            }
            if item.unit_price.is_sign_negative() {
                return Err(DomainError::invalid_argument(format!(
                    "unit price for product {} cannot be negative",
                    item.product_id
                )));
            }
        }

        let items: Vec<SaleItem> = req
            .items
            .iter()
            .map(|i| SaleItem::new(i.product_id.clone(), i.product_name.clone(), i.quantity, i.unit_price))
            .collect();
        let summary =
            OrderSummary::calculate(&items, req.tax_percentage, req.discount, req.discount_type)?;

        let change = req
            .amount_received
            .map(|received| calculate_change(summary.total, received))
            .transpose()?;

        Ok(Self {
            sale_id,
            customer_name: req.customer_name.clone(),
            mobile_number: req.mobile_number.clone(),
            items,
            subtotal: summary.subtotal,
            tax: summary.tax,
            tax_percentage: req.tax_percentage,
            discount: summary.discount,
            discount_type: req.discount_type,
            total: summary.total,
            payment_method: req.payment_method,
            amount_received: req.amount_received,
            change,
            created_at: req.occurred_at,
            updated_at: req.occurred_at,
        })
    }
}
