use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::BatchId;

/// One receipt lot of a product: its own quantity, expiry and price pair.
///
/// A batch never persists with `stock_qty == 0`; the ledger prunes it instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub batch_id: BatchId,
    pub stock_qty: i64,
    #[serde(rename = "expiry_date", default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<DateTime<Utc>>,
    pub cost_price: Decimal,
    pub selling_price: Decimal,
    #[serde(rename = "created_at")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updated_at")]
    pub updated_at: DateTime<Utc>,
}

impl Batch {
    pub fn new(
        batch_id: BatchId,
        stock_qty: i64,
        expiry_date: Option<DateTime<Utc>>,
        cost_price: Decimal,
        selling_price: Decimal,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            batch_id,
            stock_qty,
            expiry_date,
            cost_price,
            selling_price,
            created_at: at,
            updated_at: at,
        }
    }

    /// True when this batch receives stock for `expiry_date` under the
    /// match-or-create policy.
    pub fn matches_expiry(&self, expiry_date: Option<DateTime<Utc>>) -> bool {
        same_expiry_day(self.expiry_date, expiry_date)
    }

    pub fn is_empty(&self) -> bool {
        self.stock_qty <= 0
    }
}

/// Expiry equality at calendar-day granularity (UTC). Two absent dates match.
pub fn same_expiry_day(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.date_naive() == b.date_naive(),
        _ => false,
    }
}
