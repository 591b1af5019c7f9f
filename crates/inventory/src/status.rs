//! Stock status classification.
//!
//! The same three bands drive row rendering, status counts and the
//! status-filtered listing.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use stockledger_core::DomainError;

const LOW_BELOW: i64 = 10;
const GOOD_FROM: i64 = 25;

/// Computed stock status. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StockStatus {
    Low,
    Average,
    Good,
}

impl StockStatus {
    /// `q < 10` is Low, `10 <= q < 25` is Average, `q >= 25` is Good.
    pub fn classify(quantity: i64) -> Self {
        if quantity < LOW_BELOW {
            StockStatus::Low
        } else if quantity < GOOD_FROM {
            StockStatus::Average
        } else {
            StockStatus::Good
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::Low => "Low",
            StockStatus::Average => "Average",
            StockStatus::Good => "Good",
        }
    }

    /// Integer quantity band for this status.
    pub fn range(&self) -> QuantityRange {
        match self {
            StockStatus::Low => QuantityRange::between(0, LOW_BELOW - 1),
            StockStatus::Average => QuantityRange::between(LOW_BELOW, GOOD_FROM - 1),
            StockStatus::Good => QuantityRange::at_least(GOOD_FROM),
        }
    }
}

impl core::fmt::Display for StockStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive quantity range; `max == None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityRange {
    pub min: i64,
    pub max: Option<i64>,
}

impl QuantityRange {
    pub fn between(min: i64, max: i64) -> Self {
        Self { min, max: Some(max) }
    }

    pub fn at_least(min: i64) -> Self {
        Self { min, max: None }
    }

    pub fn contains(&self, quantity: i64) -> bool {
        quantity >= self.min && self.max.is_none_or(|max| quantity <= max)
    }
}

/// Status query parameter of the filtered stock listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusFilter(StockStatus);

impl StatusFilter {
    /// Accepts exactly `low`, `average` or `good`.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        raw.parse()
    }

    pub fn status(&self) -> StockStatus {
        self.0
    }

    pub fn range(&self) -> QuantityRange {
        self.0.range()
    }
}

impl FromStr for StatusFilter {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self(StockStatus::Low)),
            "average" => Ok(Self(StockStatus::Average)),
            "good" => Ok(Self(StockStatus::Good)),
            other => Err(DomainError::invalid_argument(format!(
                "invalid status filter '{other}': must be one of low, average, good"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifier_band_edges() {
        assert_eq!(StockStatus::classify(0), StockStatus::Low);
        assert_eq!(StockStatus::classify(9), StockStatus::Low);
        assert_eq!(StockStatus::classify(10), StockStatus::Average);
        assert_eq!(StockStatus::classify(24), StockStatus::Average);
        assert_eq!(StockStatus::classify(25), StockStatus::Good);
    }

    #[test]
    fn status_filter_maps_to_ranges() {
        assert_eq!(StatusFilter::parse("low").unwrap().range(), QuantityRange::between(0, 9));
        assert_eq!(StatusFilter::parse("average").unwrap().range(), QuantityRange::between(10, 24));
        assert_eq!(StatusFilter::parse("good").unwrap().range(), QuantityRange::at_least(25));
    }

    #[test]
    fn status_filter_rejects_unknown_values() {
        for raw in ["", "Low", "LOW", "critical", " good"] {
            assert!(
                matches!(StatusFilter::parse(raw), Err(DomainError::InvalidArgument(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn ranges_agree_with_classifier() {
        for q in 0..100 {
            let status = StockStatus::classify(q);
            assert!(status.range().contains(q));
        }
    }
}
