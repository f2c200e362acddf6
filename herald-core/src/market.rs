//! Provider snapshot value types
//!
//! Immutable values returned by the market-metadata, order-book and
//! price-history clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// MARKET METADATA
// ============================================================================

/// One tradable outcome of a market and its order-book token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeToken {
    /// Outcome label ("Yes", "No", candidate name, ...)
    pub outcome: String,
    /// Order-book token identifier
    pub token_id: String,
    /// Last quoted price in [0, 1], when the payload carried one
    pub price: Option<f64>,
}

/// Normalized metadata for an event and its primary market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketMetadata {
    pub event_id: String,
    pub event_slug: String,
    pub event_title: String,
    pub market_id: String,
    pub market_slug: Option<String>,
    pub question: String,
    /// Free-text resolution rules as published by the venue
    pub resolution_rules: Option<String>,
    pub end_date: Option<DateTime<Utc>>,
    pub volume: f64,
    pub liquidity: Option<f64>,
    pub closed: bool,
    /// Outcomes with the affirmative ("Yes") outcome first when present
    pub outcomes: Vec<OutcomeToken>,
    /// Number of markets listed under the event
    pub market_count: usize,
}

impl MarketMetadata {
    /// Token whose book and history describe the event.
    pub fn primary_token(&self) -> Option<&OutcomeToken> {
        self.outcomes.first()
    }

    /// Implied probability of the primary outcome.
    pub fn implied_probability(&self) -> Option<f64> {
        self.primary_token().and_then(|t| t.price)
    }
}

// ============================================================================
// ORDER BOOK
// ============================================================================

/// Side of the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookSide {
    Bid,
    Ask,
}

/// Aggregated price level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderBookLevel {
    pub price: f64,
    pub size: f64,
}

/// A level whose size dwarfs the average level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NotableWall {
    pub side: BookSide,
    pub price: f64,
    pub size: f64,
    /// Size divided by the mean level size
    pub multiple: f64,
}

/// Typed order-book snapshot.
///
/// Bids are sorted by descending price, asks by ascending price. `spread`
/// and `midpoint` are only present when both sides have liquidity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub token_id: String,
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub spread: Option<f64>,
    pub midpoint: Option<f64>,
    pub bid_depth: f64,
    pub ask_depth: f64,
    pub walls: Vec<NotableWall>,
    pub fetched_at_ms: i64,
}

// ============================================================================
// PRICE HISTORY
// ============================================================================

/// Single resampled price observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Bucket start, milliseconds since epoch
    pub ts_ms: i64,
    pub price: f64,
}

/// Aggregates over a resampled series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceSummary {
    pub first: f64,
    pub last: f64,
    pub high: f64,
    pub low: f64,
    pub change: f64,
}

/// Price series resampled to a fixed interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    pub token_id: String,
    pub interval_secs: i64,
    pub points: Vec<PricePoint>,
    pub summary: Option<PriceSummary>,
}

impl PriceSummary {
    /// Summarize points in chronological order. `None` for an empty series.
    pub fn from_points(points: &[PricePoint]) -> Option<Self> {
        let first = points.first()?.price;
        let last = points.last()?.price;
        let (high, low) = points.iter().fold((f64::MIN, f64::MAX), |(hi, lo), p| {
            (hi.max(p.price), lo.min(p.price))
        });
        Some(Self {
            first,
            last,
            high,
            low,
            change: last - first,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_summary_empty() {
        assert!(PriceSummary::from_points(&[]).is_none());
    }

    #[test]
    fn test_price_summary_values() {
        let points = vec![
            PricePoint { ts_ms: 0, price: 0.40 },
            PricePoint { ts_ms: 1, price: 0.55 },
            PricePoint { ts_ms: 2, price: 0.35 },
            PricePoint { ts_ms: 3, price: 0.50 },
        ];
        let s = PriceSummary::from_points(&points).unwrap();
        assert_eq!(s.first, 0.40);
        assert_eq!(s.last, 0.50);
        assert_eq!(s.high, 0.55);
        assert_eq!(s.low, 0.35);
        assert!((s.change - 0.10).abs() < 1e-9);
    }

    #[test]
    fn test_primary_token_is_first_outcome() {
        let meta = MarketMetadata {
            event_id: "1".into(),
            event_slug: "e".into(),
            event_title: "E".into(),
            market_id: "m".into(),
            market_slug: None,
            question: "Q?".into(),
            resolution_rules: None,
            end_date: None,
            volume: 0.0,
            liquidity: None,
            closed: false,
            outcomes: vec![
                OutcomeToken { outcome: "Yes".into(), token_id: "t1".into(), price: Some(0.6) },
                OutcomeToken { outcome: "No".into(), token_id: "t2".into(), price: Some(0.4) },
            ],
            market_count: 1,
        };
        assert_eq!(meta.primary_token().map(|t| t.token_id.as_str()), Some("t1"));
        assert_eq!(meta.implied_probability(), Some(0.6));
    }
}
