//! Upstream provider clients
//!
//! Each client composes a [`TtlCache`](crate::TtlCache), a
//! [`ResilientExecutor`](crate::ResilientExecutor) and a pure mapping from
//! the upstream payload to a core value type. The search client also owns a
//! share of the search [`TokenBucket`](crate::TokenBucket).

pub mod market;
pub mod order_book;
pub mod price_history;
pub mod search;

pub use market::{order_outcomes, parse_event, select_market, MarketClient};
pub use order_book::{detect_walls, parse_order_book, OrderBookClient};
pub use price_history::{normalize_timestamp_ms, resample, PriceHistoryClient};
pub use search::{map_search_results, SearchClient, SearchResponse, SearchSuite};

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

// ============================================================================
// PAYLOAD HELPERS
// ============================================================================

/// Number, or a string holding one.
pub(crate) fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

/// Non-empty string, or a number rendered as one.
pub(crate) fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// List of strings given either as a JSON array or as a string containing
/// a JSON-encoded array.
pub(crate) fn string_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Array(items) => items.iter().map(as_string).collect(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(inner @ Value::Array(_)) => string_list(&inner),
            _ => None,
        },
        _ => None,
    }
}

/// First field present among `names`.
pub(crate) fn field<'a>(value: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| value.get(*name))
        .find(|v| !v.is_null())
}

/// RFC 3339 timestamp or bare `YYYY-MM-DD` date.
pub(crate) fn parse_datetime(value: &Value) -> Option<DateTime<Utc>> {
    let s = value.as_str()?.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_list_accepts_both_encodings() {
        assert_eq!(
            string_list(&json!(["Yes", "No"])),
            Some(vec!["Yes".to_string(), "No".to_string()])
        );
        assert_eq!(
            string_list(&json!("[\"1\", 2]")),
            Some(vec!["1".to_string(), "2".to_string()])
        );
        assert_eq!(string_list(&json!("Yes,No")), None);
        assert_eq!(string_list(&json!(["Yes", null])), None);
    }

    #[test]
    fn test_as_f64() {
        assert_eq!(as_f64(&json!("0.25")), Some(0.25));
        assert_eq!(as_f64(&json!(3)), Some(3.0));
        assert_eq!(as_f64(&json!("NaN")), None);
        assert_eq!(as_f64(&json!(null)), None);
    }

    #[test]
    fn test_parse_datetime() {
        assert!(parse_datetime(&json!("2026-03-19T18:00:00Z")).is_some());
        assert_eq!(
            parse_datetime(&json!("2026-03-19")).map(|d| d.timestamp()),
            Some(1_773_878_400)
        );
        assert!(parse_datetime(&json!("3 hours ago")).is_none());
    }
}
