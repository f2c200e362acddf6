//! Order-book client (`/book?token_id=`).

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use herald_core::{
    BookSide, Clock, HeraldError, HeraldResult, NotableWall, OrderBookConfig, OrderBookLevel,
    OrderBookSnapshot,
};
use serde_json::Value;

use super::{as_f64, field};
use crate::{ResilientExecutor, TtlCache};

const PROVIDER: &str = "order_book";

/// Order-book snapshot client. Responses are cached for seconds.
#[derive(Clone)]
pub struct OrderBookClient {
    executor: Arc<ResilientExecutor>,
    cache: TtlCache<OrderBookSnapshot>,
    ttl: Duration,
    config: OrderBookConfig,
    clock: Arc<dyn Clock>,
}

impl OrderBookClient {
    pub fn new(
        executor: Arc<ResilientExecutor>,
        cache: TtlCache<OrderBookSnapshot>,
        ttl: Duration,
        config: OrderBookConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            executor,
            cache,
            ttl,
            config,
            clock,
        }
    }

    pub async fn fetch(&self, token_id: &str) -> HeraldResult<OrderBookSnapshot> {
        let token_id = token_id.trim().to_string();
        if token_id.is_empty() {
            return Err(HeraldError::invalid_input("token id is empty"));
        }
        let key = format!("book:{}", token_id);
        let executor = Arc::clone(&self.executor);
        let config = self.config.clone();
        let clock = Arc::clone(&self.clock);

        let read = self
            .cache
            .get_or_set(&key, self.ttl, move || async move {
                let request = executor.request("/book").query("token_id", token_id.as_str());
                let payload = executor.fetch_json(request).await?;
                parse_order_book(&token_id, &payload, &config, clock.now_ms())
            })
            .await?;
        Ok(read.value)
    }
}

impl std::fmt::Debug for OrderBookClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderBookClient")
            .field("executor", &self.executor)
            .field("ttl", &self.ttl)
            .field("config", &self.config)
            .finish()
    }
}

fn parse_level(raw: &Value) -> Option<OrderBookLevel> {
    let (price, size) = match raw {
        Value::Array(pair) if pair.len() >= 2 => (as_f64(&pair[0])?, as_f64(&pair[1])?),
        Value::Object(_) => (
            field(raw, &["price", "p"]).and_then(as_f64)?,
            field(raw, &["size", "s", "quantity"]).and_then(as_f64)?,
        ),
        _ => return None,
    };
    (price >= 0.0 && size > 0.0).then_some(OrderBookLevel { price, size })
}

fn parse_side(payload: &Value, name: &str) -> HeraldResult<Vec<OrderBookLevel>> {
    match payload.get(name) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(levels)) => Ok(levels.iter().filter_map(parse_level).collect()),
        Some(_) => Err(HeraldError::payload(PROVIDER, format!("'{}' is not a list", name))),
    }
}

/// Map a raw book into a snapshot: bids descending, asks ascending, each
/// truncated to `config.depth`.
pub fn parse_order_book(
    token_id: &str,
    payload: &Value,
    config: &OrderBookConfig,
    fetched_at_ms: i64,
) -> HeraldResult<OrderBookSnapshot> {
    if !payload.is_object() {
        return Err(HeraldError::payload(PROVIDER, "book is not an object"));
    }

    let mut bids = parse_side(payload, "bids")?;
    let mut asks = parse_side(payload, "asks")?;
    bids.sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap_or(Ordering::Equal));
    asks.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(Ordering::Equal));
    bids.truncate(config.depth);
    asks.truncate(config.depth);

    let best_bid = bids.first().map(|l| l.price);
    let best_ask = asks.first().map(|l| l.price);
    let (spread, midpoint) = match (best_bid, best_ask) {
        (Some(bid), Some(ask)) => (Some(ask - bid), Some((ask + bid) / 2.0)),
        _ => (None, None),
    };
    let walls = detect_walls(&bids, &asks, config.wall_multiple);

    Ok(OrderBookSnapshot {
        token_id: token_id.to_string(),
        bid_depth: bids.iter().map(|l| l.size).sum(),
        ask_depth: asks.iter().map(|l| l.size).sum(),
        bids,
        asks,
        best_bid,
        best_ask,
        spread,
        midpoint,
        walls,
        fetched_at_ms,
    })
}

/// Levels whose size exceeds `multiple` times the mean level size across
/// both sides.
pub fn detect_walls(
    bids: &[OrderBookLevel],
    asks: &[OrderBookLevel],
    multiple: f64,
) -> Vec<NotableWall> {
    let count = bids.len() + asks.len();
    if count == 0 {
        return Vec::new();
    }
    let mean = bids.iter().chain(asks).map(|l| l.size).sum::<f64>() / count as f64;
    if mean <= 0.0 {
        return Vec::new();
    }

    let side = |levels: &[OrderBookLevel], side: BookSide| -> Vec<NotableWall> {
        levels
            .iter()
            .filter(|l| l.size > multiple * mean)
            .map(|l| NotableWall {
                side,
                price: l.price,
                size: l.size,
                multiple: l.size / mean,
            })
            .collect()
    };

    let mut walls = side(bids, BookSide::Bid);
    walls.extend(side(asks, BookSide::Ask));
    walls
}
