//! Single-symbol order book: bids and asks in price-time priority.
//!
//! Each price level holds entries ordered by (submission sequence, order id)
//! ascending, so the total order is deterministic even under equal
//! timestamps. Best bid is the highest price, best ask the lowest. The book
//! only holds non-crossing resting orders; crossing orders are consumed by
//! [`crate::matching`] before insertion.

use crate::types::{MemberId, Order, OrderId, RestingOrder, Side, Symbol, TimeEnforcement};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};

/// One resting order at a price level.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookEntry {
    pub order_id: OrderId,
    pub member_id: MemberId,
    pub remaining: Decimal,
    pub submitted_at: u64,
}

/// Price level -> queue of entries in (submitted_at, order_id) order.
type Levels = BTreeMap<Decimal, Vec<BookEntry>>;

/// Result of filling the front order on a side.
#[derive(Clone, Debug)]
pub struct FrontFill {
    pub order_id: OrderId,
    pub member_id: MemberId,
    /// The resting order's limit price (maker price).
    pub price: Decimal,
    pub quantity: Decimal,
    /// True if the resting order was fully consumed (removed from book).
    pub fully_filled: bool,
}

/// Single-symbol order book.
#[derive(Debug)]
pub struct OrderBook {
    symbol: Symbol,
    bids: Levels,
    asks: Levels,
    /// Order id -> (side, price) for cancel lookup.
    index: HashMap<OrderId, (Side, Decimal)>,
}

impl OrderBook {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            index: HashMap::new(),
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Insert a resting order. Precondition: the order does not cross the
    /// opposite side's best price; the matching loop consumes crossing
    /// quantity first.
    pub fn insert(&mut self, order: &Order) {
        let entry = BookEntry {
            order_id: order.order_id,
            member_id: order.member_id,
            remaining: order.remaining_quantity,
            submitted_at: order.submitted_at,
        };
        let levels = match order.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let queue = levels.entry(order.limit_price).or_default();
        // Serialized submission means push order is already time order; the
        // binary search keeps the total order deterministic regardless.
        let key = (entry.submitted_at, entry.order_id);
        let pos = queue
            .binary_search_by_key(&key, |e| (e.submitted_at, e.order_id))
            .unwrap_or_else(|p| p);
        queue.insert(pos, entry);
        self.index.insert(order.order_id, (order.side, order.limit_price));
    }

    /// Remove a resting order by id. Returns the removed entry, or None if
    /// the order is not resting (already filled, cancelled, or never rested).
    pub fn remove(&mut self, order_id: OrderId) -> Option<BookEntry> {
        let (side, price) = self.index.remove(&order_id)?;
        let levels = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let queue = levels.get_mut(&price)?;
        let pos = queue.iter().position(|e| e.order_id == order_id)?;
        let entry = queue.remove(pos);
        if queue.is_empty() {
            levels.remove(&price);
        }
        Some(entry)
    }

    /// Top-priority resting entry on a side, with its price.
    pub fn front(&self, side: Side) -> Option<(Decimal, &BookEntry)> {
        let level = match side {
            Side::Buy => self.bids.iter().next_back(),
            Side::Sell => self.asks.iter().next(),
        };
        level.and_then(|(price, queue)| queue.first().map(|e| (*price, e)))
    }

    /// Remove and return the top-priority entry on a side.
    pub fn pop_front(&mut self, side: Side) -> Option<(Decimal, BookEntry)> {
        let levels = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let price = match side {
            Side::Buy => *levels.keys().next_back()?,
            Side::Sell => *levels.keys().next()?,
        };
        let queue = levels.get_mut(&price)?;
        let entry = queue.remove(0);
        if queue.is_empty() {
            levels.remove(&price);
        }
        self.index.remove(&entry.order_id);
        Some((price, entry))
    }

    /// Fill up to `quantity` against the front entry on `side` at its own
    /// price. Decrements the entry, popping it once exhausted. None if the
    /// side is empty.
    pub fn fill_front(&mut self, side: Side, quantity: Decimal) -> Option<FrontFill> {
        let (price, front) = self.front(side)?;
        let fill_qty = quantity.min(front.remaining);
        if front.remaining <= fill_qty {
            let (price, entry) = self.pop_front(side)?;
            return Some(FrontFill {
                order_id: entry.order_id,
                member_id: entry.member_id,
                price,
                quantity: entry.remaining,
                fully_filled: true,
            });
        }
        let levels = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let entry = levels
            .get_mut(&price)
            .and_then(|q| q.first_mut())
            .expect("front entry exists");
        entry.remaining -= fill_qty;
        Some(FrontFill {
            order_id: entry.order_id,
            member_id: entry.member_id,
            price,
            quantity: fill_qty,
            fully_filled: false,
        })
    }

    /// Best bid price (None if empty).
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next_back().copied()
    }

    /// Best ask price (None if empty).
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().copied()
    }

    /// Total ask quantity at or below the given price. For the FOK
    /// all-or-nothing precheck.
    pub fn available_ask_qty_at_or_below(&self, price_limit: Decimal) -> Decimal {
        let mut total = Decimal::ZERO;
        for (&price, queue) in self.asks.iter() {
            if price > price_limit {
                break;
            }
            for entry in queue {
                total += entry.remaining;
            }
        }
        total
    }

    /// Total bid quantity at or above the given price. For the FOK
    /// all-or-nothing precheck.
    pub fn available_bid_qty_at_or_above(&self, price_limit: Decimal) -> Decimal {
        let mut total = Decimal::ZERO;
        for (_, queue) in self.bids.range(price_limit..) {
            for entry in queue {
                total += entry.remaining;
            }
        }
        total
    }

    /// Invariant check: resting sides must never cross once the engine has
    /// finished processing.
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid >= ask,
            _ => false,
        }
    }

    /// Export resting entries for persistence. Original quantities are not
    /// tracked by the book; the caller (engine) fills them from its order
    /// records.
    pub fn resting_entries(&self) -> Vec<(Side, Decimal, BookEntry)> {
        let mut out = Vec::new();
        for (price, queue) in &self.bids {
            for entry in queue {
                out.push((Side::Buy, *price, entry.clone()));
            }
        }
        for (price, queue) in &self.asks {
            for entry in queue {
                out.push((Side::Sell, *price, entry.clone()));
            }
        }
        out
    }

    /// Restore resting orders after load from persistence. Clears the book
    /// first. Each order must be for this book's symbol.
    pub fn load_resting_orders(&mut self, orders: &[RestingOrder]) -> Result<(), crate::error::ExchangeError> {
        self.bids.clear();
        self.asks.clear();
        self.index.clear();
        for r in orders {
            if r.symbol != self.symbol {
                return Err(crate::error::ExchangeError::UnknownSymbol(r.symbol.clone()));
            }
            let order = Order {
                order_id: r.order_id,
                member_id: r.member_id,
                symbol: r.symbol.clone(),
                side: r.side,
                kind: crate::types::OrderKind::Limit,
                quantity: r.quantity,
                remaining_quantity: r.remaining_quantity,
                limit_price: r.limit_price,
                time_enforcement: r.time_enforcement,
                status: crate::types::OrderStatus::Open,
                submitted_at: r.submitted_at,
            };
            self.insert(&order);
        }
        Ok(())
    }
}

/// Helper shared by snapshot paths: resting entry back to full record.
pub fn resting_order_from_entry(
    symbol: &Symbol,
    side: Side,
    price: Decimal,
    entry: &BookEntry,
    original_quantity: Decimal,
    time_enforcement: TimeEnforcement,
) -> RestingOrder {
    RestingOrder {
        order_id: entry.order_id,
        member_id: entry.member_id,
        symbol: symbol.clone(),
        side,
        limit_price: price,
        quantity: original_quantity,
        remaining_quantity: entry.remaining,
        time_enforcement,
        submitted_at: entry.submitted_at,
    }
}
