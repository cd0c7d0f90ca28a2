//! Per-symbol matching engine: book, matching, and settlement in one place.
//!
//! Owns the order book and the live-order records for one instrument, runs
//! [`crate::matching::match_order`] on each submission, and settles every
//! resulting trade through the shared [`SettlementLedger`]. All calls for a
//! given symbol are serialized by the gateway's worker task, so the engine
//! itself needs no locking.
//!
//! A fatal error (missing reservation, crossed book at rest) halts the
//! engine permanently: the invariant violation indicates a bug in the
//! matching algorithm, and continuing would corrupt balances.

use crate::error::ExchangeError;
use crate::execution::{OrderPart, OrderUpdate, Trade};
use crate::ledger::SettlementLedger;
use crate::matching::match_order;
use crate::order_book::{resting_order_from_entry, OrderBook};
use crate::types::{
    Order, OrderId, OrderStatus, PartId, ReservationId, RestingOrder, Side, Symbol,
};
use log::{error, info};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

/// A live (non-terminal) order plus its escrow reservation.
#[derive(Clone, Debug)]
struct TrackedOrder {
    order: Order,
    reservation: ReservationId,
}

/// Result of processing one submission.
#[derive(Clone, Debug, Default)]
pub struct SubmitOutcome {
    /// Status transitions to deliver, in the order they occurred
    /// (maker transitions per fill, then the incoming order's).
    pub updates: Vec<OrderUpdate>,
    pub trades: Vec<Trade>,
}

/// Result of processing a cancel request.
#[derive(Clone, Debug)]
pub enum CancelOutcome {
    /// The order was resting; escrow released, Cancelled update to deliver.
    Cancelled(OrderUpdate),
    /// The order is not resting here: already filled, already cancelled, or
    /// never known. A fill that beat the cancel has already been delivered.
    NotResting,
}

/// Engine state for persistence.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct EngineSnapshot {
    pub symbol: Symbol,
    pub resting_orders: Vec<RestingOrder>,
    pub next_trade_id: u64,
    pub next_part_id: u64,
}

/// Single-symbol matching engine with settlement.
pub struct MatchingEngine {
    symbol: Symbol,
    book: OrderBook,
    ledger: Arc<SettlementLedger>,
    live: HashMap<OrderId, TrackedOrder>,
    next_trade_id: u64,
    next_part_id: u64,
    halted: bool,
}

impl MatchingEngine {
    pub fn new(symbol: Symbol, ledger: Arc<SettlementLedger>) -> Self {
        Self {
            book: OrderBook::new(symbol.clone()),
            symbol,
            ledger,
            live: HashMap::new(),
            next_trade_id: 1,
            next_part_id: 1,
            halted: false,
        }
    }

    /// Rebuild an engine from a snapshot. Escrow for each resting order is
    /// re-reserved against the ledger (the snapshot's accounts must have had
    /// their reserved balances folded back, see [`SettlementLedger::restore`]).
    pub fn from_snapshot(
        snapshot: &EngineSnapshot,
        ledger: Arc<SettlementLedger>,
    ) -> Result<Self, ExchangeError> {
        let mut engine = Self::new(snapshot.symbol.clone(), ledger);
        engine.next_trade_id = snapshot.next_trade_id;
        engine.next_part_id = snapshot.next_part_id;
        engine.book.load_resting_orders(&snapshot.resting_orders)?;
        for resting in &snapshot.resting_orders {
            let reservation = match resting.side {
                Side::Buy => engine.ledger.reserve_cash(
                    resting.member_id,
                    resting.remaining_quantity,
                    resting.limit_price,
                )?,
                Side::Sell => engine.ledger.reserve_shares(
                    resting.member_id,
                    &resting.symbol,
                    resting.remaining_quantity,
                )?,
            };
            let status = if resting.remaining_quantity < resting.quantity {
                OrderStatus::PartiallyFilled
            } else {
                OrderStatus::Open
            };
            let order = Order {
                order_id: resting.order_id,
                member_id: resting.member_id,
                symbol: resting.symbol.clone(),
                side: resting.side,
                kind: crate::types::OrderKind::Limit,
                quantity: resting.quantity,
                remaining_quantity: resting.remaining_quantity,
                limit_price: resting.limit_price,
                time_enforcement: resting.time_enforcement,
                status,
                submitted_at: resting.submitted_at,
            };
            engine.live.insert(order.order_id, TrackedOrder { order, reservation });
        }
        Ok(engine)
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.book.best_bid()
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.book.best_ask()
    }

    /// Process one submission: match, settle, and report transitions.
    ///
    /// The order must already hold a reservation covering its full quantity
    /// (cash for buys, shares for sells) taken by the gateway at acceptance.
    /// Fatal errors halt the engine before returning.
    pub fn submit(
        &mut self,
        order: Order,
        reservation: ReservationId,
    ) -> Result<SubmitOutcome, ExchangeError> {
        if self.halted {
            return Err(ExchangeError::Halted(self.symbol.clone()));
        }
        info!(
            "order submitted order_id={} member={} side={:?} quantity={} limit={}",
            order.order_id.0, order.member_id.0, order.side, order.quantity, order.limit_price
        );
        match self.run_submit(order, reservation) {
            Ok(outcome) => {
                for update in &outcome.updates {
                    info!(
                        "order_update order_id={} status={:?} filled={} remaining={}",
                        update.order_id.0,
                        update.status,
                        update.filled_quantity,
                        update.remaining_quantity
                    );
                }
                for trade in &outcome.trades {
                    info!(
                        "trade trade_id={} buy_order={} sell_order={} price={} quantity={}",
                        trade.trade_id.0,
                        trade.buy_order_id.0,
                        trade.sell_order_id.0,
                        trade.price,
                        trade.quantity
                    );
                }
                Ok(outcome)
            }
            Err(e) => {
                if e.is_fatal() {
                    self.halt(&e);
                }
                Err(e)
            }
        }
    }

    fn run_submit(
        &mut self,
        mut order: Order,
        reservation: ReservationId,
    ) -> Result<SubmitOutcome, ExchangeError> {
        let executed_at = order.submitted_at;
        let result = match_order(&mut self.book, &mut order, self.next_trade_id, executed_at);
        self.next_trade_id += result.trades.len() as u64;

        let mut outcome = SubmitOutcome::default();
        let mut aggressor_parts = Vec::with_capacity(result.trades.len());

        for (trade, maker_fill) in result.trades.iter().zip(result.maker_fills.iter()) {
            let maker = self
                .live
                .get_mut(&maker_fill.order_id)
                .ok_or(ExchangeError::UntrackedRestingOrder(maker_fill.order_id))?;
            let (buy_reservation, sell_reservation) = match order.side {
                Side::Buy => (reservation, maker.reservation),
                Side::Sell => (maker.reservation, reservation),
            };
            self.ledger.apply_trade(trade, buy_reservation, sell_reservation)?;

            maker.order.remaining_quantity -= trade.quantity;
            maker.order.status = if maker_fill.fully_filled {
                OrderStatus::Filled
            } else {
                OrderStatus::PartiallyFilled
            };
            let maker_part = OrderPart {
                part_id: PartId(self.next_part_id),
                price: trade.price,
                quantity: trade.quantity,
                executed_at,
            };
            self.next_part_id += 1;
            let maker_order = &maker.order;
            outcome.updates.push(OrderUpdate {
                order_id: maker_order.order_id,
                member_id: maker_order.member_id,
                status: maker_order.status,
                filled_quantity: maker_order.filled_quantity(),
                remaining_quantity: maker_order.remaining_quantity,
                avg_price: OrderUpdate::avg_price_of(std::slice::from_ref(&maker_part)),
                parts: vec![maker_part],
            });
            if maker_order.is_terminal() {
                self.live.remove(&maker_fill.order_id);
            }
            aggressor_parts.push(OrderPart {
                part_id: PartId(self.next_part_id),
                price: trade.price,
                quantity: trade.quantity,
                executed_at,
            });
            self.next_part_id += 1;
        }
        outcome.trades = result.trades;

        // IOC/FOK remainder: the unfilled part of the escrow goes back.
        if order.status == OrderStatus::Cancelled && order.remaining_quantity > Decimal::ZERO {
            self.ledger.release(reservation)?;
        }

        let avg_price = OrderUpdate::avg_price_of(&aggressor_parts);
        outcome.updates.push(OrderUpdate {
            order_id: order.order_id,
            member_id: order.member_id,
            status: order.status,
            parts: aggressor_parts,
            filled_quantity: order.filled_quantity(),
            remaining_quantity: order.remaining_quantity,
            avg_price,
        });

        if result.rested {
            self.live.insert(order.order_id, TrackedOrder { order, reservation });
        }

        if self.book.is_crossed() {
            return Err(ExchangeError::CrossedBook(self.symbol.clone()));
        }
        Ok(outcome)
    }

    /// Process a cancel request. Resolves the race against in-flight fills
    /// deterministically: whichever the worker processed first wins.
    pub fn cancel(&mut self, order_id: OrderId) -> Result<CancelOutcome, ExchangeError> {
        if self.halted {
            return Err(ExchangeError::Halted(self.symbol.clone()));
        }
        let Some(tracked) = self.live.remove(&order_id) else {
            return Ok(CancelOutcome::NotResting);
        };
        if self.book.remove(order_id).is_none() {
            let e = ExchangeError::UntrackedRestingOrder(order_id);
            self.halt(&e);
            return Err(e);
        }
        if let Err(e) = self.ledger.release(tracked.reservation) {
            if e.is_fatal() {
                self.halt(&e);
            }
            return Err(e);
        }
        let mut order = tracked.order;
        order.status = OrderStatus::Cancelled;
        info!(
            "order cancelled order_id={} remaining={}",
            order_id.0, order.remaining_quantity
        );
        Ok(CancelOutcome::Cancelled(OrderUpdate {
            order_id,
            member_id: order.member_id,
            status: OrderStatus::Cancelled,
            parts: Vec::new(),
            filled_quantity: order.filled_quantity(),
            remaining_quantity: order.remaining_quantity,
            avg_price: None,
        }))
    }

    /// Export resting state for persistence.
    pub fn snapshot(&self) -> EngineSnapshot {
        let mut resting_orders: Vec<RestingOrder> = self
            .book
            .resting_entries()
            .iter()
            .map(|(side, price, entry)| {
                let tracked = self.live.get(&entry.order_id);
                resting_order_from_entry(
                    &self.symbol,
                    *side,
                    *price,
                    entry,
                    tracked.map(|t| t.order.quantity).unwrap_or(entry.remaining),
                    tracked
                        .map(|t| t.order.time_enforcement)
                        .unwrap_or(crate::types::TimeEnforcement::GoodTillCancelled),
                )
            })
            .collect();
        resting_orders.sort_by_key(|r| (r.submitted_at, r.order_id));
        EngineSnapshot {
            symbol: self.symbol.clone(),
            resting_orders,
            next_trade_id: self.next_trade_id,
            next_part_id: self.next_part_id,
        }
    }

    fn halt(&mut self, cause: &ExchangeError) {
        self.halted = true;
        error!(
            "HALT instrument={}: engine invariant violated: {}",
            self.symbol, cause
        );
    }
}
