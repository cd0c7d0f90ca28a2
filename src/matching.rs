//! Price-time continuous matching.
//!
//! [`match_order`] runs one incoming order against the book: takes crossing
//! liquidity at the resting order's price (maker price rule), applies
//! GTC/IOC/FOK semantics, and rests the remainder when the enforcement type
//! allows. The book is left non-crossing.

use crate::execution::Trade;
use crate::order_book::{FrontFill, OrderBook};
use crate::types::{Order, OrderStatus, Side, TimeEnforcement, TradeId};
use rust_decimal::Decimal;

/// Outcome of matching one incoming order.
#[derive(Clone, Debug, Default)]
pub struct MatchResult {
    pub trades: Vec<Trade>,
    /// One entry per trade: the resting (maker) side of that trade.
    pub maker_fills: Vec<FrontFill>,
    /// True if the incoming order's remainder was inserted as resting.
    pub rested: bool,
}

fn crosses(side: Side, limit: Decimal, opposite_best: Decimal) -> bool {
    match side {
        Side::Buy => limit >= opposite_best,
        Side::Sell => limit <= opposite_best,
    }
}

/// Run matching for one incoming order. Mutates `order`: decrements
/// `remaining_quantity` and transitions `status`. Trade ids are assigned
/// sequentially from `next_trade_id`.
///
/// Fill-or-kill is all-or-nothing: if the book cannot fully fill the order
/// immediately, the result has zero trades and the book is untouched.
pub fn match_order(
    book: &mut OrderBook,
    order: &mut Order,
    next_trade_id: u64,
    executed_at: u64,
) -> MatchResult {
    let mut result = MatchResult::default();
    let mut trade_id = next_trade_id;
    let contra = order.side.opposite();

    if matches!(order.time_enforcement, TimeEnforcement::FillOrKill) {
        let available = match order.side {
            Side::Buy => book.available_ask_qty_at_or_below(order.limit_price),
            Side::Sell => book.available_bid_qty_at_or_above(order.limit_price),
        };
        if available < order.remaining_quantity {
            order.status = OrderStatus::Cancelled;
            return result;
        }
    }

    while order.remaining_quantity > Decimal::ZERO {
        let Some(best) = (match contra {
            Side::Buy => book.best_bid(),
            Side::Sell => book.best_ask(),
        }) else {
            break;
        };
        if !crosses(order.side, order.limit_price, best) {
            break;
        }
        let fill = book
            .fill_front(contra, order.remaining_quantity)
            .expect("contra side has a best price");
        order.remaining_quantity -= fill.quantity;
        let (buy_order_id, sell_order_id) = match order.side {
            Side::Buy => (order.order_id, fill.order_id),
            Side::Sell => (fill.order_id, order.order_id),
        };
        result.trades.push(Trade {
            trade_id: TradeId(trade_id),
            symbol: order.symbol.clone(),
            buy_order_id,
            sell_order_id,
            price: fill.price,
            quantity: fill.quantity,
            executed_at,
            aggressor_side: order.side,
        });
        trade_id += 1;
        result.maker_fills.push(fill);
    }

    order.status = if order.remaining_quantity <= Decimal::ZERO {
        OrderStatus::Filled
    } else if order.rests() {
        book.insert(order);
        result.rested = true;
        if order.filled_quantity() > Decimal::ZERO {
            OrderStatus::PartiallyFilled
        } else {
            OrderStatus::Open
        }
    } else {
        // IOC remainder (and the FOK-with-liquidity-drained case, which the
        // precheck makes unreachable) is cancelled, never rested.
        OrderStatus::Cancelled
    };

    result
}
