//! Trades, fill parts, and order-update records.
//!
//! [`Trade`] is emitted once per match and is immutable afterwards (it is
//! retained as the audit record of the execution). [`OrderUpdate`] carries
//! one status transition and its [`OrderPart`]s to the owning member.

use crate::types::{MemberId, OrderId, OrderStatus, PartId, Side, Symbol, TradeId};
use rust_decimal::Decimal;
use serde::Serializer;

fn serialize_option_decimal<S>(opt: &Option<Decimal>, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match opt {
        None => s.serialize_none(),
        Some(d) => s.serialize_str(&d.to_string()),
    }
}

/// One match between a buy and a sell order. Created exactly once; never
/// mutated.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Trade {
    pub trade_id: TradeId,
    pub symbol: Symbol,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    /// Execution price: the resting order's limit (maker price).
    pub price: Decimal,
    pub quantity: Decimal,
    pub executed_at: u64,
    pub aggressor_side: Side,
}

impl Trade {
    /// Cash that changes hands for this trade.
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}

/// One fill slice of an order, as delivered in member callbacks.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct OrderPart {
    pub part_id: PartId,
    pub price: Decimal,
    pub quantity: Decimal,
    pub executed_at: u64,
}

/// One order status transition, with the fill parts that caused it.
/// Delivered to the owning member exactly once, in transition order.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct OrderUpdate {
    pub order_id: OrderId,
    pub member_id: MemberId,
    pub status: OrderStatus,
    pub parts: Vec<OrderPart>,
    pub filled_quantity: Decimal,
    pub remaining_quantity: Decimal,
    #[serde(default, serialize_with = "serialize_option_decimal")]
    pub avg_price: Option<Decimal>,
}

impl OrderUpdate {
    /// Volume-weighted average price across `parts`, None when empty.
    pub fn avg_price_of(parts: &[OrderPart]) -> Option<Decimal> {
        let qty: Decimal = parts.iter().map(|p| p.quantity).sum();
        if qty <= Decimal::ZERO {
            return None;
        }
        let notional: Decimal = parts.iter().map(|p| p.price * p.quantity).sum();
        Some(notional / qty)
    }
}
