//! Core types and IDs for the exchange (order data model).
//!
//! All identifiers are newtype wrappers. [`Order`], [`Side`], and
//! [`TimeEnforcement`] define the order message and lifecycle;
//! [`ReturnStatus`] is the member-facing result taxonomy.

use rust_decimal::Decimal;

/// Unique order identifier (assigned by the gateway).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct OrderId(pub u64);

/// Trade identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TradeId(pub u64);

/// Fill-part identifier (one per fill slice delivered in callbacks).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct PartId(pub u64);

/// Brokerage member identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct MemberId(pub u64);

/// Escrow reservation identifier (cash for buys, shares for sells).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ReservationId(pub u64);

/// Tradable instrument symbol (e.g. "AAPL"). Immutable identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Order side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The side a contra order rests on.
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Order kind. Only limit orders exist today; the tag keeps the record
/// extensible without an inheritance hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OrderKind {
    Limit,
}

/// How long an order stays active.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TimeEnforcement {
    /// Rest on the book until filled or explicitly cancelled.
    GoodTillCancelled,
    /// Fill entirely immediately or cancel with zero trades.
    FillOrKill,
    /// Fill what crosses immediately; cancel the remainder.
    ImmediateOrCancel,
    /// Accepted and rested; triggered by an external market-calendar clock.
    OnTheOpen,
    /// Accepted and rested; triggered by an external market-calendar clock.
    OnTheClose,
}

/// Order lifecycle status. Filled and Cancelled are terminal and sticky.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }
}

/// Member-facing result of a submission, preserved from the brokerage
/// account contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ReturnStatus {
    Success,
    Fail,
    InsufficientFunds,
    InsufficientQuantity,
    NoStockPosition,
}

/// Order record. Owned by the engine once submitted; only the engine
/// decrements `remaining_quantity` and transitions `status`.
///
/// Invariants: `remaining_quantity >= 0`; `status == Filled` exactly when
/// `remaining_quantity == 0`.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub member_id: MemberId,
    pub symbol: Symbol,
    pub side: Side,
    pub kind: OrderKind,
    /// Original submitted quantity.
    pub quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub limit_price: Decimal,
    pub time_enforcement: TimeEnforcement,
    pub status: OrderStatus,
    /// Monotonic submission sequence assigned by the gateway. Logical time,
    /// not wall-clock: time priority must be reproducible.
    pub submitted_at: u64,
}

impl Order {
    pub fn filled_quantity(&self) -> Decimal {
        self.quantity - self.remaining_quantity
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the remainder rests on the book after immediate matching.
    pub fn rests(&self) -> bool {
        matches!(
            self.time_enforcement,
            TimeEnforcement::GoodTillCancelled
                | TimeEnforcement::OnTheOpen
                | TimeEnforcement::OnTheClose
        )
    }
}

/// Minimal representation of a resting order for persistence/snapshot.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct RestingOrder {
    pub order_id: OrderId,
    pub member_id: MemberId,
    pub symbol: Symbol,
    pub side: Side,
    pub limit_price: Decimal,
    /// Original quantity at submission (for filled-quantity accounting).
    pub quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub time_enforcement: TimeEnforcement,
    pub submitted_at: u64,
}
