//! # Exchange Core
//!
//! Deterministic limit-order matching and trade settlement core: per-symbol
//! order books with price-time priority, a continuous matching engine, an
//! escrow-based settlement ledger, and an async gateway that serializes
//! submissions per instrument and delivers fills through member callbacks.
//!
//! ## Entry points
//!
//! [`ExchangeGateway`] is the member-facing surface: create with
//! [`ExchangeGateway::new`] inside a tokio runtime, then
//! [`ExchangeGateway::submit_order`] / [`ExchangeGateway::cancel_order`].
//! For synchronous use (tests, benches, replay), drive a
//! [`MatchingEngine`] directly against a [`SettlementLedger`].
//!
//! ## Example
//!
//! ```rust
//! use exchange_core::{
//!     MatchingEngine, MemberId, Order, OrderId, OrderKind, OrderStatus,
//!     SettlementLedger, Side, Symbol, TimeEnforcement,
//! };
//! use rust_decimal::Decimal;
//! use std::sync::Arc;
//!
//! let ledger = Arc::new(SettlementLedger::new());
//! ledger.open_account(MemberId(1), Decimal::from(10_000));
//! ledger.open_account(MemberId(2), Decimal::ZERO);
//! ledger
//!     .credit_shares(MemberId(2), &Symbol::from("AAPL"), Decimal::from(100))
//!     .unwrap();
//!
//! let mut engine = MatchingEngine::new(Symbol::from("AAPL"), ledger.clone());
//!
//! // Seller rests 100 @ 50, buyer crosses; one trade settles both legs.
//! let sell_rsv = ledger
//!     .reserve_shares(MemberId(2), &Symbol::from("AAPL"), Decimal::from(100))
//!     .unwrap();
//! let sell = Order {
//!     order_id: OrderId(1),
//!     member_id: MemberId(2),
//!     symbol: Symbol::from("AAPL"),
//!     side: Side::Sell,
//!     kind: OrderKind::Limit,
//!     quantity: Decimal::from(100),
//!     remaining_quantity: Decimal::from(100),
//!     limit_price: Decimal::from(50),
//!     time_enforcement: TimeEnforcement::GoodTillCancelled,
//!     status: OrderStatus::Open,
//!     submitted_at: 1,
//! };
//! engine.submit(sell, sell_rsv).unwrap();
//!
//! let buy_rsv = ledger
//!     .reserve_cash(MemberId(1), Decimal::from(100), Decimal::from(50))
//!     .unwrap();
//! let buy = Order {
//!     order_id: OrderId(2),
//!     member_id: MemberId(1),
//!     symbol: Symbol::from("AAPL"),
//!     side: Side::Buy,
//!     kind: OrderKind::Limit,
//!     quantity: Decimal::from(100),
//!     remaining_quantity: Decimal::from(100),
//!     limit_price: Decimal::from(50),
//!     time_enforcement: TimeEnforcement::GoodTillCancelled,
//!     status: OrderStatus::Open,
//!     submitted_at: 2,
//! };
//! let outcome = engine.submit(buy, buy_rsv).unwrap();
//! assert_eq!(outcome.trades.len(), 1);
//! assert_eq!(ledger.cash_available(MemberId(1)).unwrap(), Decimal::from(5_000));
//! assert_eq!(ledger.cash_available(MemberId(2)).unwrap(), Decimal::from(5_000));
//! ```

pub mod audit;
pub mod engine;
pub mod error;
pub mod execution;
pub mod gateway;
pub mod ledger;
pub mod matching;
pub mod order_book;
pub mod order_flow;
pub mod persistence;
pub mod types;

pub use audit::{AuditAction, AuditActor, AuditEvent, AuditSink, InMemoryAuditSink, StdoutAuditSink};
pub use engine::{CancelOutcome, EngineSnapshot, MatchingEngine, SubmitOutcome};
pub use error::ExchangeError;
pub use execution::{OrderPart, OrderUpdate, Trade};
pub use gateway::{ExchangeGateway, MemberCallback, OrderAcceptance, OrderRequest};
pub use ledger::{AccountSnapshot, MemberAccount, PositionBalance, SettlementLedger};
pub use matching::{match_order, MatchResult};
pub use order_book::{BookEntry, FrontFill, OrderBook};
pub use order_flow::{FlowConfig, OrderFlow, ReplayHarness, ReplayStats};
pub use persistence::{FilePersistence, PersistedState};
pub use types::{
    MemberId, Order, OrderId, OrderKind, OrderStatus, PartId, ReservationId, RestingOrder,
    ReturnStatus, Side, Symbol, TimeEnforcement, TradeId,
};
