//! Exchange gateway: the only surface exposed to members.
//!
//! One worker task per instrument owns that symbol's [`MatchingEngine`]; an
//! mpsc queue serializes every mutation for the symbol, so the engine and
//! book need no internal locking. Different symbols match fully in parallel
//! and share only the [`SettlementLedger`].
//!
//! `submit_order` validates and escrows synchronously (rejections carry the
//! member-facing [`ReturnStatus`] taxonomy and leave no side effects), then
//! enqueues and returns. Matching and settlement happen asynchronously;
//! results reach the originating members through
//! [`MemberCallback::callback_stock_exchange`], exactly once per status
//! transition, in the order the transitions occurred.

use crate::audit::{AuditAction, AuditActor, AuditEvent, AuditSink};
use crate::engine::{CancelOutcome, EngineSnapshot, MatchingEngine};
use crate::error::ExchangeError;
use crate::execution::{OrderPart, OrderUpdate};
use crate::ledger::SettlementLedger;
use crate::persistence::PersistedState;
use crate::types::{
    MemberId, Order, OrderId, OrderKind, OrderStatus, ReservationId, ReturnStatus, Side, Symbol,
    TimeEnforcement,
};
use log::{debug, error, warn};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};

/// Receives order updates for a member. Implementations must tolerate being
/// called from worker tasks.
pub trait MemberCallback: Send + Sync {
    /// Invoked once per order status transition, in transition order.
    fn callback_stock_exchange(&self, order_id: OrderId, parts: &[OrderPart], status: OrderStatus);
}

/// A submission as it arrives from a member.
#[derive(Clone, Debug)]
pub struct OrderRequest {
    pub member_id: MemberId,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Decimal,
    pub limit_price: Decimal,
    pub time_enforcement: TimeEnforcement,
}

/// Returned synchronously from a successful submission. Matching is
/// asynchronous; fills arrive via callback.
#[derive(Clone, Copy, Debug)]
pub struct OrderAcceptance {
    pub order_id: OrderId,
}

enum EngineCommand {
    Submit {
        order: Order,
        reservation: ReservationId,
    },
    Cancel {
        order_id: OrderId,
    },
    Snapshot {
        reply: oneshot::Sender<EngineSnapshot>,
    },
}

struct InstrumentHandle {
    tx: mpsc::UnboundedSender<EngineCommand>,
    halted: Arc<AtomicBool>,
}

type MemberRegistry = Arc<RwLock<HashMap<MemberId, Arc<dyn MemberCallback>>>>;
type LiveOrders = Arc<Mutex<HashMap<OrderId, Symbol>>>;

/// Explicit, constructed exchange instance (no global singleton). Create one
/// per exchange, or one per test.
pub struct ExchangeGateway {
    ledger: Arc<SettlementLedger>,
    audit: Arc<dyn AuditSink>,
    members: MemberRegistry,
    live_orders: LiveOrders,
    instruments: HashMap<Symbol, InstrumentHandle>,
    next_order_id: AtomicU64,
    /// Monotonic submission sequence; doubles as deterministic time priority.
    next_sequence: AtomicU64,
}

impl ExchangeGateway {
    /// Create a gateway and spawn one matching worker per symbol. Must be
    /// called from within a tokio runtime.
    pub fn new(
        symbols: impl IntoIterator<Item = Symbol>,
        ledger: Arc<SettlementLedger>,
        audit: Arc<dyn AuditSink>,
    ) -> Arc<Self> {
        Self::build(symbols, ledger, audit, 1, 1, Vec::new())
    }

    /// Rebuild a gateway from persisted state: accounts restored with escrow
    /// folded back, each engine re-reserving for its resting orders. Members
    /// must re-register their callbacks.
    pub fn restore(
        state: &PersistedState,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Arc<Self>, ExchangeError> {
        crate::persistence::validate_state(state)?;
        let ledger = Arc::new(SettlementLedger::new());
        ledger.restore(&state.accounts);
        let mut engines = Vec::with_capacity(state.engines.len());
        for snapshot in &state.engines {
            engines.push(MatchingEngine::from_snapshot(snapshot, ledger.clone())?);
        }
        Ok(Self::build(
            state.engines.iter().map(|e| e.symbol.clone()),
            ledger,
            audit,
            state.next_order_id,
            state.next_sequence,
            engines,
        ))
    }

    fn build(
        symbols: impl IntoIterator<Item = Symbol>,
        ledger: Arc<SettlementLedger>,
        audit: Arc<dyn AuditSink>,
        next_order_id: u64,
        next_sequence: u64,
        prebuilt: Vec<MatchingEngine>,
    ) -> Arc<Self> {
        let members: MemberRegistry = Arc::new(RwLock::new(HashMap::new()));
        let live_orders: LiveOrders = Arc::new(Mutex::new(HashMap::new()));
        let mut prebuilt: HashMap<Symbol, MatchingEngine> = prebuilt
            .into_iter()
            .map(|e| (e.symbol().clone(), e))
            .collect();
        let mut instruments = HashMap::new();
        for symbol in symbols {
            if instruments.contains_key(&symbol) {
                continue;
            }
            let engine = prebuilt
                .remove(&symbol)
                .unwrap_or_else(|| MatchingEngine::new(symbol.clone(), ledger.clone()));
            let (tx, rx) = mpsc::unbounded_channel();
            let halted = Arc::new(AtomicBool::new(false));
            // Restored resting orders must be cancellable, so they re-enter
            // the live-order index.
            for resting in engine.snapshot().resting_orders {
                live_orders
                    .lock()
                    .expect("live orders lock")
                    .insert(resting.order_id, symbol.clone());
            }
            tokio::spawn(run_worker(
                engine,
                rx,
                members.clone(),
                live_orders.clone(),
                halted.clone(),
                audit.clone(),
            ));
            instruments.insert(symbol, InstrumentHandle { tx, halted });
        }
        Arc::new(Self {
            ledger,
            audit,
            members,
            live_orders,
            instruments,
            next_order_id: AtomicU64::new(next_order_id),
            next_sequence: AtomicU64::new(next_sequence),
        })
    }

    pub fn ledger(&self) -> &Arc<SettlementLedger> {
        &self.ledger
    }

    /// Register the callback that receives a member's order updates.
    /// Submissions from unregistered members are rejected.
    pub fn register_member(&self, member_id: MemberId, callback: Arc<dyn MemberCallback>) {
        self.members
            .write()
            .expect("members lock")
            .insert(member_id, callback);
    }

    /// Validate, escrow, and enqueue one order. Returns immediately with an
    /// acceptance token; matching happens asynchronously. On rejection no
    /// side effects remain.
    pub fn submit_order(&self, request: OrderRequest) -> Result<OrderAcceptance, ExchangeError> {
        match self.try_submit(&request) {
            Ok(acceptance) => Ok(acceptance),
            Err(e) => {
                self.audit.emit(&AuditEvent::now(
                    AuditActor::Member(request.member_id),
                    AuditAction::OrderSubmit,
                    Some(serde_json::json!({
                        "symbol": request.symbol.as_str(),
                        "side": format!("{:?}", request.side),
                        "quantity": request.quantity.to_string(),
                        "limit_price": request.limit_price.to_string(),
                    })),
                    "rejected",
                ));
                Err(e)
            }
        }
    }

    fn try_submit(&self, request: &OrderRequest) -> Result<OrderAcceptance, ExchangeError> {
        if request.quantity <= Decimal::ZERO {
            return Err(ExchangeError::InvalidQuantity);
        }
        if request.limit_price <= Decimal::ZERO {
            return Err(ExchangeError::InvalidPrice);
        }
        let handle = self
            .instruments
            .get(&request.symbol)
            .ok_or_else(|| ExchangeError::UnknownSymbol(request.symbol.clone()))?;
        if handle.halted.load(Ordering::Acquire) {
            return Err(ExchangeError::Halted(request.symbol.clone()));
        }
        if !self
            .members
            .read()
            .expect("members lock")
            .contains_key(&request.member_id)
        {
            return Err(ExchangeError::UnknownMember(request.member_id));
        }

        // Escrow at acceptance: cash for buys, shares for sells. Synchronous
        // and bounded; fails fast, never waits for funds to appear.
        let reservation = match request.side {
            Side::Buy => self.ledger.reserve_cash(
                request.member_id,
                request.quantity,
                request.limit_price,
            )?,
            Side::Sell => self.ledger.reserve_shares(
                request.member_id,
                &request.symbol,
                request.quantity,
            )?,
        };

        let order_id = OrderId(self.next_order_id.fetch_add(1, Ordering::Relaxed));
        let submitted_at = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let order = Order {
            order_id,
            member_id: request.member_id,
            symbol: request.symbol.clone(),
            side: request.side,
            kind: OrderKind::Limit,
            quantity: request.quantity,
            remaining_quantity: request.quantity,
            limit_price: request.limit_price,
            time_enforcement: request.time_enforcement,
            status: OrderStatus::Open,
            submitted_at,
        };
        self.live_orders
            .lock()
            .expect("live orders lock")
            .insert(order_id, request.symbol.clone());

        if handle
            .tx
            .send(EngineCommand::Submit { order, reservation })
            .is_err()
        {
            // Worker gone (halt raced the submission): undo acceptance.
            self.live_orders
                .lock()
                .expect("live orders lock")
                .remove(&order_id);
            if let Err(e) = self.ledger.release(reservation) {
                error!("failed to release escrow after halted enqueue: {}", e);
            }
            return Err(ExchangeError::Halted(request.symbol.clone()));
        }

        self.audit.emit(&AuditEvent::now(
            AuditActor::Member(request.member_id),
            AuditAction::OrderSubmit,
            Some(serde_json::json!({
                "order_id": order_id.0,
                "symbol": request.symbol.as_str(),
                "side": format!("{:?}", request.side),
                "quantity": request.quantity.to_string(),
                "limit_price": request.limit_price.to_string(),
            })),
            "accepted",
        ));
        Ok(OrderAcceptance { order_id })
    }

    /// Request cancellation. Returns false if the order is unknown or
    /// already terminal. A true return means the request was routed; the
    /// outcome (cancelled, or a fill that won the race) arrives via
    /// callback, and at most one terminal outcome is ever delivered.
    pub fn cancel_order(&self, order_id: OrderId) -> bool {
        let symbol = self
            .live_orders
            .lock()
            .expect("live orders lock")
            .get(&order_id)
            .cloned();
        let Some(symbol) = symbol else {
            return false;
        };
        let Some(handle) = self.instruments.get(&symbol) else {
            return false;
        };
        let routed = handle.tx.send(EngineCommand::Cancel { order_id }).is_ok();
        if routed {
            self.audit.emit(&AuditEvent::now(
                AuditActor::Engine,
                AuditAction::OrderCancel,
                Some(serde_json::json!({ "order_id": order_id.0, "symbol": symbol.as_str() })),
                "requested",
            ));
        }
        routed
    }

    /// Place a buy limit order, preserving the brokerage member contract.
    /// Funds are checked and escrowed before acceptance.
    pub fn place_buy_limit_order(
        &self,
        member_id: MemberId,
        symbol: Symbol,
        quantity: Decimal,
        limit_price: Decimal,
        time_enforcement: TimeEnforcement,
    ) -> ReturnStatus {
        match self.submit_order(OrderRequest {
            member_id,
            symbol,
            side: Side::Buy,
            quantity,
            limit_price,
            time_enforcement,
        }) {
            Ok(_) => ReturnStatus::Success,
            Err(e) => e.return_status(),
        }
    }

    /// Place a sell limit order, preserving the brokerage member contract.
    /// The position is checked and shares escrowed before acceptance.
    pub fn place_sell_limit_order(
        &self,
        member_id: MemberId,
        symbol: Symbol,
        quantity: Decimal,
        limit_price: Decimal,
        time_enforcement: TimeEnforcement,
    ) -> ReturnStatus {
        match self.submit_order(OrderRequest {
            member_id,
            symbol,
            side: Side::Sell,
            quantity,
            limit_price,
            time_enforcement,
        }) {
            Ok(_) => ReturnStatus::Success,
            Err(e) => e.return_status(),
        }
    }

    /// Collect a consistent snapshot of every instrument and the ledger.
    /// Halted instruments are skipped with a warning.
    pub async fn snapshot(&self) -> PersistedState {
        let mut engines = Vec::with_capacity(self.instruments.len());
        let mut pending = Vec::new();
        for (symbol, handle) in &self.instruments {
            let (reply, rx) = oneshot::channel();
            if handle.tx.send(EngineCommand::Snapshot { reply }).is_ok() {
                pending.push(rx);
            } else {
                warn!("snapshot skipped halted instrument {}", symbol);
            }
        }
        for rx in pending {
            if let Ok(snapshot) = rx.await {
                engines.push(snapshot);
            }
        }
        engines.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        PersistedState {
            accounts: self.ledger.snapshot(),
            engines,
            next_order_id: self.next_order_id.load(Ordering::Relaxed),
            next_sequence: self.next_sequence.load(Ordering::Relaxed),
        }
    }
}

async fn run_worker(
    mut engine: MatchingEngine,
    mut rx: mpsc::UnboundedReceiver<EngineCommand>,
    members: MemberRegistry,
    live_orders: LiveOrders,
    halted: Arc<AtomicBool>,
    audit: Arc<dyn AuditSink>,
) {
    let symbol = engine.symbol().clone();
    while let Some(command) = rx.recv().await {
        match command {
            EngineCommand::Submit { order, reservation } => {
                match engine.submit(order, reservation) {
                    Ok(outcome) => {
                        for trade in &outcome.trades {
                            audit.emit(&AuditEvent::now(
                                AuditActor::Engine,
                                AuditAction::Trade,
                                Some(serde_json::json!({
                                    "trade_id": trade.trade_id.0,
                                    "symbol": trade.symbol.as_str(),
                                    "buy_order_id": trade.buy_order_id.0,
                                    "sell_order_id": trade.sell_order_id.0,
                                    "price": trade.price.to_string(),
                                    "quantity": trade.quantity.to_string(),
                                })),
                                "executed",
                            ));
                        }
                        deliver(&members, &live_orders, &outcome.updates);
                    }
                    Err(e) if e.is_fatal() => {
                        halt_instrument(&symbol, &halted, &audit, &e);
                        break;
                    }
                    Err(e) => {
                        // Validation already ran at the gateway; anything
                        // non-fatal surfacing here is unexpected input drift.
                        warn!("submit failed post-acceptance on {}: {}", symbol, e);
                    }
                }
            }
            EngineCommand::Cancel { order_id } => match engine.cancel(order_id) {
                Ok(CancelOutcome::Cancelled(update)) => {
                    deliver(&members, &live_orders, std::slice::from_ref(&update));
                }
                Ok(CancelOutcome::NotResting) => {
                    // Fill (or earlier cancel) won the race; its terminal
                    // update has already been delivered.
                    debug!("cancel after terminal order_id={}", order_id.0);
                }
                Err(e) if e.is_fatal() => {
                    halt_instrument(&symbol, &halted, &audit, &e);
                    break;
                }
                Err(e) => warn!("cancel failed on {}: {}", symbol, e),
            },
            EngineCommand::Snapshot { reply } => {
                let _ = reply.send(engine.snapshot());
            }
        }
    }
}

/// Deliver updates to owning members, one callback per transition, and
/// retire terminal orders from the live index.
fn deliver(members: &MemberRegistry, live_orders: &LiveOrders, updates: &[OrderUpdate]) {
    for update in updates {
        // Retire terminal orders before the callback runs, so a member
        // reacting to a terminal update already sees the order as gone.
        if update.status.is_terminal() {
            live_orders
                .lock()
                .expect("live orders lock")
                .remove(&update.order_id);
        }
        let callback = members
            .read()
            .expect("members lock")
            .get(&update.member_id)
            .cloned();
        match callback {
            Some(callback) => {
                callback.callback_stock_exchange(update.order_id, &update.parts, update.status)
            }
            None => warn!(
                "no callback registered for member {} (order {})",
                update.member_id.0, update.order_id.0
            ),
        }
    }
}

fn halt_instrument(
    symbol: &Symbol,
    halted: &Arc<AtomicBool>,
    audit: &Arc<dyn AuditSink>,
    cause: &ExchangeError,
) {
    halted.store(true, Ordering::Release);
    error!("instrument {} halted: {}", symbol, cause);
    audit.emit(&AuditEvent::now(
        AuditActor::Engine,
        AuditAction::InstrumentHalt,
        Some(serde_json::json!({ "symbol": symbol.as_str(), "cause": cause.to_string() })),
        "halted",
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Records callbacks and forwards a notification per delivery.
    struct RecordingCallback {
        deliveries: StdMutex<Vec<(OrderId, Vec<OrderPart>, OrderStatus)>>,
        notify: mpsc::UnboundedSender<()>,
    }

    impl RecordingCallback {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<()>) {
            let (notify, rx) = mpsc::unbounded_channel();
            (
                Arc::new(Self {
                    deliveries: StdMutex::new(Vec::new()),
                    notify,
                }),
                rx,
            )
        }

        fn deliveries(&self) -> Vec<(OrderId, Vec<OrderPart>, OrderStatus)> {
            self.deliveries.lock().expect("lock").clone()
        }
    }

    impl MemberCallback for RecordingCallback {
        fn callback_stock_exchange(
            &self,
            order_id: OrderId,
            parts: &[OrderPart],
            status: OrderStatus,
        ) {
            self.deliveries
                .lock()
                .expect("lock")
                .push((order_id, parts.to_vec(), status));
            let _ = self.notify.send(());
        }
    }

    fn gateway_with_members() -> (
        Arc<ExchangeGateway>,
        Arc<RecordingCallback>,
        mpsc::UnboundedReceiver<()>,
        Arc<RecordingCallback>,
        mpsc::UnboundedReceiver<()>,
    ) {
        let _ = env_logger::try_init();
        let ledger = Arc::new(SettlementLedger::new());
        ledger.open_account(MemberId(1), Decimal::from(10_000));
        ledger.open_account(MemberId(2), Decimal::ZERO);
        ledger
            .credit_shares(MemberId(2), &Symbol::from("AAPL"), Decimal::from(100))
            .unwrap();
        let gateway = ExchangeGateway::new(
            [Symbol::from("AAPL")],
            ledger,
            Arc::new(crate::audit::InMemoryAuditSink::new()),
        );
        let (buyer_cb, buyer_rx) = RecordingCallback::new();
        let (seller_cb, seller_rx) = RecordingCallback::new();
        gateway.register_member(MemberId(1), buyer_cb.clone());
        gateway.register_member(MemberId(2), seller_cb.clone());
        (gateway, buyer_cb, buyer_rx, seller_cb, seller_rx)
    }

    fn request(member: u64, side: Side, qty: i64, price: i64) -> OrderRequest {
        OrderRequest {
            member_id: MemberId(member),
            symbol: Symbol::from("AAPL"),
            side,
            quantity: Decimal::from(qty),
            limit_price: Decimal::from(price),
            time_enforcement: TimeEnforcement::GoodTillCancelled,
        }
    }

    #[tokio::test]
    async fn submit_rejections_are_synchronous_and_side_effect_free() {
        let (gateway, _, _, _, _) = gateway_with_members();
        let err = gateway
            .submit_order(OrderRequest {
                quantity: Decimal::ZERO,
                ..request(1, Side::Buy, 0, 50)
            })
            .unwrap_err();
        assert_eq!(err, ExchangeError::InvalidQuantity);

        let err = gateway
            .submit_order(request(1, Side::Buy, 1_000, 50))
            .unwrap_err();
        assert_eq!(err.return_status(), ReturnStatus::InsufficientFunds);
        assert_eq!(
            gateway.ledger().cash_available(MemberId(1)).unwrap(),
            Decimal::from(10_000)
        );

        let err = gateway
            .submit_order(OrderRequest {
                symbol: Symbol::from("NOPE"),
                ..request(1, Side::Buy, 10, 50)
            })
            .unwrap_err();
        assert!(matches!(err, ExchangeError::UnknownSymbol(_)));

        let err = gateway
            .submit_order(request(9, Side::Buy, 10, 50))
            .unwrap_err();
        assert!(matches!(err, ExchangeError::UnknownMember(_)));
    }

    #[tokio::test]
    async fn matched_orders_deliver_fills_to_both_members() {
        let (gateway, buyer_cb, mut buyer_rx, seller_cb, mut seller_rx) = gateway_with_members();
        let sell = gateway
            .submit_order(request(2, Side::Sell, 100, 50))
            .unwrap();
        let buy = gateway.submit_order(request(1, Side::Buy, 100, 50)).unwrap();

        // Seller: Open (rested), then Filled. Buyer: Filled.
        seller_rx.recv().await.expect("seller open");
        seller_rx.recv().await.expect("seller filled");
        buyer_rx.recv().await.expect("buyer filled");

        let seller_deliveries = seller_cb.deliveries();
        assert_eq!(seller_deliveries.len(), 2);
        assert_eq!(seller_deliveries[0].2, OrderStatus::Open);
        assert_eq!(seller_deliveries[1].0, sell.order_id);
        assert_eq!(seller_deliveries[1].2, OrderStatus::Filled);
        assert_eq!(seller_deliveries[1].1.len(), 1);
        assert_eq!(seller_deliveries[1].1[0].quantity, Decimal::from(100));

        let buyer_deliveries = buyer_cb.deliveries();
        assert_eq!(buyer_deliveries.len(), 1);
        assert_eq!(buyer_deliveries[0].0, buy.order_id);
        assert_eq!(buyer_deliveries[0].2, OrderStatus::Filled);

        let ledger = gateway.ledger();
        assert_eq!(ledger.cash_available(MemberId(1)).unwrap(), Decimal::from(5_000));
        assert_eq!(ledger.cash_available(MemberId(2)).unwrap(), Decimal::from(5_000));
    }

    #[tokio::test]
    async fn cancel_resting_order_delivers_cancelled_and_restores_escrow() {
        let (gateway, buyer_cb, mut buyer_rx, _, _) = gateway_with_members();
        let accepted = gateway.submit_order(request(1, Side::Buy, 100, 50)).unwrap();
        buyer_rx.recv().await.expect("open update");
        assert!(gateway.cancel_order(accepted.order_id));
        buyer_rx.recv().await.expect("cancelled update");
        let deliveries = buyer_cb.deliveries();
        assert_eq!(deliveries.last().unwrap().2, OrderStatus::Cancelled);
        assert_eq!(
            gateway.ledger().cash_available(MemberId(1)).unwrap(),
            Decimal::from(10_000)
        );
        // Terminal: a second cancel is refused synchronously.
        assert!(!gateway.cancel_order(accepted.order_id));
    }

    #[tokio::test]
    async fn cancel_unknown_order_returns_false() {
        let (gateway, _, _, _, _) = gateway_with_members();
        assert!(!gateway.cancel_order(OrderId(999)));
    }

    #[tokio::test]
    async fn place_limit_order_contract_maps_return_status() {
        let (gateway, _, mut buyer_rx, _, _) = gateway_with_members();
        assert_eq!(
            gateway.place_buy_limit_order(
                MemberId(1),
                Symbol::from("AAPL"),
                Decimal::from(10),
                Decimal::from(50),
                TimeEnforcement::GoodTillCancelled,
            ),
            ReturnStatus::Success
        );
        buyer_rx.recv().await.expect("open update");
        assert_eq!(
            gateway.place_sell_limit_order(
                MemberId(1),
                Symbol::from("MSFT"),
                Decimal::from(10),
                Decimal::from(50),
                TimeEnforcement::GoodTillCancelled,
            ),
            ReturnStatus::Fail,
            "unknown symbol"
        );
        assert_eq!(
            gateway.place_sell_limit_order(
                MemberId(1),
                Symbol::from("AAPL"),
                Decimal::from(10),
                Decimal::from(50),
                TimeEnforcement::GoodTillCancelled,
            ),
            ReturnStatus::NoStockPosition
        );
    }
}
