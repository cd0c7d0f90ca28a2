//! End-to-end member flows through the async gateway.
//!
//! Covers full fills with exact balance deltas, FOK with no liquidity,
//! price improvement for the aggressor, cancel-vs-fill resolution, and
//! parallel instruments sharing one ledger.

use exchange_core::{
    ExchangeGateway, InMemoryAuditSink, MemberCallback, MemberId, OrderId, OrderPart, OrderRequest,
    OrderStatus, SettlementLedger, Side, Symbol, TimeEnforcement,
};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Test callback: records deliveries and signals each one.
struct RecordingCallback {
    deliveries: Mutex<Vec<(OrderId, Vec<OrderPart>, OrderStatus)>>,
    notify: mpsc::UnboundedSender<OrderStatus>,
}

impl RecordingCallback {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<OrderStatus>) {
        let (notify, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                deliveries: Mutex::new(Vec::new()),
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
    fn callback_stock_exchange(&self, order_id: OrderId, parts: &[OrderPart], status: OrderStatus) {
        self.deliveries
            .lock()
            .expect("lock")
            .push((order_id, parts.to_vec(), status));
        let _ = self.notify.send(status);
    }
}

fn funded_ledger() -> Arc<SettlementLedger> {
    let ledger = Arc::new(SettlementLedger::new());
    // Member 1: cash only. Member 2: shares only. Member 3: cash only.
    ledger.open_account(MemberId(1), Decimal::from(10_000));
    ledger.open_account(MemberId(2), Decimal::ZERO);
    ledger.open_account(MemberId(3), Decimal::from(10_000));
    ledger
        .credit_shares(MemberId(2), &Symbol::from("AAPL"), Decimal::from(100))
        .unwrap();
    ledger
}

fn request(member: u64, symbol: &str, side: Side, qty: i64, price: i64, tif: TimeEnforcement) -> OrderRequest {
    OrderRequest {
        member_id: MemberId(member),
        symbol: Symbol::from(symbol),
        side,
        quantity: Decimal::from(qty),
        limit_price: Decimal::from(price),
        time_enforcement: tif,
    }
}

#[tokio::test]
async fn full_fill_settles_exact_balance_deltas() {
    let ledger = funded_ledger();
    let gateway = ExchangeGateway::new(
        [Symbol::from("AAPL")],
        ledger.clone(),
        Arc::new(InMemoryAuditSink::new()),
    );
    let (a_cb, mut a_rx) = RecordingCallback::new();
    let (b_cb, mut b_rx) = RecordingCallback::new();
    gateway.register_member(MemberId(1), a_cb.clone());
    gateway.register_member(MemberId(2), b_cb.clone());

    // A: BUY 100 AAPL @ 50 GTC rests; escrow 5000.
    let buy = gateway
        .submit_order(request(1, "AAPL", Side::Buy, 100, 50, TimeEnforcement::GoodTillCancelled))
        .unwrap();
    assert_eq!(a_rx.recv().await, Some(OrderStatus::Open));
    assert_eq!(ledger.cash_available(MemberId(1)).unwrap(), Decimal::from(5_000));
    assert_eq!(ledger.cash_reserved(MemberId(1)).unwrap(), Decimal::from(5_000));

    // B: SELL 100 AAPL @ 50 GTC crosses; one trade for 100 @ 50.
    let sell = gateway
        .submit_order(request(2, "AAPL", Side::Sell, 100, 50, TimeEnforcement::GoodTillCancelled))
        .unwrap();
    assert_eq!(a_rx.recv().await, Some(OrderStatus::Filled));
    assert_eq!(b_rx.recv().await, Some(OrderStatus::Filled));

    let a_deliveries = a_cb.deliveries();
    let last = a_deliveries.last().unwrap();
    assert_eq!(last.0, buy.order_id);
    assert_eq!(last.1.len(), 1);
    assert_eq!(last.1[0].price, Decimal::from(50));
    assert_eq!(last.1[0].quantity, Decimal::from(100));
    let b_deliveries = b_cb.deliveries();
    assert_eq!(b_deliveries.last().unwrap().0, sell.order_id);

    // A: cash down exactly 5000, +100 AAPL. B: position 0, cash +5000.
    assert_eq!(ledger.cash_available(MemberId(1)).unwrap(), Decimal::from(5_000));
    assert_eq!(ledger.cash_reserved(MemberId(1)).unwrap(), Decimal::ZERO);
    assert_eq!(
        ledger.position_available(MemberId(1), &Symbol::from("AAPL")).unwrap(),
        Decimal::from(100)
    );
    assert_eq!(
        ledger.position_total(MemberId(2), &Symbol::from("AAPL")).unwrap(),
        Decimal::ZERO
    );
    assert_eq!(ledger.cash_available(MemberId(2)).unwrap(), Decimal::from(5_000));
}

#[tokio::test]
async fn fok_without_liquidity_cancels_with_zero_trades() {
    let ledger = funded_ledger();
    let gateway = ExchangeGateway::new(
        [Symbol::from("XYZ")],
        ledger.clone(),
        Arc::new(InMemoryAuditSink::new()),
    );
    let (c_cb, mut c_rx) = RecordingCallback::new();
    gateway.register_member(MemberId(3), c_cb.clone());

    // C: BUY 50 XYZ @ 20 FOK with an empty book.
    gateway
        .submit_order(request(3, "XYZ", Side::Buy, 50, 20, TimeEnforcement::FillOrKill))
        .unwrap();
    assert_eq!(c_rx.recv().await, Some(OrderStatus::Cancelled));
    let deliveries = c_cb.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert!(deliveries[0].1.is_empty(), "zero trades");
    // Escrow fully restored after the validation round-trip.
    assert_eq!(ledger.cash_available(MemberId(3)).unwrap(), Decimal::from(10_000));
    assert_eq!(ledger.cash_reserved(MemberId(3)).unwrap(), Decimal::ZERO);
}

#[tokio::test]
async fn aggressor_gets_maker_price_and_refund() {
    let ledger = funded_ledger();
    let gateway = ExchangeGateway::new(
        [Symbol::from("AAPL")],
        ledger.clone(),
        Arc::new(InMemoryAuditSink::new()),
    );
    let (a_cb, mut a_rx) = RecordingCallback::new();
    let (b_cb, mut b_rx) = RecordingCallback::new();
    gateway.register_member(MemberId(1), a_cb.clone());
    gateway.register_member(MemberId(2), b_cb.clone());

    gateway
        .submit_order(request(2, "AAPL", Side::Sell, 100, 50, TimeEnforcement::GoodTillCancelled))
        .unwrap();
    assert_eq!(b_rx.recv().await, Some(OrderStatus::Open));
    // Buyer limits at 55; executes at the resting 50, 500 refunds.
    gateway
        .submit_order(request(1, "AAPL", Side::Buy, 100, 55, TimeEnforcement::GoodTillCancelled))
        .unwrap();
    assert_eq!(a_rx.recv().await, Some(OrderStatus::Filled));
    let deliveries = a_cb.deliveries();
    let parts = &deliveries.last().unwrap().1;
    assert_eq!(parts[0].price, Decimal::from(50));
    assert_eq!(ledger.cash_available(MemberId(1)).unwrap(), Decimal::from(5_000));
    assert_eq!(ledger.cash_reserved(MemberId(1)).unwrap(), Decimal::ZERO);
}

#[tokio::test]
async fn fill_beats_late_cancel() {
    let ledger = funded_ledger();
    let gateway = ExchangeGateway::new(
        [Symbol::from("AAPL")],
        ledger.clone(),
        Arc::new(InMemoryAuditSink::new()),
    );
    let (a_cb, mut a_rx) = RecordingCallback::new();
    let (b_cb, mut b_rx) = RecordingCallback::new();
    gateway.register_member(MemberId(1), a_cb.clone());
    gateway.register_member(MemberId(2), b_cb.clone());

    let buy = gateway
        .submit_order(request(1, "AAPL", Side::Buy, 100, 50, TimeEnforcement::GoodTillCancelled))
        .unwrap();
    assert_eq!(a_rx.recv().await, Some(OrderStatus::Open));
    gateway
        .submit_order(request(2, "AAPL", Side::Sell, 100, 50, TimeEnforcement::GoodTillCancelled))
        .unwrap();
    assert_eq!(a_rx.recv().await, Some(OrderStatus::Filled));
    assert_eq!(b_rx.recv().await, Some(OrderStatus::Filled));

    // The fill already terminated the order: the cancel is refused and no
    // second terminal outcome is ever delivered.
    assert!(!gateway.cancel_order(buy.order_id));
    let terminal: Vec<_> = a_cb
        .deliveries()
        .iter()
        .filter(|(id, _, status)| *id == buy.order_id && status.is_terminal())
        .cloned()
        .collect();
    assert_eq!(terminal.len(), 1);
    assert_eq!(terminal[0].2, OrderStatus::Filled);
}

#[tokio::test]
async fn cancel_before_contra_order_wins_race() {
    let ledger = funded_ledger();
    let gateway = ExchangeGateway::new(
        [Symbol::from("AAPL")],
        ledger.clone(),
        Arc::new(InMemoryAuditSink::new()),
    );
    let (a_cb, mut a_rx) = RecordingCallback::new();
    let (b_cb, mut b_rx) = RecordingCallback::new();
    gateway.register_member(MemberId(1), a_cb.clone());
    gateway.register_member(MemberId(2), b_cb.clone());

    let buy = gateway
        .submit_order(request(1, "AAPL", Side::Buy, 100, 50, TimeEnforcement::GoodTillCancelled))
        .unwrap();
    assert_eq!(a_rx.recv().await, Some(OrderStatus::Open));
    assert!(gateway.cancel_order(buy.order_id));
    assert_eq!(a_rx.recv().await, Some(OrderStatus::Cancelled));

    // The later sell finds an empty book and rests.
    gateway
        .submit_order(request(2, "AAPL", Side::Sell, 100, 50, TimeEnforcement::GoodTillCancelled))
        .unwrap();
    assert_eq!(b_rx.recv().await, Some(OrderStatus::Open));
    assert_eq!(a_cb.deliveries().last().unwrap().2, OrderStatus::Cancelled);
    assert_eq!(ledger.cash_available(MemberId(1)).unwrap(), Decimal::from(10_000));
}

#[tokio::test]
async fn instruments_match_in_parallel_sharing_one_ledger() {
    let ledger = Arc::new(SettlementLedger::new());
    ledger.open_account(MemberId(1), Decimal::from(100_000));
    ledger.open_account(MemberId(2), Decimal::ZERO);
    ledger
        .credit_shares(MemberId(2), &Symbol::from("AAPL"), Decimal::from(100))
        .unwrap();
    ledger
        .credit_shares(MemberId(2), &Symbol::from("MSFT"), Decimal::from(100))
        .unwrap();
    let gateway = ExchangeGateway::new(
        [Symbol::from("AAPL"), Symbol::from("MSFT")],
        ledger.clone(),
        Arc::new(InMemoryAuditSink::new()),
    );
    let (a_cb, mut a_rx) = RecordingCallback::new();
    let (b_cb, mut b_rx) = RecordingCallback::new();
    gateway.register_member(MemberId(1), a_cb.clone());
    gateway.register_member(MemberId(2), b_cb.clone());

    for symbol in ["AAPL", "MSFT"] {
        gateway
            .submit_order(request(2, symbol, Side::Sell, 100, 50, TimeEnforcement::GoodTillCancelled))
            .unwrap();
        gateway
            .submit_order(request(1, symbol, Side::Buy, 100, 50, TimeEnforcement::GoodTillCancelled))
            .unwrap();
    }
    // Per symbol: seller Open + Filled, buyer Filled.
    for _ in 0..2 {
        assert!(a_rx.recv().await.is_some());
        assert!(b_rx.recv().await.is_some());
        assert!(b_rx.recv().await.is_some());
    }
    assert_eq!(ledger.cash_available(MemberId(1)).unwrap(), Decimal::from(90_000));
    assert_eq!(ledger.cash_available(MemberId(2)).unwrap(), Decimal::from(10_000));
    assert_eq!(
        ledger.position_available(MemberId(1), &Symbol::from("AAPL")).unwrap(),
        Decimal::from(100)
    );
    assert_eq!(
        ledger.position_available(MemberId(1), &Symbol::from("MSFT")).unwrap(),
        Decimal::from(100)
    );
}

#[tokio::test]
async fn snapshot_restore_preserves_resting_orders_and_balances() {
    let ledger = funded_ledger();
    let gateway = ExchangeGateway::new(
        [Symbol::from("AAPL")],
        ledger.clone(),
        Arc::new(InMemoryAuditSink::new()),
    );
    let (a_cb, mut a_rx) = RecordingCallback::new();
    gateway.register_member(MemberId(1), a_cb.clone());
    gateway
        .submit_order(request(1, "AAPL", Side::Buy, 100, 50, TimeEnforcement::GoodTillCancelled))
        .unwrap();
    assert_eq!(a_rx.recv().await, Some(OrderStatus::Open));

    let state = gateway.snapshot().await;
    assert_eq!(state.engines.len(), 1);
    assert_eq!(state.engines[0].resting_orders.len(), 1);

    let restored = ExchangeGateway::restore(&state, Arc::new(InMemoryAuditSink::new())).unwrap();
    let ledger = restored.ledger().clone();
    assert_eq!(ledger.cash_available(MemberId(1)).unwrap(), Decimal::from(5_000));
    assert_eq!(ledger.cash_reserved(MemberId(1)).unwrap(), Decimal::from(5_000));

    // The restored resting bid still fills against a new sell.
    let (a2_cb, mut a2_rx) = RecordingCallback::new();
    let (b2_cb, mut b2_rx) = RecordingCallback::new();
    restored.register_member(MemberId(1), a2_cb.clone());
    restored.register_member(MemberId(2), b2_cb.clone());
    restored
        .submit_order(request(2, "AAPL", Side::Sell, 100, 50, TimeEnforcement::GoodTillCancelled))
        .unwrap();
    assert_eq!(a2_rx.recv().await, Some(OrderStatus::Filled));
    assert_eq!(b2_rx.recv().await, Some(OrderStatus::Filled));
    assert_eq!(ledger.cash_available(MemberId(2)).unwrap(), Decimal::from(5_000));
}
