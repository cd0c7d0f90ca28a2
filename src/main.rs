//! Demo simulation: replay a seeded synthetic order flow through the
//! gateway and log the resulting fills and final balances.
//!
//! Configuration via environment: `SEED`, `NUM_ORDERS`, `SYMBOL`, `MEMBERS`,
//! plus `RUST_LOG` for log level.

use exchange_core::{
    ExchangeGateway, FilePersistence, FlowConfig, MemberCallback, MemberId, OrderFlow, OrderId,
    OrderPart, OrderStatus, SettlementLedger, StdoutAuditSink, Symbol,
};
use log::info;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Logs each delivery and counts terminal outcomes.
struct LoggingCallback {
    member_id: MemberId,
    fills: Arc<AtomicU64>,
}

impl MemberCallback for LoggingCallback {
    fn callback_stock_exchange(&self, order_id: OrderId, parts: &[OrderPart], status: OrderStatus) {
        info!(
            "callback member={} order_id={} status={:?} parts={}",
            self.member_id.0,
            order_id.0,
            status,
            parts.len()
        );
        if status == OrderStatus::Filled {
            self.fills.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[tokio::main]
async fn main() {
    let _ = env_logger::try_init();
    let seed = env_u64("SEED", 0);
    let num_orders = env_u64("NUM_ORDERS", 200) as usize;
    let num_members = env_u64("MEMBERS", 5);
    let symbol = Symbol::new(std::env::var("SYMBOL").unwrap_or_else(|_| "AAPL".into()));

    let config = FlowConfig {
        seed,
        symbol: symbol.clone(),
        num_orders,
        num_members,
        ..FlowConfig::default()
    };

    let ledger = Arc::new(SettlementLedger::new());
    let starting_cash = Decimal::from(1_000_000);
    let starting_shares = Decimal::from(10_000);
    for m in 1..=num_members {
        let member = MemberId(m);
        ledger.open_account(member, starting_cash);
        ledger
            .credit_shares(member, &symbol, starting_shares)
            .expect("account just opened");
    }

    let gateway = ExchangeGateway::new([symbol.clone()], ledger.clone(), Arc::new(StdoutAuditSink));
    let fills = Arc::new(AtomicU64::new(0));
    for m in 1..=num_members {
        gateway.register_member(
            MemberId(m),
            Arc::new(LoggingCallback {
                member_id: MemberId(m),
                fills: fills.clone(),
            }),
        );
    }

    let mut accepted = 0usize;
    let mut rejected = 0usize;
    for request in OrderFlow::new(config).all_requests() {
        match gateway.submit_order(request) {
            Ok(_) => accepted += 1,
            Err(_) => rejected += 1,
        }
    }

    // The snapshot command queues behind every submission, so awaiting it
    // doubles as a drain barrier.
    let state = gateway.snapshot().await;
    let resting: usize = state.engines.iter().map(|e| e.resting_orders.len()).sum();

    if let Ok(path) = std::env::var("STATE_FILE") {
        match FilePersistence::new(&path).save(&state) {
            Ok(()) => info!("state saved to {}", path),
            Err(e) => log::error!("failed to save state to {}: {}", path, e),
        }
    }

    println!("--- simulation summary ---");
    println!("orders submitted: {} accepted, {} rejected", accepted, rejected);
    println!("orders fully filled: {}", fills.load(Ordering::Relaxed));
    println!("orders resting: {}", resting);
    for account in &state.accounts {
        println!(
            "member {}: cash available {} reserved {}",
            account.member_id.0, account.account.cash_available, account.account.cash_reserved
        );
    }
}
