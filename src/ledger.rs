//! Settlement ledger: member cash and position balances with escrow.
//!
//! Funds (for buys) and shares (for sells) are reserved at order-acceptance
//! time, released on cancellation, and converted into realized balance
//! changes when a trade settles. Each member account sits behind its own
//! mutex; settlement between two members locks both accounts in ascending
//! member-id order, so cross-instrument settlement never deadlocks and a
//! partially-updated pair of balances is never observable.
//!
//! Reservation acquisition is synchronous and fails fast. A reservation
//! missing or overrun at settlement time is an engine bug, not bad input,
//! and is surfaced as a fatal [`ExchangeError`].

use crate::error::ExchangeError;
use crate::execution::Trade;
use crate::types::{MemberId, ReservationId, Symbol};
use log::debug;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Shares held in one symbol: available to sell vs. reserved by open sells.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PositionBalance {
    pub available: Decimal,
    pub reserved: Decimal,
}

impl PositionBalance {
    pub fn total(&self) -> Decimal {
        self.available + self.reserved
    }
}

/// One member's balances. Mutated only under the account lock.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct MemberAccount {
    pub cash_available: Decimal,
    pub cash_reserved: Decimal,
    pub positions: HashMap<Symbol, PositionBalance>,
}

/// Snapshot form for persistence.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct AccountSnapshot {
    pub member_id: MemberId,
    pub account: MemberAccount,
}

#[derive(Clone, Debug)]
enum ReservedResource {
    /// Cash escrow for a buy, priced at the order's limit per unit.
    Cash { price_per_unit: Decimal },
    /// Share escrow for a sell.
    Shares { symbol: Symbol },
}

#[derive(Clone, Debug)]
struct Reservation {
    member_id: MemberId,
    resource: ReservedResource,
    /// Units (shares) not yet settled or released.
    remaining: Decimal,
}

/// Cross-instrument shared settlement state. One instance per exchange.
pub struct SettlementLedger {
    accounts: RwLock<HashMap<MemberId, Arc<Mutex<MemberAccount>>>>,
    reservations: Mutex<HashMap<ReservationId, Reservation>>,
    next_reservation_id: AtomicU64,
}

impl SettlementLedger {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            reservations: Mutex::new(HashMap::new()),
            next_reservation_id: AtomicU64::new(1),
        }
    }

    /// Create an account with starting cash. Replaces any existing account
    /// for the member.
    pub fn open_account(&self, member_id: MemberId, starting_cash: Decimal) {
        let account = MemberAccount {
            cash_available: starting_cash,
            ..MemberAccount::default()
        };
        self.accounts
            .write()
            .expect("accounts lock")
            .insert(member_id, Arc::new(Mutex::new(account)));
    }

    /// Grant shares to a member (deposits, corporate actions, test setup).
    pub fn credit_shares(
        &self,
        member_id: MemberId,
        symbol: &Symbol,
        quantity: Decimal,
    ) -> Result<(), ExchangeError> {
        let handle = self.account_handle(member_id)?;
        let mut account = handle.lock().expect("account lock");
        account
            .positions
            .entry(symbol.clone())
            .or_default()
            .available += quantity;
        Ok(())
    }

    /// Add cash to a member's available funds.
    pub fn credit_cash(&self, member_id: MemberId, amount: Decimal) -> Result<(), ExchangeError> {
        let handle = self.account_handle(member_id)?;
        handle.lock().expect("account lock").cash_available += amount;
        Ok(())
    }

    /// Escrow `quantity * price_per_unit` cash for a buy order. Fails fast
    /// with InsufficientFunds; no partial reservation.
    pub fn reserve_cash(
        &self,
        member_id: MemberId,
        quantity: Decimal,
        price_per_unit: Decimal,
    ) -> Result<ReservationId, ExchangeError> {
        let required = quantity * price_per_unit;
        let handle = self.account_handle(member_id)?;
        let mut account = handle.lock().expect("account lock");
        if account.cash_available < required {
            return Err(ExchangeError::InsufficientFunds {
                member: member_id,
                available: account.cash_available,
                required,
            });
        }
        account.cash_available -= required;
        account.cash_reserved += required;
        drop(account);
        Ok(self.insert_reservation(Reservation {
            member_id,
            resource: ReservedResource::Cash { price_per_unit },
            remaining: quantity,
        }))
    }

    /// Escrow `quantity` shares of `symbol` for a sell order. Fails fast
    /// with NoStockPosition / InsufficientQuantity.
    pub fn reserve_shares(
        &self,
        member_id: MemberId,
        symbol: &Symbol,
        quantity: Decimal,
    ) -> Result<ReservationId, ExchangeError> {
        let handle = self.account_handle(member_id)?;
        let mut account = handle.lock().expect("account lock");
        let position = account.positions.get_mut(symbol).ok_or_else(|| {
            ExchangeError::NoStockPosition {
                member: member_id,
                symbol: symbol.clone(),
            }
        })?;
        if position.available < quantity {
            return Err(ExchangeError::InsufficientQuantity {
                member: member_id,
                symbol: symbol.clone(),
                available: position.available,
                required: quantity,
            });
        }
        position.available -= quantity;
        position.reserved += quantity;
        drop(account);
        Ok(self.insert_reservation(Reservation {
            member_id,
            resource: ReservedResource::Shares {
                symbol: symbol.clone(),
            },
            remaining: quantity,
        }))
    }

    /// Return a reservation's unsettled remainder to available balance and
    /// drop the reservation (order cancelled, or IOC/FOK remainder).
    pub fn release(&self, reservation_id: ReservationId) -> Result<(), ExchangeError> {
        let reservation = self
            .reservations
            .lock()
            .expect("reservations lock")
            .remove(&reservation_id)
            .ok_or(ExchangeError::MissingReservation(reservation_id))?;
        if reservation.remaining <= Decimal::ZERO {
            return Ok(());
        }
        let handle = self.account_handle(reservation.member_id)?;
        let mut account = handle.lock().expect("account lock");
        match reservation.resource {
            ReservedResource::Cash { price_per_unit } => {
                let amount = reservation.remaining * price_per_unit;
                account.cash_reserved -= amount;
                account.cash_available += amount;
            }
            ReservedResource::Shares { symbol } => {
                let position = account.positions.entry(symbol).or_default();
                position.reserved -= reservation.remaining;
                position.available += reservation.remaining;
            }
        }
        debug!(
            "reservation released id={} member={}",
            reservation_id.0, reservation.member_id.0
        );
        Ok(())
    }

    /// Settle one trade atomically against both counterparties.
    ///
    /// Buyer leg: escrowed cash at the limit price converts to a realized
    /// debit at the trade price (price improvement refunds to available) and
    /// a position credit. Seller leg: escrowed shares debit and a cash
    /// credit. Both reservations must exist and cover the trade quantity;
    /// anything else is a fatal engine invariant violation.
    pub fn apply_trade(
        &self,
        trade: &Trade,
        buy_reservation: ReservationId,
        sell_reservation: ReservationId,
    ) -> Result<(), ExchangeError> {
        let (buyer, buy_limit_price, seller) = {
            let mut reservations = self.reservations.lock().expect("reservations lock");
            let buy = reservations
                .get(&buy_reservation)
                .ok_or(ExchangeError::MissingReservation(buy_reservation))?;
            let sell = reservations
                .get(&sell_reservation)
                .ok_or(ExchangeError::MissingReservation(sell_reservation))?;
            if buy.remaining < trade.quantity {
                return Err(ExchangeError::ReservationOverrun(buy_reservation));
            }
            if sell.remaining < trade.quantity {
                return Err(ExchangeError::ReservationOverrun(sell_reservation));
            }
            let buy_limit_price = match &buy.resource {
                ReservedResource::Cash { price_per_unit } => *price_per_unit,
                ReservedResource::Shares { .. } => {
                    return Err(ExchangeError::MissingReservation(buy_reservation))
                }
            };
            match &sell.resource {
                ReservedResource::Shares { symbol } if *symbol == trade.symbol => {}
                _ => return Err(ExchangeError::MissingReservation(sell_reservation)),
            }
            let buyer = buy.member_id;
            let seller = sell.member_id;
            let buy = reservations.get_mut(&buy_reservation).expect("checked");
            buy.remaining -= trade.quantity;
            if buy.remaining <= Decimal::ZERO {
                reservations.remove(&buy_reservation);
            }
            let sell = reservations.get_mut(&sell_reservation).expect("checked");
            sell.remaining -= trade.quantity;
            if sell.remaining <= Decimal::ZERO {
                reservations.remove(&sell_reservation);
            }
            (buyer, buy_limit_price, seller)
        };

        let escrow = trade.quantity * buy_limit_price;
        let notional = trade.notional();
        let refund = escrow - notional;

        if buyer == seller {
            // Self-trade: one account, both legs under a single lock.
            let handle = self.account_handle(buyer)?;
            let mut account = handle.lock().expect("account lock");
            account.cash_reserved -= escrow;
            account.cash_available += refund + notional;
            let position = account.positions.entry(trade.symbol.clone()).or_default();
            position.reserved -= trade.quantity;
            position.available += trade.quantity;
        } else {
            let buyer_handle = self.account_handle(buyer)?;
            let seller_handle = self.account_handle(seller)?;
            // Fixed global lock order: ascending member id prevents deadlock
            // against concurrent settlements from other instruments.
            let (mut buyer_account, mut seller_account) = if buyer < seller {
                let b = buyer_handle.lock().expect("account lock");
                let s = seller_handle.lock().expect("account lock");
                (b, s)
            } else {
                let s = seller_handle.lock().expect("account lock");
                let b = buyer_handle.lock().expect("account lock");
                (b, s)
            };
            buyer_account.cash_reserved -= escrow;
            buyer_account.cash_available += refund;
            buyer_account
                .positions
                .entry(trade.symbol.clone())
                .or_default()
                .available += trade.quantity;
            let seller_position = seller_account
                .positions
                .entry(trade.symbol.clone())
                .or_default();
            seller_position.reserved -= trade.quantity;
            seller_account.cash_available += notional;
        }

        debug!(
            "trade settled trade_id={} buyer={} seller={} price={} quantity={}",
            trade.trade_id.0, buyer.0, seller.0, trade.price, trade.quantity
        );
        Ok(())
    }

    /// Available (non-escrowed) cash for a member.
    pub fn cash_available(&self, member_id: MemberId) -> Result<Decimal, ExchangeError> {
        let handle = self.account_handle(member_id)?;
        let account = handle.lock().expect("account lock");
        Ok(account.cash_available)
    }

    /// Cash currently escrowed by open buy orders.
    pub fn cash_reserved(&self, member_id: MemberId) -> Result<Decimal, ExchangeError> {
        let handle = self.account_handle(member_id)?;
        let account = handle.lock().expect("account lock");
        Ok(account.cash_reserved)
    }

    /// Shares of `symbol` available to sell (excludes share escrow).
    pub fn position_available(
        &self,
        member_id: MemberId,
        symbol: &Symbol,
    ) -> Result<Decimal, ExchangeError> {
        let handle = self.account_handle(member_id)?;
        let account = handle.lock().expect("account lock");
        Ok(account
            .positions
            .get(symbol)
            .map(|p| p.available)
            .unwrap_or(Decimal::ZERO))
    }

    /// Total shares of `symbol` (available + reserved).
    pub fn position_total(
        &self,
        member_id: MemberId,
        symbol: &Symbol,
    ) -> Result<Decimal, ExchangeError> {
        let handle = self.account_handle(member_id)?;
        let account = handle.lock().expect("account lock");
        Ok(account
            .positions
            .get(symbol)
            .map(|p| p.total())
            .unwrap_or(Decimal::ZERO))
    }

    /// Export all accounts for persistence.
    pub fn snapshot(&self) -> Vec<AccountSnapshot> {
        let accounts = self.accounts.read().expect("accounts lock");
        let mut out: Vec<AccountSnapshot> = accounts
            .iter()
            .map(|(member_id, handle)| AccountSnapshot {
                member_id: *member_id,
                account: handle.lock().expect("account lock").clone(),
            })
            .collect();
        out.sort_by_key(|s| s.member_id);
        out
    }

    /// Restore accounts from a snapshot, folding escrow back into available
    /// balances. Reservations are rebuilt by re-reserving each resting
    /// order's remainder (see persistence module).
    pub fn restore(&self, snapshots: &[AccountSnapshot]) {
        let mut accounts = self.accounts.write().expect("accounts lock");
        accounts.clear();
        for snap in snapshots {
            let mut account = snap.account.clone();
            account.cash_available += account.cash_reserved;
            account.cash_reserved = Decimal::ZERO;
            for position in account.positions.values_mut() {
                position.available += position.reserved;
                position.reserved = Decimal::ZERO;
            }
            accounts.insert(snap.member_id, Arc::new(Mutex::new(account)));
        }
        self.reservations
            .lock()
            .expect("reservations lock")
            .clear();
    }

    fn account_handle(
        &self,
        member_id: MemberId,
    ) -> Result<Arc<Mutex<MemberAccount>>, ExchangeError> {
        self.accounts
            .read()
            .expect("accounts lock")
            .get(&member_id)
            .cloned()
            .ok_or(ExchangeError::UnknownMember(member_id))
    }

    fn insert_reservation(&self, reservation: Reservation) -> ReservationId {
        let id = ReservationId(self.next_reservation_id.fetch_add(1, Ordering::Relaxed));
        self.reservations
            .lock()
            .expect("reservations lock")
            .insert(id, reservation);
        id
    }
}

impl Default for SettlementLedger {
    fn default() -> Self {
        Self::new()
    }
}
