//! Error taxonomy for submission, settlement, and engine invariants.
//!
//! User errors map onto [`ReturnStatus`] and carry no side effects. Fatal
//! variants indicate a bug in the engine itself (a reservation missing at
//! settlement, a crossed book at rest) and halt the affected instrument.

use crate::types::{MemberId, OrderId, ReservationId, ReturnStatus, Symbol};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ExchangeError {
    #[error("order quantity must be positive")]
    InvalidQuantity,

    #[error("limit price must be positive")]
    InvalidPrice,

    #[error("unknown symbol {0}")]
    UnknownSymbol(Symbol),

    #[error("unknown member {0:?}")]
    UnknownMember(MemberId),

    #[error("insufficient funds: member {member:?} has {available} available, needs {required}")]
    InsufficientFunds {
        member: MemberId,
        available: rust_decimal::Decimal,
        required: rust_decimal::Decimal,
    },

    #[error("insufficient quantity: member {member:?} holds {available} {symbol}, needs {required}")]
    InsufficientQuantity {
        member: MemberId,
        symbol: Symbol,
        available: rust_decimal::Decimal,
        required: rust_decimal::Decimal,
    },

    #[error("member {member:?} has no position in {symbol}")]
    NoStockPosition { member: MemberId, symbol: Symbol },

    #[error("instrument {0} is halted")]
    Halted(Symbol),

    /// A settlement referenced a reservation that does not exist. Engine bug.
    #[error("missing reservation {0:?} during settlement")]
    MissingReservation(ReservationId),

    /// A settlement consumed more than was reserved. Engine bug.
    #[error("reservation {0:?} overrun: settled more than reserved")]
    ReservationOverrun(ReservationId),

    /// Resting orders cross after processing finished. Engine bug.
    #[error("crossed book at rest for {0}")]
    CrossedBook(Symbol),

    /// The book holds an order the engine has no record of. Engine bug.
    #[error("resting order {0:?} has no engine record")]
    UntrackedRestingOrder(OrderId),
}

impl ExchangeError {
    /// Whether this condition indicates an engine invariant violation rather
    /// than bad input. Fatal errors halt the instrument's worker.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExchangeError::MissingReservation(_)
                | ExchangeError::ReservationOverrun(_)
                | ExchangeError::CrossedBook(_)
                | ExchangeError::UntrackedRestingOrder(_)
        )
    }

    /// Member-facing status for this error, preserving the brokerage
    /// account taxonomy.
    pub fn return_status(&self) -> ReturnStatus {
        match self {
            ExchangeError::InsufficientFunds { .. } => ReturnStatus::InsufficientFunds,
            ExchangeError::InsufficientQuantity { .. } => ReturnStatus::InsufficientQuantity,
            ExchangeError::NoStockPosition { .. } => ReturnStatus::NoStockPosition,
            _ => ReturnStatus::Fail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn fatal_errors_are_engine_bugs_only() {
        assert!(ExchangeError::MissingReservation(ReservationId(1)).is_fatal());
        assert!(ExchangeError::ReservationOverrun(ReservationId(1)).is_fatal());
        assert!(ExchangeError::CrossedBook(Symbol::from("AAPL")).is_fatal());
        assert!(!ExchangeError::InvalidQuantity.is_fatal());
        assert!(!ExchangeError::UnknownSymbol(Symbol::from("AAPL")).is_fatal());
    }

    #[test]
    fn return_status_mapping_preserves_taxonomy() {
        let err = ExchangeError::InsufficientFunds {
            member: MemberId(1),
            available: Decimal::from(10),
            required: Decimal::from(20),
        };
        assert_eq!(err.return_status(), ReturnStatus::InsufficientFunds);
        let err = ExchangeError::NoStockPosition {
            member: MemberId(1),
            symbol: Symbol::from("AAPL"),
        };
        assert_eq!(err.return_status(), ReturnStatus::NoStockPosition);
        assert_eq!(
            ExchangeError::InvalidQuantity.return_status(),
            ReturnStatus::Fail
        );
    }
}
