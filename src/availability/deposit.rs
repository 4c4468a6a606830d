use rust_decimal::{Decimal, RoundingStrategy};

use crate::model::*;

/// Reservation deposit for one booking. `amount + remaining == price`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deposit {
    pub amount: Decimal,
    pub remaining: Decimal,
}

/// Whether a deposit applies. `New` has no visit history to consult and is
/// treated like `All`.
pub fn is_required(config: &DepositConfig, client_requires_deposit: bool) -> bool {
    if !config.enabled {
        return false;
    }
    match config.scope {
        DepositScope::All | DepositScope::New => true,
        DepositScope::Specific => client_requires_deposit,
    }
}

pub fn compute(service: &Service, config: &DepositConfig, client_requires_deposit: bool) -> Option<Deposit> {
    if !is_required(config, client_requires_deposit) {
        return None;
    }
    let pct = Decimal::from(config.percentage.min(100));
    let amount = round2(service.price * pct / Decimal::ONE_HUNDRED);
    Some(Deposit {
        amount,
        remaining: service.price - amount,
    })
}

fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
