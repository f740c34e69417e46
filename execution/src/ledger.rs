//! Balance arithmetic. Everything here is pure; persistence happens in [`crate::service`].
//!
//! All arithmetic is checked. A result outside the decimal range is
//! [`LedgerError::Overflow`], never a panic.

use tracing::debug;
use wagerbook_types::{Amount, HouseConfig, LedgerError, Multiplier, Outcome};

/// `a + b`, or [`LedgerError::Overflow`].
pub fn checked_sum(a: Amount, b: Amount) -> Result<Amount, LedgerError> {
    a.checked_add(b).ok_or(LedgerError::Overflow)
}

/// Signed change a bet makes to the player's balance.
pub fn outcome_delta(
    bet: Amount,
    multiplier: Multiplier,
    outcome: Outcome,
) -> Result<Amount, LedgerError> {
    let magnitude = bet
        .checked_mul(multiplier.as_amount())
        .ok_or(LedgerError::Overflow)?;
    Ok(match outcome {
        Outcome::Win => magnitude,
        Outcome::Loss => -magnitude,
    })
}

/// Balance after settling a bet. The caller must clamp `bet` with [`clamp_bet`] first.
pub fn apply_outcome(
    current: Amount,
    bet: Amount,
    multiplier: Multiplier,
    outcome: Outcome,
) -> Result<Amount, LedgerError> {
    checked_sum(current, outcome_delta(bet, multiplier, outcome)?)
}

/// Balance after an admin correction. Any signed change is accepted.
pub fn apply_admin_adjustment(current: Amount, change: Amount) -> Result<Amount, LedgerError> {
    checked_sum(current, change)
}

/// The house's net position: the negated sum of every player balance.
pub fn recompute_house_total<I>(balances: I) -> Result<Amount, LedgerError>
where
    I: IntoIterator<Item = Amount>,
{
    let sum = balances
        .into_iter()
        .try_fold(Amount::ZERO, checked_sum)?;
    Ok(-sum)
}

/// Validates a requested stake against the house limit.
///
/// Negative stakes are rejected. Stakes above the max bet are lowered to it.
pub fn clamp_bet(requested: Amount, config: &HouseConfig) -> Result<Amount, LedgerError> {
    if requested < Amount::ZERO {
        return Err(LedgerError::InvalidBet(requested));
    }
    let max_bet = config.max_bet();
    if requested > max_bet {
        debug!(%requested, %max_bet, "clamping bet to max bet");
        return Ok(max_bet);
    }
    Ok(requested)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn amount() -> impl Strategy<Value = Amount> {
        (any::<i32>(), 0u32..6).prop_map(|(mantissa, scale)| Amount::new(mantissa as i64, scale))
    }

    fn stake() -> impl Strategy<Value = Amount> {
        (0i64..1_000_000, 0u32..4).prop_map(|(mantissa, scale)| Amount::new(mantissa, scale))
    }

    fn multiplier() -> impl Strategy<Value = Multiplier> {
        prop_oneof![Just(Multiplier::X1), Just(Multiplier::X2)]
    }

    proptest! {
        #[test]
        fn win_adds_and_loss_subtracts(current in amount(), bet in stake(), m in multiplier()) {
            let scaled = bet * m.as_amount();
            prop_assert_eq!(apply_outcome(current, bet, m, Outcome::Win).unwrap(), current + scaled);
            prop_assert_eq!(apply_outcome(current, bet, m, Outcome::Loss).unwrap(), current - scaled);
        }

        #[test]
        fn win_then_equal_loss_restores_balance(current in amount(), bet in stake(), m in multiplier()) {
            let won = apply_outcome(current, bet, m, Outcome::Win).unwrap();
            prop_assert_eq!(apply_outcome(won, bet, m, Outcome::Loss).unwrap(), current);
        }

        #[test]
        fn zero_adjustment_is_identity(current in amount()) {
            prop_assert_eq!(apply_admin_adjustment(current, Amount::ZERO).unwrap(), current);
        }

        #[test]
        fn house_total_is_negated_sum(balances in proptest::collection::vec(amount(), 0..32)) {
            let sum: Amount = balances.iter().copied().sum();
            prop_assert_eq!(recompute_house_total(balances).unwrap(), -sum);
        }

        #[test]
        fn clamped_bet_never_exceeds_max(requested in stake(), max in stake()) {
            let config = HouseConfig::new(max).unwrap();
            let clamped = clamp_bet(requested, &config).unwrap();
            prop_assert!(clamped <= max);
            prop_assert!(clamped >= Amount::ZERO);
        }
    }

    #[test]
    fn test_empty_house_total_is_zero() {
        assert_eq!(recompute_house_total(Vec::new()).unwrap(), Amount::ZERO);
    }

    #[test]
    fn test_win_adjust_and_house_total() {
        let balance = apply_outcome(Amount::ZERO, dec!(5), Multiplier::X2, Outcome::Win).unwrap();
        assert_eq!(balance, dec!(10));
        let balance = apply_admin_adjustment(balance, dec!(-3)).unwrap();
        assert_eq!(balance, dec!(7));
        assert_eq!(recompute_house_total([balance]).unwrap(), dec!(-7));
    }

    #[test]
    fn test_clamp_bet_to_max() {
        let config = HouseConfig::new(dec!(2)).unwrap();
        assert_eq!(clamp_bet(dec!(5), &config).unwrap(), dec!(2));
        assert_eq!(clamp_bet(dec!(1.5), &config).unwrap(), dec!(1.5));
        assert_eq!(clamp_bet(Amount::ZERO, &config).unwrap(), Amount::ZERO);
        assert_eq!(
            clamp_bet(dec!(-1), &config),
            Err(LedgerError::InvalidBet(dec!(-1)))
        );
    }

    #[test]
    fn test_outcome_delta_sign() {
        assert_eq!(
            outcome_delta(dec!(0.75), Multiplier::X2, Outcome::Win).unwrap(),
            dec!(1.5)
        );
        assert_eq!(
            outcome_delta(dec!(0.75), Multiplier::X1, Outcome::Loss).unwrap(),
            dec!(-0.75)
        );
    }

    #[test]
    fn test_overflow_is_an_error() {
        assert_eq!(
            apply_admin_adjustment(Amount::MAX, dec!(1)),
            Err(LedgerError::Overflow)
        );
        assert_eq!(
            apply_admin_adjustment(Amount::MIN, dec!(-1)),
            Err(LedgerError::Overflow)
        );
        assert_eq!(
            outcome_delta(Amount::MAX, Multiplier::X2, Outcome::Win),
            Err(LedgerError::Overflow)
        );
        assert_eq!(
            apply_outcome(Amount::MAX, dec!(1), Multiplier::X1, Outcome::Win),
            Err(LedgerError::Overflow)
        );
        assert_eq!(
            recompute_house_total([Amount::MAX, Amount::MAX]),
            Err(LedgerError::Overflow)
        );
        // Values at the edge of the range still settle.
        assert_eq!(
            apply_outcome(Amount::MAX, dec!(1), Multiplier::X1, Outcome::Loss).unwrap(),
            Amount::MAX - dec!(1)
        );
        assert_eq!(recompute_house_total([Amount::MAX]).unwrap(), Amount::MIN);
    }
}
