use serde::Serialize;

/// How one payment was split across a member's obligations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Allocation {
    pub applied_penalty: u64,
    pub applied_fee: u64,
    /// Remainder credited to the member balance (over-payment).
    pub to_balance: u64,
    /// The monthly due was not covered and nothing went to penalties.
    pub is_partial: bool,
}

/// Split `payment` across outstanding penalties, then the monthly due, then
/// balance. Penalties always settle first; callers cannot reorder.
pub fn allocate(payment: u64, unpaid_penalties: u64, monthly_contribution: u64) -> Allocation {
    let applied_penalty = payment.min(unpaid_penalties);
    let remaining = payment - applied_penalty;

    let applied_fee = remaining.min(monthly_contribution);
    let to_balance = remaining - applied_fee;

    Allocation {
        applied_penalty,
        applied_fee,
        to_balance,
        is_partial: applied_fee < monthly_contribution && applied_penalty == 0,
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn penalty_then_fee_exact() {
        let a = allocate(15_000, 5_000, 10_000);
        assert_eq!(a.applied_penalty, 5_000);
        assert_eq!(a.applied_fee, 10_000);
        assert_eq!(a.to_balance, 0);
        assert!(!a.is_partial);
    }

    #[test]
    fn overpayment_goes_to_balance() {
        let a = allocate(25_000, 5_000, 10_000);
        assert_eq!(a.applied_penalty, 5_000);
        assert_eq!(a.applied_fee, 10_000);
        assert_eq!(a.to_balance, 10_000);
    }

    #[test]
    fn payment_swallowed_by_penalties_is_not_partial() {
        // Nothing reached the monthly due, but penalties took the payment.
        let a = allocate(3_000, 5_000, 10_000);
        assert_eq!(a.applied_penalty, 3_000);
        assert_eq!(a.applied_fee, 0);
        assert!(!a.is_partial);
    }

    #[test]
    fn short_payment_without_penalties_is_partial() {
        let a = allocate(4_000, 0, 10_000);
        assert_eq!(a.applied_fee, 4_000);
        assert!(a.is_partial);
    }

    #[test]
    fn zero_payment_follows_flag_definition() {
        let a = allocate(0, 0, 10_000);
        assert_eq!((a.applied_penalty, a.applied_fee, a.to_balance), (0, 0, 0));
        assert!(a.is_partial);

        let no_due = allocate(0, 0, 0);
        assert!(!no_due.is_partial);
    }

    proptest! {
        #[test]
        fn allocation_conserves_payment(
            p in 0u64..10_000_000,
            u in 0u64..10_000_000,
            d in 0u64..10_000_000,
        ) {
            let a = allocate(p, u, d);
            prop_assert_eq!(a.applied_penalty + a.applied_fee + a.to_balance, p);
        }

        #[test]
        fn allocation_respects_caps(
            p in 0u64..10_000_000,
            u in 0u64..10_000_000,
            d in 0u64..10_000_000,
        ) {
            let a = allocate(p, u, d);
            prop_assert!(a.applied_penalty <= u);
            prop_assert!(a.applied_fee <= d);
            // Nothing reaches the due while penalties remain unpaid.
            if a.applied_penalty < u {
                prop_assert_eq!(a.applied_fee, 0);
            }
            if a.applied_fee < d {
                prop_assert_eq!(a.to_balance, 0);
            }
        }
    }
}
