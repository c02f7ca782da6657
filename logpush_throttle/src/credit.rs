//! Credit accumulator
//!
//! The non-clock interior of a per-second [`crate::Scheduler`], about which we
//! can make claims without any notion of time beyond a number of seconds.

/// Accumulated entitlement for one rate dimension of one virtual user.
///
/// Each call to [`Credit::accrue`] adds `rate * elapsed` to the balance and
/// releases the integral part of it. The fractional remainder is kept, which
/// means the sum of everything released over any run is `rate * total_elapsed`
/// minus a balance that is always in `[0, 1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Credit {
    /// Units accrued per second.
    rate: f64,
    /// Fractional units owed but not yet released.
    balance: f64,
}

impl Credit {
    /// Create a new [`Credit`] with an empty balance.
    #[must_use]
    pub fn new(rate: f64) -> Self {
        Self { rate, balance: 0.0 }
    }

    /// The configured rate, in units per second.
    #[must_use]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// The fractional balance carried into the next accrual.
    #[must_use]
    pub fn balance(&self) -> f64 {
        self.balance
    }

    /// Accrue credit for `elapsed_seconds` and release the whole units owed.
    ///
    /// Negative, NaN or infinite elapsed time is treated as zero elapsed time,
    /// the balance is never driven below zero.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn accrue(&mut self, elapsed_seconds: f64) -> u64 {
        let elapsed = if elapsed_seconds.is_finite() && elapsed_seconds > 0.0 {
            elapsed_seconds
        } else {
            0.0
        };
        self.balance += self.rate * elapsed;
        let whole = self.balance.floor();
        self.balance -= whole;
        // Float subtraction can leave a hair under zero when `balance` was
        // integral to begin with.
        if self.balance < 0.0 {
            self.balance = 0.0;
        }
        whole as u64
    }
}

#[cfg(test)]
mod test {
    use proptest::{collection, prelude::*};

    use super::Credit;

    #[test]
    fn negative_elapsed_is_zero_elapsed() {
        let mut credit = Credit::new(50.0);
        assert_eq!(credit.accrue(0.5), 25);
        assert_eq!(credit.accrue(-3.0), 0);
        assert_eq!(credit.accrue(f64::NAN), 0);
        assert!(credit.balance() >= 0.0);
        assert_eq!(credit.accrue(0.5), 25);
    }

    #[test]
    fn fine_granularity_converges() {
        let mut credit = Credit::new(100.0);
        let mut total = 0;
        // Ten thousand ticks of a millisecond each make ten seconds.
        for _ in 0..10_000 {
            total += credit.accrue(0.001);
        }
        assert!((999..=1000).contains(&total), "released {total}");
    }

    // Over any sequence of jittery ticks the released total stays within one
    // unit of `rate * elapsed` and never exceeds it.
    proptest! {
        #[test]
        fn released_total_tracks_rate(
            rate in 1_u32..100_000_u32,
            ticks in collection::vec(0_u64..5_000_000_u64, 1..500)
        ) {
            let rate = f64::from(rate);
            let mut credit = Credit::new(rate);
            let mut released: u64 = 0;
            let mut elapsed_micros: u64 = 0;
            for micros in ticks {
                elapsed_micros += micros;
                released += credit.accrue(micros as f64 / 1_000_000.0);
            }
            let expected = rate * (elapsed_micros as f64 / 1_000_000.0);
            let released = released as f64;
            let slack = 1e-6 * expected.max(1.0);
            prop_assert!(released <= expected + slack, "released {released} > expected {expected}");
            prop_assert!(released >= expected - 1.0 - slack, "released {released} << expected {expected}");
            prop_assert!(credit.balance() >= 0.0 && credit.balance() < 1.0);
        }
    }
}
