//! Deterministic random streams.
//!
//! Every virtual user draws from its own independent streams, one per
//! purpose, all derived from the session seed. Network jitter draws from a
//! stream of its own so that retries never perturb line content.

use rand::{SeedableRng, rngs::StdRng};

use crate::VuId;

/// What a random stream is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// Line content
    Lines,
    /// Routing of lines to streams
    Streams,
    /// Backoff jitter
    Jitter,
}

impl Purpose {
    fn salt(self) -> u64 {
        match self {
            Purpose::Lines => 0x6c69_6e65,
            Purpose::Streams => 0x7374_7265,
            Purpose::Jitter => 0x6a69_7474,
        }
    }
}

/// Derives per virtual user random streams from a single seed.
#[derive(Debug, Clone, Copy)]
pub struct Pool {
    seed: u64,
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

impl Pool {
    /// Create a new [`Pool`].
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// The session seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// The stream for `purpose` of virtual user `vu`. Calling this twice with
    /// the same arguments yields two generators producing the same sequence.
    #[must_use]
    pub fn stream(&self, vu: VuId, purpose: Purpose) -> StdRng {
        let state = splitmix64(self.seed);
        let state = splitmix64(state ^ vu.get());
        let state = splitmix64(state ^ purpose.salt());
        StdRng::seed_from_u64(state)
    }
}

#[cfg(test)]
mod test {
    use rand::Rng;

    use super::{Pool, Purpose};
    use crate::VuId;

    fn draw(pool: Pool, vu: u64, purpose: Purpose) -> Vec<u64> {
        let mut rng = pool.stream(VuId::new(vu), purpose);
        (0..16).map(|_| rng.random()).collect()
    }

    #[test]
    fn same_seed_same_streams() {
        assert_eq!(
            draw(Pool::new(65), 0, Purpose::Lines),
            draw(Pool::new(65), 0, Purpose::Lines)
        );
    }

    #[test]
    fn streams_are_independent() {
        let pool = Pool::new(65);
        let lines = draw(pool, 0, Purpose::Lines);
        assert_ne!(lines, draw(pool, 1, Purpose::Lines));
        assert_ne!(lines, draw(pool, 0, Purpose::Streams));
        assert_ne!(lines, draw(pool, 0, Purpose::Jitter));
        assert_ne!(lines, draw(Pool::new(66), 0, Purpose::Lines));
    }
}
