//! Logical version (election epoch) bookkeeping.

use spm_core::types::LVER_INVALID;

/// Relation between a recorded epoch and the pool's live `lver`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Epoch {
    /// Recorded in the current election
    Current,
    /// Recorded under an earlier (or fenced) election
    Stale {
        /// Epoch the reader holds
        recorded: i64,
        /// Epoch found in pool metadata
        live: i64,
    },
}

/// Caches the `lver` of the election this coordinator won.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionCounter {
    current: i64,
}

impl Default for VersionCounter {
    fn default() -> Self {
        Self {
            current: LVER_INVALID,
        }
    }
}

impl VersionCounter {
    /// Epoch for the next election, given the `lver` read from metadata.
    ///
    /// A fenced pool (`lver == -1`) elects to `0`.
    pub fn next(stored: i64) -> i64 {
        stored.saturating_add(1)
    }

    /// Record a won election
    pub fn commit(&mut self, lver: i64) {
        self.current = lver;
    }

    /// Forget the epoch after release
    pub fn reset(&mut self) {
        self.current = LVER_INVALID;
    }

    /// Epoch of the current election, `-1` when none
    pub fn current(&self) -> i64 {
        self.current
    }

    /// Compare a recorded epoch with the live one
    pub fn check(recorded: i64, live: i64) -> Epoch {
        if recorded == live {
            Epoch::Current
        } else {
            Epoch::Stale { recorded, live }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_pool_elects_to_zero() {
        assert_eq!(VersionCounter::next(LVER_INVALID), 0);
        assert_eq!(VersionCounter::next(0), 1);
        assert_eq!(VersionCounter::next(41), 42);
    }

    #[test]
    fn test_commit_and_reset() {
        let mut counter = VersionCounter::default();
        assert_eq!(counter.current(), LVER_INVALID);
        counter.commit(3);
        assert_eq!(counter.current(), 3);
        counter.reset();
        assert_eq!(counter.current(), LVER_INVALID);
    }

    #[test]
    fn test_stale_epoch_detection() {
        assert_eq!(VersionCounter::check(2, 2), Epoch::Current);
        assert_eq!(
            VersionCounter::check(1, 2),
            Epoch::Stale {
                recorded: 1,
                live: 2
            }
        );
    }
}
