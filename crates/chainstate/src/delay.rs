//! Chain-delay penalty for blocks that arrive far behind the active tip.

use zend_consensus::constants::CHAIN_DELAY_PENALTY_THRESHOLD;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DelayPolicy {
    pub enabled: bool,
    /// Height gap tolerated before a late block is penalised.
    pub threshold: i32,
}

impl Default for DelayPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: CHAIN_DELAY_PENALTY_THRESHOLD,
        }
    }
}

impl DelayPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Delay contributed by a block at `height` whose parent carries
    /// `parent_delay`, received while the active tip is at `active_height`.
    ///
    /// A penalised chain keeps growing its delay while it trails the active
    /// tip and pays it back one block at a time once it overtakes it.
    pub fn block_delay(
        &self,
        height: i32,
        parent_delay: i32,
        active_height: i32,
        initial_sync: bool,
    ) -> i32 {
        if !self.enabled || initial_sync {
            return 0;
        }
        let gap = active_height.saturating_sub(height);
        if parent_delay > 0 {
            if gap >= 0 {
                gap
            } else {
                -1
            }
        } else if gap > self.threshold {
            gap - self.threshold
        } else {
            0
        }
    }

    /// Cumulative delay of the new node; never negative.
    pub fn chain_delay(
        &self,
        height: i32,
        parent_delay: i32,
        active_height: i32,
        initial_sync: bool,
    ) -> i32 {
        let step = self.block_delay(height, parent_delay, active_height, initial_sync);
        parent_delay.saturating_add(step).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        let policy = DelayPolicy::default();
        assert_eq!(policy.block_delay(100, 0, 100, false), 0);
        assert_eq!(policy.block_delay(5, 0, 16, false), 11);
        assert_eq!(policy.block_delay(100, 20, 500, false), 400);
        assert_eq!(policy.block_delay(6, 11, 16, false), 10);
        assert_eq!(policy.chain_delay(6, 11, 16, false), 21);
        assert_eq!(policy.block_delay(17, 3, 16, false), -1);
        assert_eq!(policy.chain_delay(17, 3, 16, false), 2);
    }

    #[test]
    fn initial_sync_and_disabled_policy_never_penalise() {
        let policy = DelayPolicy::default();
        assert_eq!(policy.chain_delay(5, 0, 16, true), 0);
        assert_eq!(DelayPolicy::disabled().chain_delay(5, 0, 16, false), 0);
    }

    #[test]
    fn threshold_absorbs_small_gaps() {
        let policy = DelayPolicy {
            enabled: true,
            threshold: 3,
        };
        assert_eq!(policy.block_delay(13, 0, 16, false), 0);
        assert_eq!(policy.block_delay(12, 0, 16, false), 1);
    }

    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self, bound: i32) -> i32 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((self.0 >> 33) % bound as u64) as i32
        }
    }

    #[test]
    fn delay_is_monotonic_in_lateness() {
        let mut rng = Lcg(0x5eed);
        for _ in 0..2_000 {
            let threshold = rng.next(4);
            let policy = DelayPolicy {
                enabled: true,
                threshold,
            };
            let height = rng.next(10_000);
            let parent_delay = rng.next(50) - 10;
            let active = rng.next(10_000);
            let later = active + rng.next(100);

            let now = policy.chain_delay(height, parent_delay, active, false);
            let then = policy.chain_delay(height, parent_delay, later, false);
            assert!(now >= 0);
            assert!(then >= now, "h={height} p={parent_delay} a={active} later={later}");

            // A block at or ahead of the tip never introduces a new penalty.
            if parent_delay <= 0 && height >= active {
                assert_eq!(now, 0);
            }
        }
    }
}
