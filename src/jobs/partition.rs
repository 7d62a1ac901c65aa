use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::config::ConfigError;

/// Inputs of up to `up_to` addresses get `partitions` workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScalingTier {
    pub up_to: usize,
    pub partitions: usize,
}

const fn tier(up_to: usize, partitions: usize) -> ScalingTier {
    ScalingTier { up_to, partitions }
}

const DEFAULT_TIERS: [ScalingTier; 4] = [tier(10, 1), tier(50, 2), tier(200, 4), tier(500, 8)];

/// Deterministic, monotonic mapping from input size to worker count.
///
/// Constructed only through [`ScalingPolicy::new`], which rejects tables where
/// a larger input could get fewer workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalingPolicy {
    tiers: Vec<ScalingTier>,
    overflow_partitions: usize,
    max_partitions: usize,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            tiers: DEFAULT_TIERS.to_vec(),
            overflow_partitions: 16,
            max_partitions: 16,
        }
    }
}

impl ScalingPolicy {
    pub fn new(
        tiers: Vec<ScalingTier>,
        overflow_partitions: usize,
        max_partitions: usize,
    ) -> Result<Self, ConfigError> {
        if max_partitions == 0 {
            return Err(ConfigError::invalid("max_partitions must be at least 1"));
        }
        let mut previous: Option<ScalingTier> = None;
        for tier in &tiers {
            if tier.partitions == 0 {
                return Err(ConfigError::invalid(format!(
                    "tier up to {} has zero partitions",
                    tier.up_to
                )));
            }
            if let Some(prev) = previous {
                if tier.up_to <= prev.up_to {
                    return Err(ConfigError::invalid("scaling tiers must be sorted by size"));
                }
                if tier.partitions < prev.partitions {
                    return Err(ConfigError::invalid(format!(
                        "scaling tiers must not decrease ({} > {} at size {})",
                        prev.partitions, tier.partitions, tier.up_to
                    )));
                }
            }
            previous = Some(*tier);
        }
        if let Some(last) = previous {
            if overflow_partitions < last.partitions {
                return Err(ConfigError::invalid(
                    "overflow_partitions must not be below the last tier",
                ));
            }
        }
        if overflow_partitions == 0 {
            return Err(ConfigError::invalid("overflow_partitions must be at least 1"));
        }
        Ok(Self {
            tiers,
            overflow_partitions,
            max_partitions,
        })
    }

    pub fn tiers(&self) -> &[ScalingTier] {
        &self.tiers
    }

    pub fn overflow_partitions(&self) -> usize {
        self.overflow_partitions
    }

    pub fn max_partitions(&self) -> usize {
        self.max_partitions
    }

    /// Worker count for `total` addresses. Never more workers than addresses.
    pub fn partitions_for(&self, total: usize) -> usize {
        let from_table = self
            .tiers
            .iter()
            .find(|tier| total <= tier.up_to)
            .map_or(self.overflow_partitions, |tier| tier.partitions);
        from_table.min(self.max_partitions).min(total)
    }

    /// Contiguous chunks whose sizes differ by at most one; the first
    /// `total % count` chunks take the extra address.
    pub fn split(&self, addresses: Vec<Address>) -> Vec<Vec<Address>> {
        let total = addresses.len();
        let count = self.partitions_for(total);
        if count == 0 {
            return Vec::new();
        }
        let base = total / count;
        let remainder = total % count;

        let mut rest = addresses.into_iter();
        (0..count)
            .map(|idx| {
                let size = base + usize::from(idx < remainder);
                rest.by_ref().take(size).collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn addresses(n: usize) -> Vec<Address> {
        (0..n)
            .map(|i| Address::normalize(&format!("user{i}@example.com")))
            .collect()
    }

    #[test]
    fn default_table() {
        let policy = ScalingPolicy::default();
        assert_eq!(policy.partitions_for(0), 0);
        assert_eq!(policy.partitions_for(7), 1);
        assert_eq!(policy.partitions_for(10), 1);
        assert_eq!(policy.partitions_for(11), 2);
        assert_eq!(policy.partitions_for(200), 4);
        assert_eq!(policy.partitions_for(500), 8);
        assert_eq!(policy.partitions_for(10_000), 16);
    }

    #[test]
    fn seven_addresses_make_one_partition() {
        let chunks = ScalingPolicy::default().split(addresses(7));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 7);
    }

    #[test]
    fn split_keeps_order_and_puts_remainder_first() {
        let policy = ScalingPolicy::new(vec![tier(100, 3)], 3, 3).expect("valid policy");
        let chunks = policy.split(addresses(11));
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![4, 4, 3]);
        assert_eq!(chunks[1][0].as_str(), "user4@example.com");
    }

    #[test]
    fn max_caps_the_table() {
        let policy = ScalingPolicy::new(DEFAULT_TIERS.to_vec(), 16, 4).expect("valid policy");
        assert_eq!(policy.partitions_for(1_000), 4);
    }

    #[test]
    fn rejects_decreasing_tiers() {
        assert!(ScalingPolicy::new(vec![tier(10, 4), tier(20, 2)], 4, 8).is_err());
        assert!(ScalingPolicy::new(vec![tier(10, 4)], 2, 8).is_err());
        assert!(ScalingPolicy::new(vec![tier(10, 1)], 1, 0).is_err());
    }

    proptest! {
        #[test]
        fn split_sums_to_total_and_is_balanced(total in 0usize..1_200) {
            let chunks = ScalingPolicy::default().split(addresses(total));
            let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
            prop_assert_eq!(sizes.iter().sum::<usize>(), total);
            if let (Some(min), Some(max)) = (sizes.iter().min(), sizes.iter().max()) {
                prop_assert!(max - min <= 1);
                prop_assert!(*min >= 1);
            }
        }

        #[test]
        fn partition_count_is_monotonic(a in 0usize..5_000, b in 0usize..5_000) {
            let policy = ScalingPolicy::default();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(policy.partitions_for(lo) <= policy.partitions_for(hi));
        }
    }
}
