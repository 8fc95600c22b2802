//! Refresh tiers: contiguous ranges of asset positions, each refreshed on
//! its own cadence by the markets and prices services.

use std::time::Duration;

use crate::errors::{ProxyError, Result};

/// A contiguous, 1-based inclusive range `[from, to]` with its own update
/// interval. For the markets family positions are pages, for the prices
/// family they are token ranks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tier {
    pub name: String,
    pub from: u32,
    pub to: u32,
    pub update_interval: Duration,
    /// Prices family only: also refresh supported-platform ids that no tier
    /// range covers (phase B of a tier tick).
    pub fetch_coinslist_ids: bool,
}

impl Tier {
    pub fn contains(&self, position: u32) -> bool {
        self.from <= position && position <= self.to
    }

    pub fn span(&self) -> u32 {
        self.to - self.from + 1
    }
}

/// A validated, `from`-sorted set of tiers for one family.
#[derive(Debug, Clone)]
pub struct TierSet {
    tiers: Vec<Tier>,
}

impl TierSet {
    /// Validates and sorts the tiers. Rejects empty names, inverted or
    /// zero-based ranges, non-positive intervals and overlapping ranges.
    pub fn new(family: &str, mut tiers: Vec<Tier>) -> Result<Self> {
        for tier in &tiers {
            if tier.name.trim().is_empty() {
                return Err(ProxyError::Config(format!(
                    "{family}: tier with empty name"
                )));
            }
            if tier.from < 1 {
                return Err(ProxyError::Config(format!(
                    "{family}: tier {:?} must start at position 1 or later",
                    tier.name
                )));
            }
            if tier.to < tier.from {
                return Err(ProxyError::Config(format!(
                    "{family}: tier {:?} has inverted range [{}, {}]",
                    tier.name, tier.from, tier.to
                )));
            }
            if tier.update_interval.is_zero() {
                return Err(ProxyError::Config(format!(
                    "{family}: tier {:?} has non-positive update interval",
                    tier.name
                )));
            }
        }

        tiers.sort_by_key(|t| t.from);
        for pair in tiers.windows(2) {
            if pair[1].from <= pair[0].to {
                return Err(ProxyError::Config(format!(
                    "{family}: tiers {:?} and {:?} overlap ([{}, {}] vs [{}, {}])",
                    pair[0].name, pair[1].name, pair[0].from, pair[0].to, pair[1].from,
                    pair[1].to
                )));
            }
        }

        Ok(Self { tiers })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tier> {
        self.tiers.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    /// The tier covering `position`, found by binary search on `from`.
    pub fn tier_for(&self, position: u32) -> Option<&Tier> {
        let idx = self.tiers.partition_point(|t| t.from <= position);
        if idx == 0 {
            return None;
        }
        let tier = &self.tiers[idx - 1];
        tier.contains(position).then_some(tier)
    }

    /// True when any tier range covers `position`.
    pub fn covers(&self, position: u32) -> bool {
        self.tier_for(position).is_some()
    }

    /// Highest covered position across all tiers.
    pub fn max_position(&self) -> u32 {
        self.tiers.last().map(|t| t.to).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(name: &str, from: u32, to: u32) -> Tier {
        Tier {
            name: name.to_string(),
            from,
            to,
            update_interval: Duration::from_secs(60),
            fetch_coinslist_ids: false,
        }
    }

    #[test]
    fn test_disjoint_tiers_accepted() {
        let set = TierSet::new("prices", vec![tier("hot", 1, 10), tier("warm", 11, 100)])
            .expect("disjoint tiers should validate");
        assert_eq!(set.len(), 2);
        assert_eq!(set.max_position(), 100);
    }

    #[test]
    fn test_overlapping_tiers_rejected() {
        let err = TierSet::new("prices", vec![tier("a", 1, 10), tier("b", 10, 20)])
            .expect_err("overlap must be rejected");
        assert!(err.to_string().contains("overlap"), "got: {err}");
    }

    #[test]
    fn test_overlap_detected_regardless_of_order() {
        let err = TierSet::new("markets", vec![tier("b", 5, 20), tier("a", 1, 6)])
            .expect_err("overlap must be rejected");
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn test_empty_name_rejected() {
        let err = TierSet::new("prices", vec![tier("  ", 1, 10)]).expect_err("empty name");
        assert!(err.to_string().contains("empty name"));
    }

    #[test]
    fn test_zero_from_rejected() {
        assert!(TierSet::new("prices", vec![tier("a", 0, 10)]).is_err());
    }

    #[test]
    fn test_inverted_range_rejected() {
        assert!(TierSet::new("prices", vec![tier("a", 10, 5)]).is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut t = tier("a", 1, 10);
        t.update_interval = Duration::ZERO;
        assert!(TierSet::new("prices", vec![t]).is_err());
    }

    #[test]
    fn test_tier_lookup_by_position() {
        let set = TierSet::new(
            "prices",
            vec![tier("hot", 1, 10), tier("warm", 11, 100), tier("cold", 101, 500)],
        )
        .unwrap();

        assert_eq!(set.tier_for(1).unwrap().name, "hot");
        assert_eq!(set.tier_for(10).unwrap().name, "hot");
        assert_eq!(set.tier_for(11).unwrap().name, "warm");
        assert_eq!(set.tier_for(500).unwrap().name, "cold");
        assert!(set.tier_for(501).is_none());
        assert!(!set.covers(501));
        assert!(set.covers(250));
    }

    #[test]
    fn test_lookup_in_gap_between_tiers() {
        let set = TierSet::new("prices", vec![tier("hot", 1, 10), tier("cold", 20, 30)]).unwrap();
        assert!(set.tier_for(15).is_none());
    }
}
