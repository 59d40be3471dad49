//! Load balancing strategy names
//!
//! [`BalanceType`] selects which strategy [`balance::new`](super::new) builds.
//! It parses from configuration strings and round-trips through serde.

use crate::error::BalanceError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Balance Type
// ============================================================================

/// Load balancing strategy for endpoint selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceType {
    /// Cyclic selection in registration order (default)
    #[default]
    RoundRobin,
    /// Smooth weighted rotation
    WeightedRoundRobin,
    /// Key affinity through a hash ring
    ConsistentHash,
    /// Fewest active, then idle, connections
    LeastConnection,
    /// Lowest `(active + 1) / weight`
    ShortestExpectedDelay,
    /// Fewest connections relative to weight
    WeightedLeastConnection,
    /// Any idle endpoint first, else shortest expected delay
    NeverQueue,
}

impl BalanceType {
    pub const ALL: [BalanceType; 7] = [
        BalanceType::RoundRobin,
        BalanceType::WeightedRoundRobin,
        BalanceType::ConsistentHash,
        BalanceType::LeastConnection,
        BalanceType::ShortestExpectedDelay,
        BalanceType::WeightedLeastConnection,
        BalanceType::NeverQueue,
    ];

    /// Canonical snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::WeightedRoundRobin => "weighted_round_robin",
            Self::ConsistentHash => "consistent_hash",
            Self::LeastConnection => "least_connection",
            Self::ShortestExpectedDelay => "shortest_expected_delay",
            Self::WeightedLeastConnection => "weighted_least_connection",
            Self::NeverQueue => "never_queue",
        }
    }

    /// Whether the strategy reads endpoint weights
    pub fn is_weighted(&self) -> bool {
        matches!(
            self,
            Self::WeightedRoundRobin
                | Self::ShortestExpectedDelay
                | Self::WeightedLeastConnection
                | Self::NeverQueue
        )
    }

    /// Whether `select` needs a request key
    pub fn needs_key(&self) -> bool {
        matches!(self, Self::ConsistentHash)
    }
}

impl FromStr for BalanceType {
    type Err = BalanceError;

    /// Parse from string (case-insensitive, `-` and `_` interchangeable)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        match normalized.as_str() {
            "round_robin" | "roundrobin" | "rr" => Ok(Self::RoundRobin),
            "weighted_round_robin" | "weightedroundrobin" | "wrr" => Ok(Self::WeightedRoundRobin),
            "consistent_hash" | "consistenthash" | "hash" | "ch" => Ok(Self::ConsistentHash),
            "least_connection" | "least_connections" | "leastconnection" | "lc" => {
                Ok(Self::LeastConnection)
            }
            "shortest_expected_delay" | "shortestexpecteddelay" | "sed" => {
                Ok(Self::ShortestExpectedDelay)
            }
            "weighted_least_connection" | "weighted_least_connections"
            | "weightedleastconnection" | "wlc" => Ok(Self::WeightedLeastConnection),
            "never_queue" | "neverqueue" | "nq" => Ok(Self::NeverQueue),
            _ => Err(BalanceError::UnknownType(s.to_string())),
        }
    }
}

impl std::fmt::Display for BalanceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_type_from_str() {
        assert_eq!(
            "round_robin".parse::<BalanceType>().unwrap(),
            BalanceType::RoundRobin
        );
        assert_eq!(
            "WRR".parse::<BalanceType>().unwrap(),
            BalanceType::WeightedRoundRobin
        );
        assert_eq!(
            "ConsistentHash".parse::<BalanceType>().unwrap(),
            BalanceType::ConsistentHash
        );
        assert_eq!(
            "least-connection".parse::<BalanceType>().unwrap(),
            BalanceType::LeastConnection
        );
        assert_eq!("sed".parse::<BalanceType>().unwrap(), BalanceType::ShortestExpectedDelay);
        assert_eq!("wlc".parse::<BalanceType>().unwrap(), BalanceType::WeightedLeastConnection);
        assert_eq!(" NQ ".parse::<BalanceType>().unwrap(), BalanceType::NeverQueue);

        let err = "random".parse::<BalanceType>().unwrap_err();
        assert!(matches!(err, BalanceError::UnknownType(name) if name == "random"));
    }

    #[test]
    fn test_display_round_trips() {
        for kind in BalanceType::ALL {
            assert_eq!(kind.to_string().parse::<BalanceType>().unwrap(), kind);
        }
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&BalanceType::WeightedLeastConnection).unwrap();
        assert_eq!(json, "\"weighted_least_connection\"");

        let kind: BalanceType = serde_json::from_str("\"never_queue\"").unwrap();
        assert_eq!(kind, BalanceType::NeverQueue);
        assert_eq!(BalanceType::default(), BalanceType::RoundRobin);
    }

    #[test]
    fn test_capabilities() {
        assert!(BalanceType::ShortestExpectedDelay.is_weighted());
        assert!(!BalanceType::LeastConnection.is_weighted());
        assert!(BalanceType::ConsistentHash.needs_key());
        assert!(!BalanceType::RoundRobin.needs_key());
    }
}
