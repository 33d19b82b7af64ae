//! Skill-and-Region-Aware Matchmaking
//!
//! Per-(game, region) queue buckets processed on a fixed interval. The
//! skill tolerance window grows with an entry's wait time; entries waiting
//! long enough fall back to a cross-region pool gated by a static latency
//! table. Post-match rating deltas are a simple pairwise Elo adjustment.

pub mod rating;
pub mod service;

use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::game::state::PlayerId;
use crate::network::protocol::ServerFrame;

pub use service::{MatchmakingConfig, MatchmakingService};

/// Deployment regions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Region {
    /// North America east.
    NaEast,
    /// North America west.
    NaWest,
    /// Europe west.
    EuWest,
    /// Europe central.
    EuCentral,
    /// Asia-Pacific southeast.
    ApSoutheast,
}

impl Region {
    /// All regions, for cross-region pooling.
    pub const ALL: [Region; 5] = [
        Region::NaEast,
        Region::NaWest,
        Region::EuWest,
        Region::EuCentral,
        Region::ApSoutheast,
    ];

    /// Static round-trip latency estimate between two regions (ms).
    ///
    /// Coarse numbers for pairing decisions only; real probes belong to an
    /// edge service, not the matchmaker.
    pub fn latency_ms(self, other: Region) -> u32 {
        use Region::*;
        if self == other {
            return 20;
        }
        match (self.min(other), self.max(other)) {
            (NaEast, NaWest) => 70,
            (NaEast, EuWest) => 90,
            (NaEast, EuCentral) => 110,
            (NaEast, ApSoutheast) => 210,
            (NaWest, EuWest) => 130,
            (NaWest, EuCentral) => 155,
            (NaWest, ApSoutheast) => 120,
            (EuWest, EuCentral) => 30,
            (EuWest, ApSoutheast) => 160,
            (EuCentral, ApSoutheast) => 170,
            _ => 200,
        }
    }
}

/// One waiting player in a queue bucket.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    /// Player identifier.
    pub player_id: PlayerId,
    /// Display name, carried into the formed room.
    pub display_name: String,
    /// Avatar, carried into the formed room.
    pub avatar: String,
    /// Game queued for.
    pub game_id: String,
    /// Self-reported skill rating.
    pub skill_rating: f64,
    /// Rating deviation/uncertainty.
    pub skill_deviation: f64,
    /// Home region.
    pub region: Region,
    /// Requested mode; only same-mode entries match.
    pub mode: String,
    /// Requested match size.
    pub max_players: usize,
    /// When the entry was enqueued.
    pub enqueued_at: Instant,
    /// Non-owning handle to the player's connection.
    pub sender: mpsc::Sender<ServerFrame>,
}

/// Matchmaking queue errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The player already has a queue entry.
    #[error("Already in matchmaking queue")]
    AlreadyQueued,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_is_symmetric() {
        for a in Region::ALL {
            for b in Region::ALL {
                assert_eq!(a.latency_ms(b), b.latency_ms(a));
            }
        }
    }

    #[test]
    fn same_region_is_cheapest() {
        for region in Region::ALL {
            for other in Region::ALL {
                if region != other {
                    assert!(region.latency_ms(region) < region.latency_ms(other));
                }
            }
        }
    }

    #[test]
    fn region_wire_names_are_kebab_case() {
        let json = serde_json::to_string(&Region::NaEast).unwrap();
        assert_eq!(json, r#""na-east""#);
        let parsed: Region = serde_json::from_str(r#""ap-southeast""#).unwrap();
        assert_eq!(parsed, Region::ApSoutheast);
    }
}
