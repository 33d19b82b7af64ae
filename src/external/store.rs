//! Persistent Store Collaborators
//!
//! Traits for the external relational store. The realtime core only writes
//! anti-cheat flags, match outcomes and suspensions, and reads back the
//! little it needs (flag counts, lifetime stats, ratings). All writes from
//! hot paths are fire-and-forget; a failed write is logged, never fatal.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::anticheat::{AntiCheatFlag, Severity};
use crate::game::state::PlayerId;

/// Lifetime player statistics kept by the platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayerStats {
    /// Total completed matches.
    pub games: u64,
    /// Matches won.
    pub wins: u64,
}

/// Store for anti-cheat flags, keyed by player.
#[async_trait]
pub trait FlagStore: Send + Sync {
    /// Append a flag to the player's record.
    async fn append(&self, flag: AntiCheatFlag) -> anyhow::Result<()>;

    /// Count open critical flags for a player inside the trailing window.
    async fn open_critical_count(&self, player_id: PlayerId, window: Duration) -> usize;
}

/// Store for player records: stats, ratings, suspensions.
#[async_trait]
pub trait PlayerStore: Send + Sync {
    /// Lifetime stats for a player (zeroed default when unknown).
    async fn stats(&self, player_id: PlayerId) -> PlayerStats;

    /// Record a completed match for a player.
    async fn record_result(&self, player_id: PlayerId, won: bool) -> anyhow::Result<()>;

    /// Current skill rating, if the player has one on record.
    async fn rating(&self, player_id: PlayerId) -> Option<f64>;

    /// Write a skill rating.
    async fn set_rating(&self, player_id: PlayerId, rating: f64) -> anyhow::Result<()>;

    /// Record a suspension ending at `until`.
    async fn suspend(&self, player_id: PlayerId, until: DateTime<Utc>) -> anyhow::Result<()>;

    /// Active suspension end time, if any.
    async fn suspension(&self, player_id: PlayerId) -> Option<DateTime<Utc>>;
}

// =============================================================================
// IN-MEMORY IMPLEMENTATIONS
// =============================================================================

/// In-memory flag store. Default backend and test double.
#[derive(Default)]
pub struct MemoryFlagStore {
    flags: Mutex<Vec<AntiCheatFlag>>,
}

impl MemoryFlagStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// All flags recorded for a player, oldest first.
    pub async fn flags_for(&self, player_id: PlayerId) -> Vec<AntiCheatFlag> {
        let flags = self.flags.lock().await;
        flags
            .iter()
            .filter(|f| f.player_id == player_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl FlagStore for MemoryFlagStore {
    async fn append(&self, flag: AntiCheatFlag) -> anyhow::Result<()> {
        let mut flags = self.flags.lock().await;
        flags.push(flag);
        Ok(())
    }

    async fn open_critical_count(&self, player_id: PlayerId, window: Duration) -> usize {
        let cutoff = Utc::now() - window;
        let flags = self.flags.lock().await;
        flags
            .iter()
            .filter(|f| {
                f.player_id == player_id && f.severity == Severity::Critical && f.at >= cutoff
            })
            .count()
    }
}

#[derive(Default, Clone)]
struct PlayerRecord {
    stats: PlayerStats,
    rating: Option<f64>,
    suspended_until: Option<DateTime<Utc>>,
}

/// In-memory player store. Default backend and test double.
#[derive(Default)]
pub struct MemoryPlayerStore {
    records: Mutex<HashMap<PlayerId, PlayerRecord>>,
}

impl MemoryPlayerStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed lifetime stats for a player (test helper).
    pub async fn seed_stats(&self, player_id: PlayerId, stats: PlayerStats) {
        let mut records = self.records.lock().await;
        records.entry(player_id).or_default().stats = stats;
    }
}

#[async_trait]
impl PlayerStore for MemoryPlayerStore {
    async fn stats(&self, player_id: PlayerId) -> PlayerStats {
        let records = self.records.lock().await;
        records
            .get(&player_id)
            .map(|r| r.stats)
            .unwrap_or_default()
    }

    async fn record_result(&self, player_id: PlayerId, won: bool) -> anyhow::Result<()> {
        let mut records = self.records.lock().await;
        let record = records.entry(player_id).or_default();
        record.stats.games += 1;
        if won {
            record.stats.wins += 1;
        }
        Ok(())
    }

    async fn rating(&self, player_id: PlayerId) -> Option<f64> {
        let records = self.records.lock().await;
        records.get(&player_id).and_then(|r| r.rating)
    }

    async fn set_rating(&self, player_id: PlayerId, rating: f64) -> anyhow::Result<()> {
        let mut records = self.records.lock().await;
        records.entry(player_id).or_default().rating = Some(rating);
        Ok(())
    }

    async fn suspend(&self, player_id: PlayerId, until: DateTime<Utc>) -> anyhow::Result<()> {
        let mut records = self.records.lock().await;
        records.entry(player_id).or_default().suspended_until = Some(until);
        Ok(())
    }

    async fn suspension(&self, player_id: PlayerId) -> Option<DateTime<Utc>> {
        let records = self.records.lock().await;
        records
            .get(&player_id)
            .and_then(|r| r.suspended_until)
            .filter(|until| *until > Utc::now())
    }
}
