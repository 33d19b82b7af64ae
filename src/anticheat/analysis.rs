//! Post-Match Anomaly Analysis
//!
//! Runs asynchronously after results are recorded. Flags abnormally short
//! matches and, for winners, improbable lifetime win rates and impossible
//! win frequencies inside trailing windows.

use std::time::Duration;
use tracing::debug;

use crate::anticheat::{AntiCheatFlag, FlagKind};
use crate::anticheat::service::AntiCheatService;
use crate::game::state::PlayerId;

/// Tunables for the post-match checks.
#[derive(Clone, Debug)]
pub struct AnalysisConfig {
    /// Matches shorter than this are flagged for every participant.
    pub min_match_duration: Duration,
    /// Lifetime win rate at or above this is flagged.
    pub win_rate_threshold: f64,
    /// Lifetime games required before the win-rate check applies.
    pub win_rate_min_games: u64,
    /// Maximum plausible wins within a trailing hour.
    pub wins_per_hour_cap: usize,
    /// Maximum plausible wins within a trailing minute.
    pub wins_per_minute_cap: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_match_duration: Duration::from_secs(10),
            win_rate_threshold: 0.95,
            win_rate_min_games: 20,
            wins_per_hour_cap: 60,
            wins_per_minute_cap: 3,
        }
    }
}

/// Post-match analyzer bound to the shared anti-cheat service.
pub struct PostMatchAnalyzer {
    config: AnalysisConfig,
    service: AntiCheatService,
    players: std::sync::Arc<dyn crate::external::store::PlayerStore>,
}

impl PostMatchAnalyzer {
    /// Create an analyzer.
    pub fn new(
        config: AnalysisConfig,
        service: AntiCheatService,
        players: std::sync::Arc<dyn crate::external::store::PlayerStore>,
    ) -> Self {
        Self {
            config,
            service,
            players,
        }
    }

    /// Analyze one finished match.
    ///
    /// Expected to run after the winner's result has been recorded on the
    /// player record, so the lifetime stats already include this match.
    pub async fn analyze(
        &self,
        match_id: &str,
        participants: &[PlayerId],
        winner: Option<PlayerId>,
        duration: Duration,
    ) {
        debug!(
            match_id,
            players = participants.len(),
            secs = duration.as_secs_f32(),
            "post-match analysis"
        );

        if duration < self.config.min_match_duration {
            for player_id in participants {
                self.service.record_flag(
                    AntiCheatFlag::warning(
                        *player_id,
                        FlagKind::ShortMatch,
                        format!("match lasted {:.1}s", duration.as_secs_f32()),
                    )
                    .in_match(match_id),
                );
            }
        }

        let Some(winner) = winner else {
            return;
        };

        self.service.record_win(winner);

        let hour_wins = self.service.wins_within(winner, Duration::from_secs(3600));
        let minute_wins = self.service.wins_within(winner, Duration::from_secs(60));
        if hour_wins > self.config.wins_per_hour_cap || minute_wins > self.config.wins_per_minute_cap
        {
            self.service.record_flag(
                AntiCheatFlag::critical(
                    winner,
                    FlagKind::WinFrequency,
                    format!(
                        "{} wins/hour, {} wins/minute (caps {}/{})",
                        hour_wins,
                        minute_wins,
                        self.config.wins_per_hour_cap,
                        self.config.wins_per_minute_cap
                    ),
                )
                .in_match(match_id),
            );
        }

        let stats = self.players.stats(winner).await;
        if stats.games >= self.config.win_rate_min_games {
            let rate = stats.wins as f64 / stats.games as f64;
            if rate >= self.config.win_rate_threshold {
                self.service.record_flag(
                    AntiCheatFlag::warning(
                        winner,
                        FlagKind::WinRate,
                        format!("{:.0}% over {} games", rate * 100.0, stats.games),
                    )
                    .in_match(match_id),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anticheat::service::AntiCheatConfig;
    use crate::external::metrics::MetricsCollector;
    use crate::external::store::{MemoryFlagStore, MemoryPlayerStore, PlayerStats, PlayerStore};
    use std::sync::Arc;
    use tokio::time::sleep;

    fn analyzer() -> (
        PostMatchAnalyzer,
        Arc<MemoryFlagStore>,
        Arc<MemoryPlayerStore>,
    ) {
        let flags = Arc::new(MemoryFlagStore::new());
        let players = Arc::new(MemoryPlayerStore::new());
        let service = AntiCheatService::new(
            AntiCheatConfig::default(),
            flags.clone(),
            players.clone(),
            MetricsCollector::default(),
        );
        (
            PostMatchAnalyzer::new(AnalysisConfig::default(), service, players.clone()),
            flags,
            players,
        )
    }

    #[tokio::test]
    async fn short_match_flags_every_participant() {
        let (analyzer, flags, _) = analyzer();
        let a = PlayerId::new_v4();
        let b = PlayerId::new_v4();

        analyzer
            .analyze("m1", &[a, b], None, Duration::from_secs(3))
            .await;

        sleep(Duration::from_millis(50)).await;
        assert_eq!(flags.flags_for(a).await.len(), 1);
        assert_eq!(flags.flags_for(b).await.len(), 1);
        assert_eq!(flags.flags_for(a).await[0].kind, FlagKind::ShortMatch);
    }

    #[tokio::test]
    async fn normal_match_is_clean() {
        let (analyzer, flags, _) = analyzer();
        let a = PlayerId::new_v4();
        let b = PlayerId::new_v4();

        analyzer
            .analyze("m1", &[a, b], Some(a), Duration::from_secs(120))
            .await;

        sleep(Duration::from_millis(50)).await;
        assert!(flags.flags_for(a).await.is_empty());
        assert!(flags.flags_for(b).await.is_empty());
    }

    #[tokio::test]
    async fn impossible_win_frequency_flagged() {
        let (analyzer, flags, _) = analyzer();
        let a = PlayerId::new_v4();
        let b = PlayerId::new_v4();

        for i in 0..5 {
            analyzer
                .analyze(
                    &format!("m{}", i),
                    &[a, b],
                    Some(a),
                    Duration::from_secs(60),
                )
                .await;
        }

        sleep(Duration::from_millis(50)).await;
        let recorded = flags.flags_for(a).await;
        assert!(recorded
            .iter()
            .any(|f| f.kind == FlagKind::WinFrequency));
    }

    #[tokio::test]
    async fn win_rate_needs_minimum_sample() {
        let (analyzer, flags, players) = analyzer();
        let a = PlayerId::new_v4();

        // 9/9 wins: perfect rate but below the sample floor.
        players
            .seed_stats(a, PlayerStats { games: 9, wins: 9 })
            .await;
        analyzer
            .analyze("m1", &[a], Some(a), Duration::from_secs(60))
            .await;
        sleep(Duration::from_millis(50)).await;
        assert!(flags
            .flags_for(a)
            .await
            .iter()
            .all(|f| f.kind != FlagKind::WinRate));

        // 30/29 wins: above both rate threshold and sample floor.
        players
            .seed_stats(a, PlayerStats { games: 30, wins: 29 })
            .await;
        analyzer
            .analyze("m2", &[a], Some(a), Duration::from_secs(60))
            .await;
        sleep(Duration::from_millis(50)).await;
        assert!(flags
            .flags_for(a)
            .await
            .iter()
            .any(|f| f.kind == FlagKind::WinRate));
    }
}
