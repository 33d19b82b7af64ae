//! Inline Anti-Cheat Validation
//!
//! Runs on the input path of every authoritative server. Validation itself
//! is pure in-memory work; flag persistence and the auto-ban check run on
//! spawned tasks so the tick loop never waits on the store.

use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::anticheat::{AntiCheatFlag, FlagKind};
use crate::external::metrics::MetricsCollector;
use crate::external::store::{FlagStore, PlayerStore};
use crate::game::state::{PlayerId, Vec2};

/// Tunables for inline validation and auto-ban.
#[derive(Clone, Debug)]
pub struct AntiCheatConfig {
    /// Rolling 1-second input budget before a spam flag (not a rejection).
    pub max_inputs_per_sec: usize,
    /// Server-enforced maximum displacement per tick.
    pub max_move_per_tick: f32,
    /// Teleport threshold as a multiple of `max_move_per_tick`.
    pub teleport_factor: f32,
    /// Maximum absolute score delta per action.
    pub max_score_per_action: i64,
    /// Open critical flags inside `ban_window` that trigger an auto-ban.
    pub ban_threshold: usize,
    /// Trailing window for the auto-ban count.
    pub ban_window: chrono::Duration,
    /// Length of an automatic suspension.
    pub suspension: chrono::Duration,
}

impl Default for AntiCheatConfig {
    fn default() -> Self {
        Self {
            max_inputs_per_sec: 30,
            max_move_per_tick: 10.0,
            teleport_factor: 3.0,
            max_score_per_action: 100,
            ban_threshold: 3,
            ban_window: chrono::Duration::minutes(10),
            suspension: chrono::Duration::hours(24),
        }
    }
}

/// A rejected input: the kind of violation and what was observed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheatRejection {
    /// Violation category.
    pub kind: FlagKind,
    /// Observation details, as recorded on the flag.
    pub details: String,
}

#[derive(Default)]
struct PlayerTracking {
    input_times: VecDeque<Instant>,
    last_spam_flag: Option<Instant>,
    last_position: Option<Vec2>,
    win_times: VecDeque<Instant>,
}

/// Cross-cutting anti-cheat service; one per process, shared by all rooms.
#[derive(Clone)]
pub struct AntiCheatService {
    config: AntiCheatConfig,
    flags: Arc<dyn FlagStore>,
    players: Arc<dyn PlayerStore>,
    metrics: MetricsCollector,
    tracking: Arc<Mutex<HashMap<PlayerId, PlayerTracking>>>,
    banned: Arc<Mutex<HashSet<PlayerId>>>,
}

impl AntiCheatService {
    /// Create a service over the given stores.
    pub fn new(
        config: AntiCheatConfig,
        flags: Arc<dyn FlagStore>,
        players: Arc<dyn PlayerStore>,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            config,
            flags,
            players,
            metrics,
            tracking: Arc::new(Mutex::new(HashMap::new())),
            banned: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Service configuration.
    pub fn config(&self) -> &AntiCheatConfig {
        &self.config
    }

    /// Note one inbound input for the player's rolling rate window.
    ///
    /// Spam is flagged, never rejected: the input still applies.
    pub fn record_input(&self, player_id: PlayerId, match_id: &str) {
        let now = Instant::now();
        let over_limit = {
            let mut tracking = self.tracking.lock().unwrap_or_else(|e| e.into_inner());
            let entry = tracking.entry(player_id).or_default();
            entry.input_times.push_back(now);
            while let Some(front) = entry.input_times.front() {
                if now.duration_since(*front) > Duration::from_secs(1) {
                    entry.input_times.pop_front();
                } else {
                    break;
                }
            }
            if entry.input_times.len() > self.config.max_inputs_per_sec {
                // One flag per second of sustained spam, not one per input.
                let recently_flagged = entry
                    .last_spam_flag
                    .map(|t| now.duration_since(t) < Duration::from_secs(1))
                    .unwrap_or(false);
                if !recently_flagged {
                    entry.last_spam_flag = Some(now);
                    Some(entry.input_times.len())
                } else {
                    None
                }
            } else {
                None
            }
        };

        if let Some(rate) = over_limit {
            self.record_flag(
                AntiCheatFlag::warning(
                    player_id,
                    FlagKind::InputSpam,
                    format!("{} inputs in 1s (limit {})", rate, self.config.max_inputs_per_sec),
                )
                .in_match(match_id),
            );
        }
    }

    /// Validate a movement delta against the per-tick maximum and the
    /// teleport threshold. On success the player's last known position is
    /// updated to the resulting position.
    pub fn validate_move(
        &self,
        player_id: PlayerId,
        match_id: &str,
        current: Vec2,
        dx: f32,
        dy: f32,
    ) -> Result<(), CheatRejection> {
        let displacement = Vec2::new(dx, dy).length();
        let max_move = self.config.max_move_per_tick;
        let teleport_at = max_move * self.config.teleport_factor;
        let target = current + Vec2::new(dx, dy);

        if displacement > max_move {
            let rejection = CheatRejection {
                kind: FlagKind::SpeedHack,
                details: format!("displacement {:.1} exceeds max {:.1}", displacement, max_move),
            };
            self.reject(player_id, match_id, &rejection);
            return Err(rejection);
        }

        // Teleport check is relative to the last position this service saw
        // applied, catching clients that desynchronize their own base.
        let last_known = {
            let mut tracking = self.tracking.lock().unwrap_or_else(|e| e.into_inner());
            let entry = tracking.entry(player_id).or_default();
            entry.last_position.unwrap_or(current)
        };
        let jump = last_known.distance_to(target);
        if jump > teleport_at {
            let rejection = CheatRejection {
                kind: FlagKind::Teleport,
                details: format!("jump {:.1} exceeds teleport threshold {:.1}", jump, teleport_at),
            };
            self.reject(player_id, match_id, &rejection);
            return Err(rejection);
        }

        let mut tracking = self.tracking.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = tracking.get_mut(&player_id) {
            entry.last_position = Some(target);
        }
        Ok(())
    }

    /// Validate a score delta against the per-action ceiling.
    pub fn validate_score(
        &self,
        player_id: PlayerId,
        match_id: &str,
        points: i64,
    ) -> Result<(), CheatRejection> {
        if points.abs() > self.config.max_score_per_action {
            let rejection = CheatRejection {
                kind: FlagKind::ScoreHack,
                details: format!(
                    "score delta {} exceeds cap {}",
                    points, self.config.max_score_per_action
                ),
            };
            self.reject(player_id, match_id, &rejection);
            return Err(rejection);
        }
        Ok(())
    }

    /// Note a win for the trailing-window frequency checks.
    pub fn record_win(&self, player_id: PlayerId) {
        let mut tracking = self.tracking.lock().unwrap_or_else(|e| e.into_inner());
        let entry = tracking.entry(player_id).or_default();
        entry.win_times.push_back(Instant::now());
        while entry.win_times.len() > 256 {
            entry.win_times.pop_front();
        }
    }

    /// Wins recorded within the trailing `window`.
    pub fn wins_within(&self, player_id: PlayerId, window: Duration) -> usize {
        let now = Instant::now();
        let tracking = self.tracking.lock().unwrap_or_else(|e| e.into_inner());
        tracking
            .get(&player_id)
            .map(|entry| {
                entry
                    .win_times
                    .iter()
                    .filter(|t| now.duration_since(**t) <= window)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Drop all tracking for a disconnected player.
    pub fn forget(&self, player_id: PlayerId) {
        let mut tracking = self.tracking.lock().unwrap_or_else(|e| e.into_inner());
        tracking.remove(&player_id);
    }

    fn reject(&self, player_id: PlayerId, match_id: &str, rejection: &CheatRejection) {
        self.metrics.inputs_rejected_total.inc();
        debug!(
            player = %player_id.short(),
            kind = rejection.kind.as_str(),
            "input rejected: {}",
            rejection.details
        );
        self.record_flag(
            AntiCheatFlag::critical(player_id, rejection.kind, rejection.details.clone())
                .in_match(match_id),
        );
    }

    /// Persist a flag and re-evaluate the auto-ban, both off the hot path.
    pub fn record_flag(&self, flag: AntiCheatFlag) {
        self.metrics
            .flags_total
            .with_label_values(&[flag.kind.as_str()])
            .inc();

        let flags = self.flags.clone();
        let players = self.players.clone();
        let banned = self.banned.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            let player_id = flag.player_id;
            if let Err(e) = flags.append(flag).await {
                warn!(player = %player_id.short(), "failed to persist anti-cheat flag: {e}");
                return;
            }

            // Read back the persisted record to decide on an auto-ban; the
            // threshold must hold across every instance's flags, not just
            // what this process saw.
            let open = flags.open_critical_count(player_id, config.ban_window).await;
            if open < config.ban_threshold {
                return;
            }

            // First check-in wins; later evaluations see the player in the
            // banned set and do nothing, so the suspension lands once.
            let first = {
                let mut banned = banned.lock().unwrap_or_else(|e| e.into_inner());
                banned.insert(player_id)
            };
            if !first {
                return;
            }
            if players.suspension(player_id).await.is_some() {
                return;
            }

            let until = Utc::now() + config.suspension;
            match players.suspend(player_id, until).await {
                Ok(()) => warn!(
                    player = %player_id.short(),
                    %until,
                    open_flags = open,
                    "auto-ban applied"
                ),
                Err(e) => warn!(player = %player_id.short(), "auto-ban write failed: {e}"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::store::{MemoryFlagStore, MemoryPlayerStore};
    use tokio::time::{sleep, Duration as TokioDuration};

    fn service_with_stores() -> (AntiCheatService, Arc<MemoryFlagStore>, Arc<MemoryPlayerStore>) {
        let flags = Arc::new(MemoryFlagStore::new());
        let players = Arc::new(MemoryPlayerStore::new());
        let service = AntiCheatService::new(
            AntiCheatConfig::default(),
            flags.clone(),
            players.clone(),
            MetricsCollector::default(),
        );
        (service, flags, players)
    }

    #[tokio::test]
    async fn legal_move_passes_and_updates_last_position() {
        let (service, _, _) = service_with_stores();
        let player = PlayerId::new_v4();

        assert!(service
            .validate_move(player, "m1", Vec2::ZERO, 5.0, 0.0)
            .is_ok());
        // The follow-up move is judged from the updated base.
        assert!(service
            .validate_move(player, "m1", Vec2::new(5.0, 0.0), 5.0, 0.0)
            .is_ok());
    }

    #[tokio::test]
    async fn oversized_move_is_rejected_and_flagged() {
        let (service, flags, _) = service_with_stores();
        let player = PlayerId::new_v4();

        let err = service
            .validate_move(player, "m1", Vec2::ZERO, 50.0, 0.0)
            .unwrap_err();
        assert_eq!(err.kind, FlagKind::SpeedHack);

        sleep(TokioDuration::from_millis(50)).await;
        let recorded = flags.flags_for(player).await;
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].kind, FlagKind::SpeedHack);
        assert_eq!(recorded[0].match_id.as_deref(), Some("m1"));
    }

    #[tokio::test]
    async fn desynced_base_triggers_teleport() {
        let (service, _, _) = service_with_stores();
        let player = PlayerId::new_v4();

        // Establish a last-known position at the origin.
        assert!(service
            .validate_move(player, "m1", Vec2::ZERO, 1.0, 0.0)
            .is_ok());

        // A legal-looking delta from a base far from the last-known one.
        let err = service
            .validate_move(player, "m1", Vec2::new(500.0, 0.0), 1.0, 0.0)
            .unwrap_err();
        assert_eq!(err.kind, FlagKind::Teleport);
    }

    #[tokio::test]
    async fn score_cap_enforced() {
        let (service, _, _) = service_with_stores();
        let player = PlayerId::new_v4();

        assert!(service.validate_score(player, "m1", 100).is_ok());
        let err = service.validate_score(player, "m1", 101).unwrap_err();
        assert_eq!(err.kind, FlagKind::ScoreHack);
    }

    #[tokio::test]
    async fn input_spam_flags_without_rejecting() {
        let (service, flags, _) = service_with_stores();
        let player = PlayerId::new_v4();

        for _ in 0..40 {
            service.record_input(player, "m1");
        }

        sleep(TokioDuration::from_millis(50)).await;
        let recorded = flags.flags_for(player).await;
        assert_eq!(recorded.len(), 1, "sustained spam flags once per second");
        assert_eq!(recorded[0].kind, FlagKind::InputSpam);
    }

    #[tokio::test]
    async fn critical_flags_trigger_exactly_one_ban() {
        let (service, _, players) = service_with_stores();
        let player = PlayerId::new_v4();

        for _ in 0..5 {
            let _ = service.validate_move(player, "m1", Vec2::ZERO, 50.0, 0.0);
        }

        sleep(TokioDuration::from_millis(100)).await;
        let until = players.suspension(player).await;
        assert!(until.is_some(), "player should be suspended");

        // Re-running the check does not extend or duplicate the suspension.
        let first_until = until.unwrap();
        let _ = service.validate_move(player, "m1", Vec2::ZERO, 50.0, 0.0);
        sleep(TokioDuration::from_millis(100)).await;
        assert_eq!(players.suspension(player).await, Some(first_until));
    }

    #[tokio::test]
    async fn forget_drops_tracking() {
        let (service, _, _) = service_with_stores();
        let player = PlayerId::new_v4();

        service.record_win(player);
        assert_eq!(service.wins_within(player, Duration::from_secs(60)), 1);

        service.forget(player);
        assert_eq!(service.wins_within(player, Duration::from_secs(60)), 0);
    }
}
