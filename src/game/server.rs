//! Authoritative Game Server
//!
//! One instance per active room. Owns the match state, runs the fixed-tick
//! simulation on its own cancellable interval task, validates and applies
//! buffered inputs, and broadcasts authoritative state with per-player input
//! acknowledgments for client reconciliation.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::anticheat::service::AntiCheatService;
use crate::game::input::{ActionType, GameAction, InputRecord, PlayerInputQueue};
use crate::game::snapshot::SnapshotRing;
use crate::game::state::{MatchPhase, MatchState, PlayerId, Vec2};
use crate::network::protocol::{server_time_ms, ServerFrame};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Game genre, selecting a tick-rate preset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameGenre {
    /// Fast action games: 60 Hz.
    Action,
    /// Mid-paced arcade games: 30 Hz.
    #[default]
    Arcade,
    /// Puzzle and turn-based games: 20 Hz.
    Puzzle,
}

impl GameGenre {
    /// Preset tick rate for the genre (Hz).
    pub fn tick_rate(&self) -> u32 {
        match self {
            GameGenre::Action => 60,
            GameGenre::Arcade => 30,
            GameGenre::Puzzle => 20,
        }
    }
}

/// Simulation configuration for one match.
#[derive(Clone, Debug)]
pub struct SimConfig {
    /// Tick rate (Hz).
    pub tick_rate: u32,
    /// Pre-match countdown length in ticks.
    pub countdown_ticks: u32,
    /// Projectile lifetime in ticks.
    pub projectile_ttl_ticks: u64,
    /// Round limit for turn-based games.
    pub round_limit: u32,
    /// Wall-clock ceiling for a match.
    pub max_duration: Duration,
    /// Snapshot ring capacity.
    pub snapshot_capacity: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::for_genre(GameGenre::Arcade, None)
    }
}

impl SimConfig {
    /// Build a config from a genre preset with an optional tick override.
    pub fn for_genre(genre: GameGenre, tick_rate_override: Option<u32>) -> Self {
        let tick_rate = tick_rate_override.unwrap_or_else(|| genre.tick_rate()).max(1);
        Self {
            tick_rate,
            countdown_ticks: tick_rate * 3,
            projectile_ttl_ticks: u64::from(tick_rate) * 3,
            round_limit: 50,
            max_duration: Duration::from_secs(600),
            snapshot_capacity: 64,
        }
    }
}

// =============================================================================
// ERRORS / RESULTS
// =============================================================================

/// Errors surfaced to the input path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    /// The match is not accepting inputs.
    #[error("Match is not running")]
    MatchNotRunning,
    /// The player is not part of this match.
    #[error("Player is not in this match")]
    UnknownPlayer,
    /// The player's input buffer is full.
    #[error("Too many pending inputs")]
    InputBufferFull,
}

/// Outcome of a finished match, handed back to the room layer.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    /// Room the match ran in.
    pub room_id: String,
    /// Game that was played.
    pub game_id: String,
    /// Every participant.
    pub participants: Vec<PlayerId>,
    /// Final scores.
    pub scores: BTreeMap<PlayerId, i64>,
    /// Placements: (player, place, score), best first.
    pub placements: Vec<(PlayerId, u32, i64)>,
    /// Winner, if the match was not a draw.
    pub winner: Option<PlayerId>,
    /// Wall-clock match length (playing phase only).
    pub duration: Duration,
}

/// Pluggable per-action-type validator. Runs before the built-in semantics;
/// `Err(reason)` rejects the input.
pub type ActionValidator =
    Box<dyn Fn(&MatchState, &InputRecord) -> Result<(), String> + Send + Sync>;

struct ServerInner {
    state: MatchState,
    snapshots: SnapshotRing,
    queues: BTreeMap<PlayerId, PlayerInputQueue>,
    acks: BTreeMap<PlayerId, u64>,
    senders: BTreeMap<PlayerId, mpsc::Sender<ServerFrame>>,
    validators: BTreeMap<ActionType, ActionValidator>,
    playing_since: Option<Instant>,
    destroyed: bool,
    outcome_sent: bool,
}

// =============================================================================
// AUTHORITATIVE SERVER
// =============================================================================

/// The per-room authoritative simulation.
pub struct AuthoritativeServer {
    room_id: String,
    game_id: String,
    config: SimConfig,
    inner: Arc<RwLock<ServerInner>>,
    anticheat: AntiCheatService,
    outcome_tx: mpsc::UnboundedSender<MatchOutcome>,
    task: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AuthoritativeServer {
    /// Create a server for a room. `players` is the join-ordered member list
    /// with each member's outbound channel.
    pub fn new(
        room_id: String,
        game_id: String,
        players: Vec<(PlayerId, mpsc::Sender<ServerFrame>)>,
        config: SimConfig,
        anticheat: AntiCheatService,
        outcome_tx: mpsc::UnboundedSender<MatchOutcome>,
    ) -> Self {
        let ids: Vec<PlayerId> = players.iter().map(|(id, _)| *id).collect();
        let mut state = MatchState::new(room_id.clone(), game_id.clone(), &ids);
        state.phase = MatchPhase::Countdown {
            ticks_remaining: config.countdown_ticks,
        };

        let queues = ids.iter().map(|id| (*id, PlayerInputQueue::new())).collect();
        let acks = ids.iter().map(|id| (*id, 0u64)).collect();
        let senders = players.into_iter().collect();

        Self {
            room_id,
            game_id,
            inner: Arc::new(RwLock::new(ServerInner {
                snapshots: SnapshotRing::new(config.snapshot_capacity),
                state,
                queues,
                acks,
                senders,
                validators: BTreeMap::new(),
                playing_since: None,
                destroyed: false,
                outcome_sent: false,
            })),
            config,
            anticheat,
            outcome_tx,
            task: std::sync::Mutex::new(None),
        }
    }

    /// Room this server belongs to.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Register a pluggable validator for an action type.
    pub async fn register_validator(&self, kind: ActionType, validator: ActionValidator) {
        let mut inner = self.inner.write().await;
        inner.validators.insert(kind, validator);
    }

    /// Spawn the tick loop. Each room gets its own interval timer; the task
    /// exits when the match finishes or the server is destroyed.
    pub fn start(self: &Arc<Self>) {
        let server = self.clone();
        let tick_duration = Duration::from_micros(1_000_000 / u64::from(self.config.tick_rate));

        let handle = tokio::spawn(async move {
            let mut ticker = interval(tick_duration);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                if server.run_tick().await {
                    break;
                }
            }

            debug!(room = %server.room_id, "tick loop stopped");
        });

        if let Ok(mut task) = self.task.lock() {
            *task = Some(handle);
        }
    }

    /// Buffer a player action for the next tick.
    pub async fn submit_action(
        &self,
        player_id: PlayerId,
        action: GameAction,
    ) -> Result<(), GameError> {
        let mut inner = self.inner.write().await;

        match inner.state.phase {
            MatchPhase::Countdown { .. } | MatchPhase::Playing => {}
            _ => return Err(GameError::MatchNotRunning),
        }

        if !inner.state.players.contains_key(&player_id) {
            return Err(GameError::UnknownPlayer);
        }

        self.anticheat.record_input(player_id, &self.room_id);

        let tick = inner.state.tick;
        let record = InputRecord {
            player_id,
            seq: action.seq,
            kind: action.kind,
            data: action.data,
            tick_received: tick,
            received_at: Instant::now(),
        };

        let queue = inner.queues.entry(player_id).or_default();
        if !queue.push(record) {
            return Err(GameError::InputBufferFull);
        }
        Ok(())
    }

    /// Run one simulation cycle. Returns true when the loop should stop.
    async fn run_tick(&self) -> bool {
        let mut inner = self.inner.write().await;
        if inner.destroyed {
            return true;
        }

        match inner.state.phase {
            MatchPhase::Waiting => {
                inner.state.phase = MatchPhase::Countdown {
                    ticks_remaining: self.config.countdown_ticks,
                };
                false
            }
            MatchPhase::Countdown { ticks_remaining } => {
                if ticks_remaining == 0 {
                    inner.state.phase = MatchPhase::Playing;
                    inner.playing_since = Some(Instant::now());
                    info!(room = %self.room_id, "match playing");
                } else {
                    inner.state.phase = MatchPhase::Countdown {
                        ticks_remaining: ticks_remaining - 1,
                    };
                }
                self.broadcast_state(&inner);
                false
            }
            MatchPhase::Paused => {
                self.broadcast_state(&inner);
                false
            }
            MatchPhase::Playing => {
                let finished = self.simulate_tick(&mut inner);
                self.broadcast_state(&inner);
                if finished {
                    self.finish(&mut inner);
                }
                finished
            }
            MatchPhase::Finished => {
                if !inner.outcome_sent {
                    self.finish(&mut inner);
                }
                true
            }
        }
    }

    /// One playing-phase cycle: snapshot, drain, validate/apply, maintain,
    /// evaluate end conditions. Returns true when the match ended.
    fn simulate_tick(&self, inner: &mut ServerInner) -> bool {
        // 1. Snapshot the pre-tick state for rollback.
        let ServerInner {
            ref mut snapshots,
            ref state,
            ..
        } = *inner;
        snapshots.push(state);

        // 2. Advance the tick counter: exactly +1 per processed cycle.
        inner.state.tick += 1;

        // 3. Drain and apply inputs: player iteration order is the sorted
        //    id order, each player's inputs in arrival order. Reproducible
        //    for the anti-cheat audit trail.
        let mut drained: Vec<InputRecord> = Vec::new();
        for queue in inner.queues.values_mut() {
            drained.extend(queue.drain());
        }

        let mut relays: Vec<(PlayerId, serde_json::Value)> = Vec::new();
        for record in drained {
            match self.apply_input(inner, &record) {
                Ok(result) => {
                    inner.acks.insert(record.player_id, record.seq);
                    relays.push((record.player_id, result));
                }
                Err(reason) => {
                    debug!(
                        room = %self.room_id,
                        player = %record.player_id.short(),
                        seq = record.seq,
                        kind = record.kind.as_str(),
                        "input rejected: {reason}"
                    );
                }
            }
        }

        // 4. Simulation maintenance: advance and expire transient entities.
        inner.state.step_entities();

        // Relay applied actions to the other members, best-effort.
        for (actor, result) in relays {
            let frame = ServerFrame::GameAction {
                player_id: actor,
                result,
            };
            for (member, sender) in &inner.senders {
                if *member != actor {
                    let _ = sender.try_send(frame.clone());
                }
            }
        }

        // 5. End conditions.
        let round_exceeded = inner.state.round >= self.config.round_limit;
        let eliminated = inner.state.players.len() >= 2 && inner.state.alive_count() <= 1;
        let overtime = inner
            .playing_since
            .map(|t| t.elapsed() >= self.config.max_duration)
            .unwrap_or(false);

        if round_exceeded || eliminated || overtime {
            inner.state.phase = MatchPhase::Finished;
            info!(
                room = %self.room_id,
                tick = inner.state.tick,
                round_exceeded,
                eliminated,
                overtime,
                "match ended"
            );
            return true;
        }
        false
    }

    /// Validate and apply a single input against the live state.
    fn apply_input(
        &self,
        inner: &mut ServerInner,
        record: &InputRecord,
    ) -> Result<serde_json::Value, String> {
        // Pluggable validator first. A panicking validator must not take the
        // tick down with it: the input is skipped and the tick completes.
        if let Some(validator) = inner.validators.get(&record.kind) {
            let state = &inner.state;
            let verdict = catch_unwind(AssertUnwindSafe(|| validator(state, record)));
            match verdict {
                Ok(Ok(())) => {}
                Ok(Err(reason)) => return Err(format!("validator: {reason}")),
                Err(_) => {
                    warn!(
                        room = %self.room_id,
                        kind = record.kind.as_str(),
                        "action validator panicked; input skipped"
                    );
                    return Err("validator panicked".into());
                }
            }
        }

        let player_id = record.player_id;
        let alive = inner
            .state
            .player(&player_id)
            .map(|p| p.alive)
            .ok_or_else(|| "player not in match".to_string())?;

        match record.kind {
            ActionType::Move => {
                if !alive {
                    return Err("player is eliminated".into());
                }
                let dx = field_f32(&record.data, "dx")?;
                let dy = field_f32(&record.data, "dy")?;
                let current = inner.state.player(&player_id).map(|p| p.position).unwrap_or(Vec2::ZERO);
                self.anticheat
                    .validate_move(player_id, &self.room_id, current, dx, dy)
                    .map_err(|r| r.details)?;
                let player = inner.state.player_mut(&player_id).ok_or("player not in match")?;
                player.velocity = Vec2::new(dx, dy);
                player.position = player.position + Vec2::new(dx, dy);
                Ok(serde_json::json!({
                    "type": "move",
                    "x": player.position.x,
                    "y": player.position.y,
                }))
            }
            ActionType::Shoot => {
                if !alive {
                    return Err("player is eliminated".into());
                }
                let dx = field_f32(&record.data, "dx")?;
                let dy = field_f32(&record.data, "dy")?;
                let position = inner.state.player(&player_id).map(|p| p.position).unwrap_or(Vec2::ZERO);
                let entity_id = inner.state.spawn_entity(
                    "projectile",
                    player_id,
                    position,
                    Vec2::new(dx, dy),
                    self.config.projectile_ttl_ticks,
                    record.data.clone(),
                );
                Ok(serde_json::json!({ "type": "shoot", "entityId": entity_id }))
            }
            ActionType::EndTurn => {
                if inner.state.current_turn_player() != Some(player_id) {
                    return Err("not your turn".into());
                }
                inner.state.advance_turn();
                Ok(serde_json::json!({
                    "type": "end_turn",
                    "turnIndex": inner.state.turn_index,
                    "round": inner.state.round,
                }))
            }
            ActionType::Custom => {
                let key = record
                    .data
                    .get("key")
                    .and_then(|v| v.as_str())
                    .ok_or("missing key")?
                    .to_string();
                let value = record.data.get("value").cloned().unwrap_or(serde_json::Value::Null);
                let player = inner.state.player_mut(&player_id).ok_or("player not in match")?;
                player.custom.insert(key.clone(), value);
                Ok(serde_json::json!({ "type": "custom", "key": key }))
            }
            ActionType::Score => {
                let points = record
                    .data
                    .get("points")
                    .and_then(|v| v.as_i64())
                    .ok_or("missing points")?;
                self.anticheat
                    .validate_score(player_id, &self.room_id, points)
                    .map_err(|r| r.details)?;
                let player = inner.state.player_mut(&player_id).ok_or("player not in match")?;
                player.score += points;
                Ok(serde_json::json!({ "type": "score", "score": player.score }))
            }
            ActionType::Unknown => Err("unknown action type".into()),
        }
    }

    /// Broadcast the authoritative state plus per-player acks. Unreachable
    /// members are skipped; delivery is best-effort, at most once.
    fn broadcast_state(&self, inner: &ServerInner) {
        let frame = ServerFrame::StateSync {
            tick: inner.state.tick,
            phase: inner.state.phase.as_str().to_string(),
            state: inner.state.clone(),
            acks: inner.acks.clone(),
            server_time: server_time_ms(),
        };
        for sender in inner.senders.values() {
            let _ = sender.try_send(frame.clone());
        }
    }

    /// Emit the match outcome exactly once.
    fn finish(&self, inner: &mut ServerInner) {
        if inner.outcome_sent {
            return;
        }
        inner.outcome_sent = true;
        inner.state.phase = MatchPhase::Finished;

        let placements = inner.state.placements();
        let winner = compute_winner(&inner.state, &placements);
        let outcome = MatchOutcome {
            room_id: self.room_id.clone(),
            game_id: self.game_id.clone(),
            participants: inner.state.players.keys().copied().collect(),
            scores: inner.state.scores(),
            placements,
            winner,
            duration: inner
                .playing_since
                .map(|t| t.elapsed())
                .unwrap_or_default(),
        };
        let _ = self.outcome_tx.send(outcome);
    }

    /// Roll the live state back to `tick` from the snapshot ring. The state
    /// object is replaced wholesale with an independent copy; returns false
    /// when the tick has been evicted.
    pub async fn rollback(&self, tick: u64) -> bool {
        let mut inner = self.inner.write().await;
        match inner.snapshots.restore(tick) {
            Some(snapshot) => {
                inner.state = snapshot;
                debug!(room = %self.room_id, tick, "state rolled back");
                true
            }
            None => false,
        }
    }

    /// Pause or resume the simulation; the tick counter holds while paused.
    pub async fn set_paused(&self, paused: bool) {
        let mut inner = self.inner.write().await;
        match (inner.state.phase, paused) {
            (MatchPhase::Playing, true) => inner.state.phase = MatchPhase::Paused,
            (MatchPhase::Paused, false) => inner.state.phase = MatchPhase::Playing,
            _ => {}
        }
    }

    /// Detach a member that left mid-match: drops its channel and marks the
    /// player eliminated so end conditions can fire.
    pub async fn player_left(&self, player_id: PlayerId) {
        let mut inner = self.inner.write().await;
        inner.senders.remove(&player_id);
        if let Some(player) = inner.state.player_mut(&player_id) {
            player.alive = false;
        }
    }

    /// Number of members still reachable.
    pub async fn connected_count(&self) -> usize {
        self.inner.read().await.senders.len()
    }

    /// Stop the timer and release state. Idempotent; safe at natural match
    /// end and forced teardown alike.
    pub async fn destroy(&self) {
        {
            let mut inner = self.inner.write().await;
            if inner.destroyed {
                return;
            }
            inner.destroyed = true;
            inner.state.phase = MatchPhase::Finished;
            inner.senders.clear();
        }
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
        debug!(room = %self.room_id, "authoritative server destroyed");
    }

    /// Clone of the current match state.
    pub async fn state_view(&self) -> MatchState {
        self.inner.read().await.state.clone()
    }

    /// Current phase.
    pub async fn phase(&self) -> MatchPhase {
        self.inner.read().await.state.phase
    }

    /// Current tick.
    pub async fn current_tick(&self) -> u64 {
        self.inner.read().await.state.tick
    }

    /// Per-player last-applied sequence numbers.
    pub async fn acks(&self) -> BTreeMap<PlayerId, u64> {
        self.inner.read().await.acks.clone()
    }

    /// Drive one cycle directly (test hook mirroring the loop body).
    #[cfg(test)]
    pub(crate) async fn tick_once(&self) -> bool {
        self.run_tick().await
    }
}

fn compute_winner(
    state: &MatchState,
    placements: &[(PlayerId, u32, i64)],
) -> Option<PlayerId> {
    // Elimination games: the last player standing wins outright.
    if state.players.len() >= 2 && state.alive_count() == 1 {
        return state.players.values().find(|p| p.alive).map(|p| p.id);
    }
    // Otherwise top score wins; an exact tie at the top is a draw.
    match placements {
        [] => None,
        [only] => Some(only.0),
        [first, second, ..] => {
            if first.2 > second.2 {
                Some(first.0)
            } else {
                None
            }
        }
    }
}

fn field_f32(data: &serde_json::Value, key: &str) -> Result<f32, String> {
    data.get(key)
        .and_then(|v| v.as_f64())
        .map(|v| v as f32)
        .ok_or_else(|| format!("missing {key}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anticheat::service::AntiCheatConfig;
    use crate::external::metrics::MetricsCollector;
    use crate::external::store::{MemoryFlagStore, MemoryPlayerStore};

    fn anticheat() -> AntiCheatService {
        AntiCheatService::new(
            AntiCheatConfig::default(),
            Arc::new(MemoryFlagStore::new()),
            Arc::new(MemoryPlayerStore::new()),
            MetricsCollector::default(),
        )
    }

    struct Fixture {
        server: Arc<AuthoritativeServer>,
        a: PlayerId,
        b: PlayerId,
        rx_a: mpsc::Receiver<ServerFrame>,
        outcome_rx: mpsc::UnboundedReceiver<MatchOutcome>,
    }

    async fn fixture() -> Fixture {
        let a = PlayerId::from_bytes([1; 16]);
        let b = PlayerId::from_bytes([2; 16]);
        let (tx_a, rx_a) = mpsc::channel(256);
        let (tx_b, _rx_b) = mpsc::channel(256);
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

        let mut config = SimConfig::for_genre(GameGenre::Arcade, None);
        config.countdown_ticks = 0;

        let server = Arc::new(AuthoritativeServer::new(
            "room-1".into(),
            "game-x".into(),
            vec![(a, tx_a), (b, tx_b)],
            config,
            anticheat(),
            outcome_tx,
        ));

        // Countdown of zero: first cycle flips to playing.
        server.tick_once().await;
        assert_eq!(server.phase().await, MatchPhase::Playing);

        Fixture {
            server,
            a,
            b,
            rx_a,
            outcome_rx,
        }
    }

    fn last_state_sync(rx: &mut mpsc::Receiver<ServerFrame>) -> Option<ServerFrame> {
        let mut last = None;
        while let Ok(frame) = rx.try_recv() {
            if matches!(frame, ServerFrame::StateSync { .. }) {
                last = Some(frame);
            }
        }
        last
    }

    #[tokio::test]
    async fn tick_is_monotonic_and_gap_free() {
        let f = fixture().await;
        assert_eq!(f.server.current_tick().await, 0);

        for expected in 1..=5 {
            f.server.tick_once().await;
            assert_eq!(f.server.current_tick().await, expected);
        }
    }

    #[tokio::test]
    async fn legal_move_applies_and_acks() {
        let mut f = fixture().await;
        f.server
            .submit_action(
                f.a,
                GameAction {
                    kind: ActionType::Move,
                    data: serde_json::json!({ "dx": 5.0, "dy": 0.0 }),
                    seq: 1,
                },
            )
            .await
            .unwrap();

        f.server.tick_once().await;

        let state = f.server.state_view().await;
        assert_eq!(state.player(&f.a).unwrap().position.x, 5.0);

        match last_state_sync(&mut f.rx_a) {
            Some(ServerFrame::StateSync { acks, .. }) => {
                assert_eq!(acks.get(&f.a), Some(&1));
            }
            other => panic!("expected state sync, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn oversized_move_is_rejected_without_moving() {
        let mut f = fixture().await;

        // Establish ack=1 with a legal move first.
        f.server
            .submit_action(
                f.a,
                GameAction {
                    kind: ActionType::Move,
                    data: serde_json::json!({ "dx": 5.0, "dy": 0.0 }),
                    seq: 1,
                },
            )
            .await
            .unwrap();
        f.server.tick_once().await;

        f.server
            .submit_action(
                f.a,
                GameAction {
                    kind: ActionType::Move,
                    data: serde_json::json!({ "dx": 50.0, "dy": 0.0 }),
                    seq: 2,
                },
            )
            .await
            .unwrap();
        f.server.tick_once().await;

        let state = f.server.state_view().await;
        assert_eq!(state.player(&f.a).unwrap().position.x, 5.0, "position unchanged");

        match last_state_sync(&mut f.rx_a) {
            Some(ServerFrame::StateSync { acks, .. }) => {
                assert_eq!(acks.get(&f.a), Some(&1), "rejected input not acked");
            }
            other => panic!("expected state sync, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn shoot_spawns_projectile_that_expires() {
        let f = fixture().await;
        f.server
            .submit_action(
                f.a,
                GameAction {
                    kind: ActionType::Shoot,
                    data: serde_json::json!({ "dx": 2.0, "dy": 0.0 }),
                    seq: 1,
                },
            )
            .await
            .unwrap();
        f.server.tick_once().await;
        assert_eq!(f.server.state_view().await.entities.len(), 1);

        for _ in 0..f.server.config.projectile_ttl_ticks + 1 {
            f.server.tick_once().await;
        }
        assert!(f.server.state_view().await.entities.is_empty());
    }

    #[tokio::test]
    async fn end_turn_requires_turn_ownership() {
        let f = fixture().await;

        // B moves first out of turn: rejected, turn unchanged.
        f.server
            .submit_action(
                f.b,
                GameAction {
                    kind: ActionType::EndTurn,
                    data: serde_json::Value::Null,
                    seq: 1,
                },
            )
            .await
            .unwrap();
        f.server.tick_once().await;
        let state = f.server.state_view().await;
        assert_eq!(state.turn_index, 0);
        assert_eq!(f.server.acks().await.get(&f.b), Some(&0));

        // A holds the turn and may end it.
        f.server
            .submit_action(
                f.a,
                GameAction {
                    kind: ActionType::EndTurn,
                    data: serde_json::Value::Null,
                    seq: 1,
                },
            )
            .await
            .unwrap();
        f.server.tick_once().await;
        assert_eq!(f.server.state_view().await.turn_index, 1);
    }

    #[tokio::test]
    async fn score_cap_rejects_excessive_delta() {
        let f = fixture().await;
        f.server
            .submit_action(
                f.a,
                GameAction {
                    kind: ActionType::Score,
                    data: serde_json::json!({ "points": 101 }),
                    seq: 1,
                },
            )
            .await
            .unwrap();
        f.server.tick_once().await;
        assert_eq!(f.server.state_view().await.player(&f.a).unwrap().score, 0);
    }

    #[tokio::test]
    async fn custom_data_write() {
        let f = fixture().await;
        f.server
            .submit_action(
                f.a,
                GameAction {
                    kind: ActionType::Custom,
                    data: serde_json::json!({ "key": "loadout", "value": ["laser"] }),
                    seq: 1,
                },
            )
            .await
            .unwrap();
        f.server.tick_once().await;
        let state = f.server.state_view().await;
        assert_eq!(
            state.player(&f.a).unwrap().custom.get("loadout"),
            Some(&serde_json::json!(["laser"]))
        );
    }

    #[tokio::test]
    async fn panicking_validator_skips_input_but_completes_tick() {
        let f = fixture().await;
        f.server
            .register_validator(
                ActionType::Move,
                Box::new(|_, _| panic!("faulty validator")),
            )
            .await;

        f.server
            .submit_action(
                f.a,
                GameAction {
                    kind: ActionType::Move,
                    data: serde_json::json!({ "dx": 5.0, "dy": 0.0 }),
                    seq: 1,
                },
            )
            .await
            .unwrap();
        f.server.tick_once().await;

        let state = f.server.state_view().await;
        assert_eq!(state.tick, 1, "tick completed despite the panic");
        assert_eq!(state.player(&f.a).unwrap().position.x, 0.0);
    }

    #[tokio::test]
    async fn rejecting_validator_blocks_input() {
        let f = fixture().await;
        f.server
            .register_validator(
                ActionType::Score,
                Box::new(|_, record| {
                    if record.data.get("points").and_then(|v| v.as_i64()) == Some(13) {
                        Err("unlucky score".into())
                    } else {
                        Ok(())
                    }
                }),
            )
            .await;

        f.server
            .submit_action(
                f.a,
                GameAction {
                    kind: ActionType::Score,
                    data: serde_json::json!({ "points": 13 }),
                    seq: 1,
                },
            )
            .await
            .unwrap();
        f.server.tick_once().await;
        assert_eq!(f.server.state_view().await.player(&f.a).unwrap().score, 0);
    }

    #[tokio::test]
    async fn all_but_one_eliminated_ends_match() {
        let mut f = fixture().await;
        f.server.player_left(f.b).await;

        let finished = f.server.tick_once().await;
        assert!(finished);
        assert_eq!(f.server.phase().await, MatchPhase::Finished);

        let outcome = f.outcome_rx.try_recv().unwrap();
        assert_eq!(outcome.winner, Some(f.a));
        assert_eq!(outcome.participants.len(), 2);
    }

    #[tokio::test]
    async fn equal_top_scores_are_a_draw() {
        let mut f = fixture().await;
        // Nobody eliminated; force the round limit with zero scores.
        {
            let mut inner = f.server.inner.write().await;
            inner.state.round = f.server.config.round_limit;
        }
        f.server.tick_once().await;
        let outcome = f.outcome_rx.try_recv().unwrap();
        assert_eq!(outcome.winner, None);
    }

    #[tokio::test]
    async fn rollback_restores_earlier_state() {
        let f = fixture().await;
        for seq in 1..=3u64 {
            f.server
                .submit_action(
                    f.a,
                    GameAction {
                        kind: ActionType::Move,
                        data: serde_json::json!({ "dx": 5.0, "dy": 0.0 }),
                        seq,
                    },
                )
                .await
                .unwrap();
            f.server.tick_once().await;
        }
        assert_eq!(f.server.state_view().await.player(&f.a).unwrap().position.x, 15.0);

        // Snapshot at tick 2 was taken before tick 3's input applied.
        assert!(f.server.rollback(2).await);
        assert_eq!(f.server.state_view().await.player(&f.a).unwrap().position.x, 10.0);

        assert!(!f.server.rollback(9999).await);
    }

    #[tokio::test]
    async fn paused_match_holds_tick() {
        let f = fixture().await;
        f.server.tick_once().await;
        let tick = f.server.current_tick().await;

        f.server.set_paused(true).await;
        f.server.tick_once().await;
        f.server.tick_once().await;
        assert_eq!(f.server.current_tick().await, tick);

        f.server.set_paused(false).await;
        f.server.tick_once().await;
        assert_eq!(f.server.current_tick().await, tick + 1);
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let f = fixture().await;
        f.server.destroy().await;
        f.server.destroy().await;
        assert_eq!(f.server.phase().await, MatchPhase::Finished);
        assert!(f.server.tick_once().await, "destroyed server stops the loop");
    }

    #[tokio::test]
    async fn inputs_rejected_after_finish() {
        let f = fixture().await;
        f.server.destroy().await;
        let result = f
            .server
            .submit_action(
                f.a,
                GameAction {
                    kind: ActionType::Move,
                    data: serde_json::json!({ "dx": 1.0, "dy": 0.0 }),
                    seq: 1,
                },
            )
            .await;
        assert_eq!(result, Err(GameError::MatchNotRunning));
    }
}
