//! Match State Definitions
//!
//! Authoritative state for one active match. Player and entity maps are
//! BTreeMaps so per-tick iteration order is reproducible, which the
//! anti-cheat audit trail depends on.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

// =============================================================================
// PLAYER ID
// =============================================================================

/// Unique player identifier.
///
/// Ordered so BTreeMap iteration over players is deterministic.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PlayerId(Uuid);

impl PlayerId {
    /// Create a fresh random id.
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Parse from a UUID string.
    pub fn parse_str(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0.as_bytes()[..4])
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// GEOMETRY
// =============================================================================

/// 2D position/velocity vector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    /// X component.
    pub x: f32,
    /// Y component.
    pub y: f32,
}

impl Vec2 {
    /// Origin.
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    /// Create from components.
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean length.
    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    /// Distance to another point.
    pub fn distance_to(&self, other: Vec2) -> f32 {
        Vec2::new(self.x - other.x, self.y - other.y).length()
    }
}

impl std::ops::Add for Vec2 {
    type Output = Vec2;

    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

// =============================================================================
// MATCH PHASE
// =============================================================================

/// Phase of the authoritative state machine.
///
/// `Finished` is terminal; `tick` only advances while `Playing`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    /// Created, waiting for the tick loop to begin.
    Waiting,
    /// Pre-match countdown.
    Countdown {
        /// Ticks until play begins.
        ticks_remaining: u32,
    },
    /// Simulation running.
    Playing,
    /// Simulation frozen; tick counter holds.
    Paused,
    /// Match over.
    Finished,
}

impl MatchPhase {
    /// Wire name of the phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchPhase::Waiting => "waiting",
            MatchPhase::Countdown { .. } => "countdown",
            MatchPhase::Playing => "playing",
            MatchPhase::Paused => "paused",
            MatchPhase::Finished => "finished",
        }
    }
}

// =============================================================================
// PLAYER STATE
// =============================================================================

/// Per-player authoritative state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayerGameState {
    /// Player identifier.
    pub id: PlayerId,
    /// Join order index; also the turn order for turn-based games.
    pub index: usize,
    /// Current position.
    pub position: Vec2,
    /// Current velocity.
    pub velocity: Vec2,
    /// Health, 0.0..=100.0.
    pub health: f32,
    /// Accumulated score.
    pub score: i64,
    /// Still in play.
    pub alive: bool,
    /// Game-defined keyed data (opaque to the server).
    pub custom: BTreeMap<String, serde_json::Value>,
}

impl PlayerGameState {
    /// Create a player at a spawn position.
    pub fn new(id: PlayerId, index: usize) -> Self {
        Self {
            id,
            index,
            // Spawns spread on a fixed grid; concrete games reposition via
            // their own action handlers.
            position: Vec2::new(100.0 * index as f32, 0.0),
            velocity: Vec2::ZERO,
            health: 100.0,
            score: 0,
            alive: true,
            custom: BTreeMap::new(),
        }
    }
}

// =============================================================================
// SHARED ENTITIES
// =============================================================================

/// Transient shared entity (projectile and the like), expired by TTL.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameEntity {
    /// Monotonic entity id within the match.
    pub id: u64,
    /// Entity kind tag ("projectile", ...).
    pub kind: String,
    /// Spawning player.
    pub owner: PlayerId,
    /// Current position.
    pub position: Vec2,
    /// Velocity applied each tick.
    pub velocity: Vec2,
    /// Tick the entity appeared.
    pub spawned_tick: u64,
    /// Lifetime in ticks.
    pub ttl_ticks: u64,
    /// Game-defined payload.
    pub data: serde_json::Value,
}

impl GameEntity {
    /// Whether the entity has outlived its TTL at `tick`.
    pub fn expired(&self, tick: u64) -> bool {
        tick >= self.spawned_tick + self.ttl_ticks
    }
}

// =============================================================================
// MATCH STATE
// =============================================================================

/// Authoritative state of one match. Owned exclusively by the room's
/// [`crate::game::server::AuthoritativeServer`]; everyone else sees clones.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchState {
    /// Room this match belongs to.
    pub room_id: String,
    /// Game being played.
    pub game_id: String,
    /// Simulation tick; strictly +1 per processed cycle while playing.
    pub tick: u64,
    /// Current phase.
    pub phase: MatchPhase,
    /// Per-player state, iteration-ordered by player id.
    pub players: BTreeMap<PlayerId, PlayerGameState>,
    /// Live transient entities.
    pub entities: BTreeMap<u64, GameEntity>,
    /// Next entity id to hand out.
    next_entity_id: u64,
    /// Whose turn it is (index into join order), for turn-based games.
    pub turn_index: usize,
    /// Completed round count (one round = every player took a turn).
    pub round: u32,
}

impl MatchState {
    /// Create state for a room, assigning player indices in the order given.
    pub fn new(room_id: String, game_id: String, player_ids: &[PlayerId]) -> Self {
        let players = player_ids
            .iter()
            .enumerate()
            .map(|(index, id)| (*id, PlayerGameState::new(*id, index)))
            .collect();

        Self {
            room_id,
            game_id,
            tick: 0,
            phase: MatchPhase::Waiting,
            players,
            entities: BTreeMap::new(),
            next_entity_id: 0,
            turn_index: 0,
            round: 0,
        }
    }

    /// Get a player's state.
    pub fn player(&self, id: &PlayerId) -> Option<&PlayerGameState> {
        self.players.get(id)
    }

    /// Get a player's state mutably.
    pub fn player_mut(&mut self, id: &PlayerId) -> Option<&mut PlayerGameState> {
        self.players.get_mut(id)
    }

    /// Count of players still alive.
    pub fn alive_count(&self) -> usize {
        self.players.values().filter(|p| p.alive).count()
    }

    /// Spawn a transient entity and return its id.
    pub fn spawn_entity(
        &mut self,
        kind: &str,
        owner: PlayerId,
        position: Vec2,
        velocity: Vec2,
        ttl_ticks: u64,
        data: serde_json::Value,
    ) -> u64 {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        self.entities.insert(
            id,
            GameEntity {
                id,
                kind: kind.to_string(),
                owner,
                position,
                velocity,
                spawned_tick: self.tick,
                ttl_ticks,
                data,
            },
        );
        id
    }

    /// Advance entities by one tick and drop the expired ones.
    pub fn step_entities(&mut self) {
        let tick = self.tick;
        for entity in self.entities.values_mut() {
            entity.position = entity.position + entity.velocity;
        }
        self.entities.retain(|_, e| !e.expired(tick));
    }

    /// The player whose turn it currently is.
    pub fn current_turn_player(&self) -> Option<PlayerId> {
        self.players
            .values()
            .find(|p| p.index == self.turn_index)
            .map(|p| p.id)
    }

    /// Advance the turn to the next alive player; bumps `round` on wrap.
    pub fn advance_turn(&mut self) {
        let count = self.players.len();
        if count == 0 {
            return;
        }
        for _ in 0..count {
            let next = (self.turn_index + 1) % count;
            if next <= self.turn_index {
                self.round += 1;
            }
            self.turn_index = next;
            let alive = self
                .players
                .values()
                .any(|p| p.index == self.turn_index && p.alive);
            if alive {
                break;
            }
        }
    }

    /// Final scores keyed by player.
    pub fn scores(&self) -> BTreeMap<PlayerId, i64> {
        self.players.values().map(|p| (p.id, p.score)).collect()
    }

    /// Placements sorted by score descending: (player, place, score).
    pub fn placements(&self) -> Vec<(PlayerId, u32, i64)> {
        let mut ranked: Vec<_> = self.players.values().map(|p| (p.id, p.score)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked
            .into_iter()
            .enumerate()
            .map(|(i, (id, score))| (id, (i + 1) as u32, score))
            .collect()
    }
}
