//! Player Actions and Input Buffering
//!
//! Actions arrive tagged with a client sequence number, are buffered per
//! player in arrival order, and are drained exactly once per tick. The
//! highest applied sequence number per player is echoed back in every state
//! broadcast so clients can reconcile their predictions.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Instant;

use crate::game::state::PlayerId;

/// Maximum buffered inputs per player; overflow drops the newest input so a
/// spamming client cannot grow memory or starve the tick.
pub const INPUT_QUEUE_CAP: usize = 128;

/// Closed set of action kinds the simulation understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Relative movement: `{dx, dy}` clamped to the per-tick maximum.
    Move,
    /// Spawn a tracked projectile: `{dx, dy}` direction.
    Shoot,
    /// Turn-based: yield the turn (current player only).
    EndTurn,
    /// Generic keyed write: `{key, value}`.
    Custom,
    /// Score delta: `{points}` capped per action.
    Score,
    /// Anything the simulation does not understand.
    #[serde(other)]
    Unknown,
}

impl ActionType {
    /// Wire tag for logging and metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Move => "move",
            ActionType::Shoot => "shoot",
            ActionType::EndTurn => "end_turn",
            ActionType::Custom => "custom",
            ActionType::Score => "score",
            ActionType::Unknown => "unknown",
        }
    }
}

/// A player action as carried in `game_action` frames.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameAction {
    /// Action kind.
    #[serde(rename = "type")]
    pub kind: ActionType,
    /// Kind-specific payload.
    #[serde(default)]
    pub data: serde_json::Value,
    /// Client sequence number, strictly increasing per player.
    pub seq: u64,
}

/// A buffered input awaiting its tick.
#[derive(Clone, Debug)]
pub struct InputRecord {
    /// Player that sent the input.
    pub player_id: PlayerId,
    /// Client sequence number.
    pub seq: u64,
    /// Action kind.
    pub kind: ActionType,
    /// Kind-specific payload.
    pub data: serde_json::Value,
    /// Server tick at which the input was received.
    pub tick_received: u64,
    /// Arrival instant, for rate auditing.
    pub received_at: Instant,
}

/// Arrival-ordered bounded queue of one player's pending inputs.
#[derive(Debug, Default)]
pub struct PlayerInputQueue {
    pending: VecDeque<InputRecord>,
}

impl PlayerInputQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer an input. Returns false (input dropped) when the queue is full.
    pub fn push(&mut self, record: InputRecord) -> bool {
        if self.pending.len() >= INPUT_QUEUE_CAP {
            return false;
        }
        self.pending.push_back(record);
        true
    }

    /// Take all pending inputs in arrival order.
    pub fn drain(&mut self) -> Vec<InputRecord> {
        self.pending.drain(..).collect()
    }

    /// Number of pending inputs.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
