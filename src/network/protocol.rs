//! Protocol Frames
//!
//! Wire format for client-server communication over WebSocket. All frames
//! are JSON, decoded once at the protocol boundary into a closed tagged
//! union. An unrecognized tag decodes to [`ClientFrame::Unknown`] and is
//! answered with an `error` frame; it never closes the connection.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::game::input::GameAction;
use crate::game::state::{MatchState, PlayerId};
use crate::matchmaking::Region;
use crate::room::{RoomMemberView, RoomView};

// =============================================================================
// CLIENT -> SERVER FRAMES
// =============================================================================

/// Frames sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Join an existing room by id.
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        /// Target room.
        room_id: String,
    },

    /// Leave the current room.
    LeaveRoom,

    /// Toggle the ready flag.
    Ready {
        /// Desired ready state.
        ready: bool,
    },

    /// Start the game (host only).
    StartGame,

    /// A game action for the authoritative simulation.
    GameAction {
        /// The action, with client sequence number.
        action: GameAction,
    },

    /// Chat message to the current room.
    Chat {
        /// Message text.
        message: String,
    },

    /// Enter a ranked matchmaking queue.
    #[serde(rename_all = "camelCase")]
    QueueRanked {
        /// Game to queue for.
        game_id: String,
        /// Current skill rating.
        skill_rating: f64,
        /// Rating deviation/uncertainty.
        skill_deviation: f64,
        /// Player's home region.
        region: Region,
        /// Requested mode.
        mode: String,
        /// Requested match size.
        max_players: usize,
    },

    /// Leave the matchmaking queue.
    CancelQueue,

    /// Invite a friend to a room.
    #[serde(rename_all = "camelCase")]
    FriendInvite {
        /// Invitee.
        friend_id: PlayerId,
        /// Room to join.
        room_id: String,
        /// Game being played.
        game_id: String,
    },

    /// Latency probe.
    #[serde(rename_all = "camelCase")]
    Ping {
        /// Client clock at send time (ms).
        client_time: u64,
    },

    /// Fallback for unrecognized tags.
    #[serde(other)]
    Unknown,
}

impl ClientFrame {
    /// Tag name for logging and metrics labels.
    pub fn tag(&self) -> &'static str {
        match self {
            ClientFrame::JoinRoom { .. } => "join_room",
            ClientFrame::LeaveRoom => "leave_room",
            ClientFrame::Ready { .. } => "ready",
            ClientFrame::StartGame => "start_game",
            ClientFrame::GameAction { .. } => "game_action",
            ClientFrame::Chat { .. } => "chat",
            ClientFrame::QueueRanked { .. } => "queue_ranked",
            ClientFrame::CancelQueue => "cancel_queue",
            ClientFrame::FriendInvite { .. } => "friend_invite",
            ClientFrame::Ping { .. } => "ping",
            ClientFrame::Unknown => "unknown",
        }
    }

    /// Deserialize from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// SERVER -> CLIENT FRAMES
// =============================================================================

/// Frames sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Handshake complete; the connection is authenticated.
    #[serde(rename_all = "camelCase")]
    Connected {
        /// The caller's player id.
        player_id: PlayerId,
    },

    /// Full sanitized room view after a membership or ready change.
    RoomUpdate {
        /// Current room view.
        room: RoomView,
    },

    /// Another player joined the room.
    PlayerJoined {
        /// The new member.
        player: RoomMemberView,
    },

    /// A player left the room.
    #[serde(rename_all = "camelCase")]
    PlayerLeft {
        /// Who left.
        player_id: PlayerId,
    },

    /// The caller left its room.
    RoomLeft,

    /// The match started.
    #[serde(rename_all = "camelCase")]
    GameStarted {
        /// Room view at start.
        room: RoomView,
        /// Initial authoritative state.
        game_state: MatchState,
    },

    /// An applied action relayed to the room.
    #[serde(rename_all = "camelCase")]
    GameAction {
        /// Acting player.
        player_id: PlayerId,
        /// Compact result of the action.
        result: serde_json::Value,
    },

    /// Match finished.
    GameOver {
        /// Final scores by player.
        scores: BTreeMap<PlayerId, i64>,
    },

    /// Chat relayed to the room.
    #[serde(rename_all = "camelCase")]
    Chat {
        /// Sender.
        player_id: PlayerId,
        /// Sender display name.
        display_name: String,
        /// Message text.
        message: String,
    },

    /// Authoritative state broadcast with reconciliation acks.
    #[serde(rename_all = "camelCase")]
    StateSync {
        /// Server tick.
        tick: u64,
        /// Phase name.
        phase: String,
        /// Authoritative state.
        state: MatchState,
        /// Per-player last-applied input sequence numbers.
        acks: BTreeMap<PlayerId, u64>,
        /// Server wall clock (ms since epoch).
        server_time: u64,
    },

    /// Matchmaking produced a room.
    #[serde(rename_all = "camelCase")]
    MatchFound {
        /// Match identifier (room id).
        match_id: String,
        /// The formed room.
        room: RoomView,
        /// Matched players.
        players: Vec<RoomMemberView>,
    },

    /// Queue entry accepted.
    #[serde(rename_all = "camelCase")]
    QueueJoined {
        /// Queued game.
        game_id: String,
        /// Estimated wait in seconds.
        estimated_wait: u64,
        /// Position in the bucket.
        position: usize,
    },

    /// Queue entry removed on request.
    QueueCancelled,

    /// Queue entry expired without a match.
    MatchmakingTimeout,

    /// A friend invite relayed to its target.
    #[serde(rename_all = "camelCase")]
    FriendInvite {
        /// Inviting player.
        from: PlayerId,
        /// Room to join.
        room_id: String,
        /// Game being played.
        game_id: String,
    },

    /// Latency probe response.
    #[serde(rename_all = "camelCase")]
    Pong {
        /// Server wall clock (ms since epoch).
        server_time: u64,
    },

    /// Per-message error; the connection stays open.
    Error {
        /// What went wrong.
        message: String,
    },
}

impl ServerFrame {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Build an error frame.
    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }
}

/// Server wall clock in milliseconds since the Unix epoch.
pub fn server_time_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::input::ActionType;

    #[test]
    fn client_frame_json_roundtrip() {
        let frame = ClientFrame::from_json(
            r#"{"type":"game_action","action":{"type":"move","data":{"dx":5,"dy":0},"seq":1}}"#,
        )
        .unwrap();

        match &frame {
            ClientFrame::GameAction { action } => {
                assert_eq!(action.kind, ActionType::Move);
                assert_eq!(action.seq, 1);
            }
            other => panic!("wrong frame: {:?}", other),
        }

        let json = frame.to_json().unwrap();
        assert!(json.contains(r#""type":"game_action""#));
    }

    #[test]
    fn queue_ranked_uses_camel_case_fields() {
        let frame = ClientFrame::from_json(
            r#"{"type":"queue_ranked","gameId":"tetris","skillRating":1000.0,
                "skillDeviation":120.0,"region":"eu-west","mode":"ranked","maxPlayers":2}"#,
        )
        .unwrap();

        match frame {
            ClientFrame::QueueRanked {
                game_id,
                skill_rating,
                max_players,
                ..
            } => {
                assert_eq!(game_id, "tetris");
                assert_eq!(skill_rating, 1000.0);
                assert_eq!(max_players, 2);
            }
            other => panic!("wrong frame: {:?}", other),
        }
    }

    #[test]
    fn unknown_tag_decodes_to_unknown() {
        let frame = ClientFrame::from_json(r#"{"type":"teleport_to_moon"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Unknown));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(ClientFrame::from_json("not json").is_err());
        assert!(ClientFrame::from_json(r#"{"type":"ready"}"#).is_err()); // missing field
    }

    #[test]
    fn server_frame_json_roundtrip() {
        let player = PlayerId::new_v4();
        let frame = ServerFrame::Connected { player_id: player };
        let json = frame.to_json().unwrap();
        assert!(json.contains(r#""type":"connected""#));
        assert!(json.contains("playerId"));

        let parsed = ServerFrame::from_json(&json).unwrap();
        match parsed {
            ServerFrame::Connected { player_id } => assert_eq!(player_id, player),
            other => panic!("wrong frame: {:?}", other),
        }
    }

    #[test]
    fn state_sync_carries_acks_keyed_by_player() {
        let a = PlayerId::from_bytes([1; 16]);
        let state = MatchState::new("r".into(), "g".into(), &[a]);
        let mut acks = BTreeMap::new();
        acks.insert(a, 7u64);

        let frame = ServerFrame::StateSync {
            tick: 42,
            phase: "playing".into(),
            state,
            acks,
            server_time: server_time_ms(),
        };

        let json = frame.to_json().unwrap();
        assert!(json.contains(r#""tick":42"#));
        assert!(json.contains(&format!(r#""{}":7"#, a)));
        assert!(json.contains("serverTime"));
    }

    #[test]
    fn error_frame_helper() {
        let json = ServerFrame::error("Room not found").to_json().unwrap();
        assert!(json.contains(r#""type":"error""#));
        assert!(json.contains("Room not found"));
    }
}
