//! Room Lifecycle
//!
//! A room is a bounded group of players sharing one session. Rooms are
//! owned and mutated exclusively by the [`manager::RoomManager`]; everything
//! that leaves this module is a sanitized view without connection handles.

pub mod manager;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::game::server::{AuthoritativeServer, GameGenre};
use crate::game::state::PlayerId;
use crate::network::protocol::ServerFrame;

pub use manager::RoomManager;

/// Room lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomState {
    /// Accepting players.
    Waiting,
    /// Match running; an authoritative server is attached.
    Playing,
    /// Match over; room lingers for the grace window.
    Finished,
}

/// A member of a room, with its live outbound channel.
#[derive(Debug, Clone)]
pub struct RoomMember {
    /// Player identifier.
    pub player_id: PlayerId,
    /// Display name.
    pub display_name: String,
    /// Avatar identifier.
    pub avatar: String,
    /// Whether this member is the host.
    pub is_host: bool,
    /// Ready flag.
    pub is_ready: bool,
    /// Non-owning handle to the member's connection.
    pub sender: mpsc::Sender<ServerFrame>,
}

impl RoomMember {
    /// Sanitized view of this member.
    pub fn view(&self) -> RoomMemberView {
        RoomMemberView {
            player_id: self.player_id,
            display_name: self.display_name.clone(),
            avatar: self.avatar.clone(),
            is_host: self.is_host,
            is_ready: self.is_ready,
        }
    }
}

/// Identity and channel of a player entering a room, before membership
/// flags are assigned.
#[derive(Debug, Clone)]
pub struct MemberProfile {
    /// Player identifier.
    pub player_id: PlayerId,
    /// Display name.
    pub display_name: String,
    /// Avatar identifier.
    pub avatar: String,
    /// Non-owning handle to the player's connection.
    pub sender: mpsc::Sender<ServerFrame>,
}

impl MemberProfile {
    /// Promote to a member with the given flags.
    pub fn into_member(self, is_host: bool) -> RoomMember {
        RoomMember {
            player_id: self.player_id,
            display_name: self.display_name,
            avatar: self.avatar,
            is_host,
            is_ready: false,
            sender: self.sender,
        }
    }
}

/// Sanitized member view, safe to serialize and mirror.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomMemberView {
    /// Player identifier.
    pub player_id: PlayerId,
    /// Display name.
    pub display_name: String,
    /// Avatar identifier.
    pub avatar: String,
    /// Whether this member is the host.
    pub is_host: bool,
    /// Ready flag.
    pub is_ready: bool,
}

/// Options for creating a room.
#[derive(Debug, Clone)]
pub struct CreateRoomOptions {
    /// Game to play.
    pub game_id: String,
    /// Member cap.
    pub max_players: usize,
    /// Hidden from public listings.
    pub is_private: bool,
    /// Genre preset selecting the tick rate.
    pub genre: GameGenre,
    /// Explicit tick-rate override (Hz).
    pub tick_rate: Option<u32>,
}

impl Default for CreateRoomOptions {
    fn default() -> Self {
        Self {
            game_id: String::new(),
            max_players: 4,
            is_private: false,
            genre: GameGenre::Arcade,
            tick_rate: None,
        }
    }
}

/// A room. Owned by the [`RoomManager`]; while playing, phase transitions
/// are driven by the attached [`AuthoritativeServer`].
pub struct Room {
    /// Room identifier.
    pub id: String,
    /// Game being played.
    pub game_id: String,
    /// Current host.
    pub host_id: PlayerId,
    /// Member cap.
    pub max_players: usize,
    /// Hidden from public listings.
    pub is_private: bool,
    /// Lifecycle state.
    pub state: RoomState,
    /// Members in join order (earliest first; host transfer follows this).
    pub members: Vec<RoomMember>,
    /// Creation options kept for the simulation config.
    pub options: CreateRoomOptions,
    /// Attached authoritative server iff `state == Playing`.
    pub game: Option<Arc<AuthoritativeServer>>,
    /// Creation time.
    pub created_at: Instant,
    /// Creation wall-clock time, carried into mirrors.
    pub created_at_utc: DateTime<Utc>,
    /// When the match finished, if it did.
    pub finished_at: Option<Instant>,
}

impl Room {
    /// Sanitized view of this room (no connection handles).
    pub fn view(&self) -> RoomView {
        RoomView {
            id: self.id.clone(),
            game_id: self.game_id.clone(),
            host_id: self.host_id,
            max_players: self.max_players,
            is_private: self.is_private,
            state: self.state,
            members: self.members.iter().map(RoomMember::view).collect(),
            created_at: self.created_at_utc,
        }
    }

    /// Find a member by player id.
    pub fn member(&self, player_id: &PlayerId) -> Option<&RoomMember> {
        self.members.iter().find(|m| m.player_id == *player_id)
    }

    /// Find a member mutably.
    pub fn member_mut(&mut self, player_id: &PlayerId) -> Option<&mut RoomMember> {
        self.members.iter_mut().find(|m| m.player_id == *player_id)
    }
}

/// Sanitized room view, safe to serialize and mirror across instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    /// Room identifier.
    pub id: String,
    /// Game being played.
    pub game_id: String,
    /// Current host.
    pub host_id: PlayerId,
    /// Member cap.
    pub max_players: usize,
    /// Hidden from public listings.
    pub is_private: bool,
    /// Lifecycle state.
    pub state: RoomState,
    /// Member views in join order.
    pub members: Vec<RoomMemberView>,
    /// Creation wall-clock time.
    pub created_at: DateTime<Utc>,
}

/// Room operation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    /// No room with that id.
    #[error("Room not found")]
    NotFound,
    /// Room is already playing or finished.
    #[error("Game already in progress")]
    GameInProgress,
    /// Room is at its member cap.
    #[error("Room is full")]
    RoomFull,
    /// Player is already a member.
    #[error("Already in room")]
    AlreadyMember,
    /// Only the host may do that.
    #[error("Only the host can start the game")]
    NotHost,
    /// A match needs at least two players.
    #[error("Not enough players")]
    NotEnoughPlayers,
    /// The match already started.
    #[error("Game already started")]
    AlreadyStarted,
    /// Some non-host member is not ready.
    #[error("Not all players are ready")]
    NotAllReady,
    /// The player is not in a room.
    #[error("Not in a room")]
    NotInRoom,
}
