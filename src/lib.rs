//! # Playfield Realtime Server
//!
//! Authoritative multiplayer core for the Playfield game platform:
//! WebSocket session handling, room lifecycle, skill-based matchmaking,
//! fixed-tick authoritative simulation and anti-cheat detection.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PLAYFIELD REALTIME                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  network/        - Connection layer                          │
//! │  ├── gateway.rs  - WebSocket gateway, auth, heartbeats       │
//! │  └── protocol.rs - Wire frames (JSON tagged unions)          │
//! │                                                              │
//! │  room/           - Room lifecycle                            │
//! │  └── manager.rs  - Create/join/leave/start, host transfer    │
//! │                                                              │
//! │  matchmaking/    - Ranked queues                             │
//! │  ├── service.rs  - Skill/region buckets, expanding windows   │
//! │  └── rating.rs   - Post-match Elo adjustments                │
//! │                                                              │
//! │  game/           - Authoritative simulation                  │
//! │  ├── state.rs    - Match and player state                    │
//! │  ├── input.rs    - Buffered player actions                   │
//! │  ├── snapshot.rs - Rollback ring buffer                      │
//! │  └── server.rs   - Per-room fixed-tick loop                  │
//! │                                                              │
//! │  anticheat/      - Input validation and anomaly analysis     │
//! │  external/       - Identity, cache, store, metrics seams     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ownership model
//!
//! Every mutable registry is owned by exactly one service object: the
//! gateway owns connections, the [`room::RoomManager`] owns rooms, the
//! [`matchmaking::MatchmakingService`] owns queue buckets and each
//! [`game::server::AuthoritativeServer`] owns its match state. Other
//! components only ever see sanitized snapshots. Each active room runs its
//! own cancellable tick timer behind its own lock, so unrelated rooms never
//! contend.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod anticheat;
pub mod external;
pub mod game;
pub mod matchmaking;
pub mod network;
pub mod room;

// Re-export commonly used types
pub use game::server::AuthoritativeServer;
pub use game::state::{MatchPhase, MatchState, PlayerId};
pub use matchmaking::service::MatchmakingService;
pub use network::gateway::{ConnectionGateway, GatewayConfig};
pub use room::manager::RoomManager;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default simulation tick rate (Hz) when no genre preset or override applies
pub const DEFAULT_TICK_RATE: u32 = 30;

/// Maximum accepted inbound frame size (bytes)
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Heartbeat sweep interval (seconds)
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// WebSocket close code: connection replaced by a newer one for the same player
pub const CLOSE_REPLACED: u16 = 4000;

/// WebSocket close code: authentication failure
pub const CLOSE_AUTH_FAILURE: u16 = 4001;

/// WebSocket close code: normal closure
pub const CLOSE_NORMAL: u16 = 1000;
