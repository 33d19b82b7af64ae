//! Authoritative game simulation.
//!
//! The per-room fixed-tick loop, its state, buffered inputs and the
//! rollback snapshot ring.

pub mod input;
pub mod server;
pub mod snapshot;
pub mod state;

pub use input::{ActionType, GameAction, InputRecord};
pub use server::{AuthoritativeServer, GameGenre, MatchOutcome, SimConfig};
pub use snapshot::{SnapshotRing, StateSnapshot};
pub use state::{MatchPhase, MatchState, PlayerGameState, PlayerId, Vec2};
