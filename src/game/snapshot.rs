//! State Snapshots and Rollback
//!
//! Every tick begins by pushing an independent deep copy of the match state
//! into a bounded ring. Rollback replaces the live state wholesale with a
//! clone of the stored copy; nothing ever aliases the ring's contents.

use std::collections::VecDeque;

use crate::game::state::MatchState;

/// A deep copy of the match state at a given tick.
#[derive(Clone, Debug)]
pub struct StateSnapshot {
    /// Tick the snapshot was taken at.
    pub tick: u64,
    /// The copied state.
    pub state: MatchState,
}

/// Bounded ring of snapshots; pushing beyond capacity evicts the oldest.
#[derive(Debug)]
pub struct SnapshotRing {
    capacity: usize,
    snapshots: VecDeque<StateSnapshot>,
}

impl SnapshotRing {
    /// Create a ring holding at most `capacity` snapshots.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            snapshots: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    /// Record a snapshot of `state` at its current tick.
    pub fn push(&mut self, state: &MatchState) {
        if self.snapshots.len() == self.capacity {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(StateSnapshot {
            tick: state.tick,
            state: state.clone(),
        });
    }

    /// Fetch a fresh copy of the state recorded at `tick`, if still held.
    pub fn restore(&self, tick: u64) -> Option<MatchState> {
        self.snapshots
            .iter()
            .find(|s| s.tick == tick)
            .map(|s| s.state.clone())
    }

    /// Oldest tick still held.
    pub fn oldest_tick(&self) -> Option<u64> {
        self.snapshots.front().map(|s| s.tick)
    }

    /// Number of snapshots held.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}
