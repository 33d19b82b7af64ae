//! Metrics Collection
//!
//! Prometheus gauges and counters for the realtime core. The registry is
//! exposed for whichever observability surface embeds this crate; no HTTP
//! exposition lives here. Every update is synchronous and lock-free, so
//! metric writes never slow the tick loop.

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Metrics for connections, rooms, queues and anti-cheat.
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<Registry>,

    /// Currently open authenticated connections.
    pub connections: IntGauge,
    /// Rooms currently alive (any state).
    pub active_rooms: IntGauge,
    /// Rooms currently playing.
    pub playing_rooms: IntGauge,
    /// Players waiting in matchmaking queues.
    pub queued_players: IntGauge,

    /// Inbound frames handled, by frame tag.
    pub frames_total: IntCounterVec,
    /// Matches formed by the matchmaker.
    pub matches_formed_total: IntCounter,
    /// Anti-cheat flags recorded, by kind.
    pub flags_total: IntCounterVec,
    /// Inputs rejected by validation.
    pub inputs_rejected_total: IntCounter,
}

impl MetricsCollector {
    /// Create a collector with its own registry.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let connections = IntGauge::with_opts(Opts::new(
            "playfield_connections",
            "Open authenticated WebSocket connections",
        ))?;
        let active_rooms = IntGauge::with_opts(Opts::new(
            "playfield_rooms_active",
            "Rooms currently alive",
        ))?;
        let playing_rooms = IntGauge::with_opts(Opts::new(
            "playfield_rooms_playing",
            "Rooms with an attached authoritative server",
        ))?;
        let queued_players = IntGauge::with_opts(Opts::new(
            "playfield_queue_depth",
            "Players waiting in matchmaking queues",
        ))?;
        let frames_total = IntCounterVec::new(
            Opts::new("playfield_frames_total", "Inbound frames handled"),
            &["type"],
        )?;
        let matches_formed_total = IntCounter::with_opts(Opts::new(
            "playfield_matches_formed_total",
            "Matches formed by the matchmaker",
        ))?;
        let flags_total = IntCounterVec::new(
            Opts::new("playfield_anticheat_flags_total", "Anti-cheat flags recorded"),
            &["kind"],
        )?;
        let inputs_rejected_total = IntCounter::with_opts(Opts::new(
            "playfield_inputs_rejected_total",
            "Inputs rejected by validation",
        ))?;

        registry.register(Box::new(connections.clone()))?;
        registry.register(Box::new(active_rooms.clone()))?;
        registry.register(Box::new(playing_rooms.clone()))?;
        registry.register(Box::new(queued_players.clone()))?;
        registry.register(Box::new(frames_total.clone()))?;
        registry.register(Box::new(matches_formed_total.clone()))?;
        registry.register(Box::new(flags_total.clone()))?;
        registry.register(Box::new(inputs_rejected_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            connections,
            active_rooms,
            playing_rooms,
            queued_players,
            frames_total,
            matches_formed_total,
            flags_total,
            inputs_rejected_total,
        })
    }

    /// The underlying registry, for embedding into an exposition endpoint.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("metrics registration cannot conflict on a fresh registry")
    }
}
