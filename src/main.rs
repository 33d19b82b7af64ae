//! Playfield Realtime Server
//!
//! Binary entry point: wires the external collaborators, the room and
//! matchmaking services, anti-cheat and the WebSocket gateway.

use std::sync::Arc;
use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use playfield::anticheat::analysis::{AnalysisConfig, PostMatchAnalyzer};
use playfield::anticheat::service::{AntiCheatConfig, AntiCheatService};
use playfield::external::cache::MemoryCache;
use playfield::external::identity::{JwtConfig, JwtVerifier};
use playfield::external::metrics::MetricsCollector;
use playfield::external::store::{MemoryFlagStore, MemoryPlayerStore};
use playfield::matchmaking::service::{MatchmakingConfig, MatchmakingService};
use playfield::network::gateway::{ConnectionGateway, GatewayConfig};
use playfield::room::manager::{RoomManager, RoomManagerConfig};
use playfield::VERSION;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Playfield Realtime Server v{VERSION}");

    let mut gateway_config = GatewayConfig::default();
    if let Ok(bind) = std::env::var("BIND_ADDR") {
        gateway_config.bind_addr = bind
            .parse()
            .with_context(|| format!("invalid BIND_ADDR: {bind}"))?;
    }

    let auth = JwtConfig::from_env();
    if !auth.is_configured() {
        info!("no AUTH_SECRET/AUTH_PUBLIC_KEY_PEM set; all credentials will be rejected");
    }

    let metrics = MetricsCollector::new().context("metrics registration")?;

    // In-process backends stand in for the platform's Redis and Postgres
    // collaborators; deployments swap these behind the same traits.
    let cache = Arc::new(MemoryCache::new());
    let flags = Arc::new(MemoryFlagStore::new());
    let players = Arc::new(MemoryPlayerStore::new());

    let anticheat = AntiCheatService::new(
        AntiCheatConfig::default(),
        flags,
        players.clone(),
        metrics.clone(),
    );
    let analyzer = PostMatchAnalyzer::new(
        AnalysisConfig::default(),
        anticheat.clone(),
        players.clone(),
    );

    let rooms = RoomManager::new(
        RoomManagerConfig::default(),
        cache,
        anticheat.clone(),
        analyzer,
        players.clone(),
        metrics.clone(),
    );
    let matchmaking = MatchmakingService::new(
        MatchmakingConfig::default(),
        rooms.clone(),
        metrics.clone(),
    );

    let gateway = ConnectionGateway::new(
        gateway_config,
        Arc::new(JwtVerifier::new(auth)),
        players,
        rooms,
        matchmaking,
        anticheat,
        metrics,
    );

    gateway.run().await.context("gateway terminated")?;
    Ok(())
}
