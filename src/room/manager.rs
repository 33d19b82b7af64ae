//! Room Manager
//!
//! Owns every room on this instance: lifecycle, host transfer, broadcast
//! primitives, cross-instance mirroring and the post-match pipeline. Rooms
//! sit behind their own locks so unrelated rooms never contend; the manager
//! map lock is only held long enough to resolve a room handle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use chrono::Utc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::anticheat::analysis::PostMatchAnalyzer;
use crate::anticheat::service::AntiCheatService;
use crate::external::cache::{SharedCache, SharedCacheExt};
use crate::external::metrics::MetricsCollector;
use crate::external::store::PlayerStore;
use crate::game::input::GameAction;
use crate::game::server::{AuthoritativeServer, GameError, MatchOutcome, SimConfig};
use crate::game::state::PlayerId;
use crate::matchmaking::rating;
use crate::network::protocol::ServerFrame;
use crate::room::{
    CreateRoomOptions, MemberProfile, Room, RoomError, RoomState, RoomView,
};

/// Room manager tunables.
#[derive(Clone, Debug)]
pub struct RoomManagerConfig {
    /// TTL on mirrored room views; also the reaper's age ceiling.
    pub mirror_ttl_secs: u64,
    /// How long a finished room lingers for late result queries.
    pub finish_grace: Duration,
    /// Reaper sweep interval.
    pub reaper_interval: Duration,
}

impl Default for RoomManagerConfig {
    fn default() -> Self {
        Self {
            mirror_ttl_secs: 3600,
            finish_grace: Duration::from_secs(30),
            reaper_interval: Duration::from_secs(60),
        }
    }
}

/// Owns room lifecycle for this instance.
pub struct RoomManager {
    config: RoomManagerConfig,
    rooms: RwLock<HashMap<String, Arc<RwLock<Room>>>>,
    player_rooms: RwLock<HashMap<PlayerId, String>>,
    cache: Arc<dyn SharedCache>,
    anticheat: AntiCheatService,
    analyzer: PostMatchAnalyzer,
    players: Arc<dyn PlayerStore>,
    metrics: MetricsCollector,
    outcome_tx: mpsc::UnboundedSender<MatchOutcome>,
    outcome_rx: Mutex<Option<mpsc::UnboundedReceiver<MatchOutcome>>>,
}

impl RoomManager {
    /// Create a manager. Call [`RoomManager::start`] afterwards to run the
    /// outcome pipeline and the reaper.
    pub fn new(
        config: RoomManagerConfig,
        cache: Arc<dyn SharedCache>,
        anticheat: AntiCheatService,
        analyzer: PostMatchAnalyzer,
        players: Arc<dyn PlayerStore>,
        metrics: MetricsCollector,
    ) -> Arc<Self> {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            config,
            rooms: RwLock::new(HashMap::new()),
            player_rooms: RwLock::new(HashMap::new()),
            cache,
            anticheat,
            analyzer,
            players,
            metrics,
            outcome_tx,
            outcome_rx: Mutex::new(Some(outcome_rx)),
        })
    }

    /// Spawn the background tasks: match-outcome pipeline and room reaper.
    pub async fn start(self: &Arc<Self>) {
        let manager = self.clone();
        if let Some(mut rx) = self.outcome_rx.lock().await.take() {
            tokio::spawn(async move {
                while let Some(outcome) = rx.recv().await {
                    manager.handle_outcome(outcome).await;
                }
            });
        }

        let manager = self.clone();
        tokio::spawn(async move {
            let mut sweep = interval(manager.config.reaper_interval);
            loop {
                sweep.tick().await;
                manager.reap_stale_rooms().await;
            }
        });
    }

    // =========================================================================
    // LIFECYCLE OPERATIONS
    // =========================================================================

    /// Create a room with `host` as its sole member.
    pub async fn create_room(&self, host: MemberProfile, opts: CreateRoomOptions) -> RoomView {
        // A player is a member of at most one room; creating releases any
        // previous membership first.
        self.release_membership(host.player_id).await;

        let room_id = Uuid::new_v4().to_string();
        let host_id = host.player_id;
        let room = Room {
            id: room_id.clone(),
            game_id: opts.game_id.clone(),
            host_id,
            max_players: opts.max_players.max(1),
            is_private: opts.is_private,
            state: RoomState::Waiting,
            members: vec![host.into_member(true)],
            options: opts,
            game: None,
            created_at: Instant::now(),
            created_at_utc: Utc::now(),
            finished_at: None,
        };
        let view = room.view();

        {
            let mut rooms = self.rooms.write().await;
            rooms.insert(room_id.clone(), Arc::new(RwLock::new(room)));
        }
        {
            let mut player_rooms = self.player_rooms.write().await;
            player_rooms.insert(host_id, room_id.clone());
        }

        self.metrics.active_rooms.inc();
        info!(room = %room_id, host = %host_id.short(), "room created");
        self.mirror(view.clone());
        view
    }

    /// Join an existing room. Any previous membership is released first.
    pub async fn join_room(
        &self,
        room_id: &str,
        profile: MemberProfile,
    ) -> Result<RoomView, RoomError> {
        let room = self.room_handle(room_id).await.ok_or(RoomError::NotFound)?;

        // Validate against the target before touching the old membership, so
        // a failed join leaves the player where they were.
        {
            let room = room.read().await;
            if room.state != RoomState::Waiting {
                return Err(RoomError::GameInProgress);
            }
            if room.members.len() >= room.max_players {
                return Err(RoomError::RoomFull);
            }
            if room.member(&profile.player_id).is_some() {
                return Err(RoomError::AlreadyMember);
            }
        }

        let player_id = profile.player_id;
        let previous = {
            let player_rooms = self.player_rooms.read().await;
            player_rooms.get(&player_id).cloned()
        };
        if let Some(previous) = previous {
            if previous != room_id {
                let _ = self.leave_room(&previous, player_id).await;
            }
        }

        let view = {
            let mut room = room.write().await;
            // Re-check under the write lock; the room may have filled or
            // started between the validation read and now.
            if room.state != RoomState::Waiting {
                return Err(RoomError::GameInProgress);
            }
            if room.members.len() >= room.max_players {
                return Err(RoomError::RoomFull);
            }
            if room.member(&player_id).is_some() {
                return Err(RoomError::AlreadyMember);
            }

            let member = profile.into_member(false);
            let joined_view = member.view();
            room.members.push(member);

            self.broadcast(&room, ServerFrame::PlayerJoined { player: joined_view }, Some(player_id));
            let view = room.view();
            self.broadcast(&room, ServerFrame::RoomUpdate { room: view.clone() }, None);
            view
        };

        {
            let mut player_rooms = self.player_rooms.write().await;
            player_rooms.insert(player_id, room_id.to_string());
        }

        debug!(room = %room_id, player = %player_id.short(), "player joined");
        self.mirror(view.clone());
        Ok(view)
    }

    /// Leave a room. No-op when the room or membership is absent. An empty
    /// room is destroyed; a departing host hands off to the earliest-joined
    /// remaining member.
    pub async fn leave_room(&self, room_id: &str, player_id: PlayerId) {
        let Some(room) = self.room_handle(room_id).await else {
            return;
        };

        let (empty, view) = {
            let mut room = room.write().await;
            let before = room.members.len();
            room.members.retain(|m| m.player_id != player_id);
            if room.members.len() == before {
                return; // was not a member; idempotent no-op
            }

            if let Some(game) = room.game.clone() {
                game.player_left(player_id).await;
            }

            if room.host_id == player_id {
                if let Some(next_host) = room.members.first_mut() {
                    next_host.is_host = true;
                    room.host_id = next_host.player_id;
                    info!(
                        room = %room.id,
                        host = %room.host_id.short(),
                        "host transferred"
                    );
                }
            }

            self.broadcast(&room, ServerFrame::PlayerLeft { player_id }, None);
            let view = room.view();
            self.broadcast(&room, ServerFrame::RoomUpdate { room: view.clone() }, None);
            (room.members.is_empty(), view)
        };

        {
            let mut player_rooms = self.player_rooms.write().await;
            player_rooms.remove(&player_id);
        }

        debug!(room = %room_id, player = %player_id.short(), "player left");
        if empty {
            self.destroy_room(room_id).await;
        } else {
            self.mirror(view);
        }
    }

    /// Toggle a member's ready flag. Idempotent; no-op on absent room/player.
    pub async fn set_ready(&self, room_id: &str, player_id: PlayerId, ready: bool) {
        let Some(room) = self.room_handle(room_id).await else {
            return;
        };

        let view = {
            let mut room = room.write().await;
            let Some(member) = room.member_mut(&player_id) else {
                return;
            };
            if member.is_ready == ready {
                return;
            }
            member.is_ready = ready;
            let view = room.view();
            self.broadcast(&room, ServerFrame::RoomUpdate { room: view.clone() }, None);
            view
        };
        self.mirror(view);
    }

    /// Start the game. Host-only; requires two players, a waiting room and
    /// every non-host member ready. Spawns the authoritative server.
    pub async fn start_game(
        &self,
        room_id: &str,
        player_id: PlayerId,
    ) -> Result<RoomView, RoomError> {
        let room = self.room_handle(room_id).await.ok_or(RoomError::NotFound)?;
        let mut room = room.write().await;

        if room.host_id != player_id {
            return Err(RoomError::NotHost);
        }
        if room.state != RoomState::Waiting {
            return Err(RoomError::AlreadyStarted);
        }
        if room.members.len() < 2 {
            return Err(RoomError::NotEnoughPlayers);
        }
        if room
            .members
            .iter()
            .any(|m| !m.is_host && !m.is_ready)
        {
            return Err(RoomError::NotAllReady);
        }

        let players: Vec<_> = room
            .members
            .iter()
            .map(|m| (m.player_id, m.sender.clone()))
            .collect();
        let sim_config = SimConfig::for_genre(room.options.genre, room.options.tick_rate);
        let server = Arc::new(AuthoritativeServer::new(
            room.id.clone(),
            room.game_id.clone(),
            players,
            sim_config,
            self.anticheat.clone(),
            self.outcome_tx.clone(),
        ));
        server.start();

        room.state = RoomState::Playing;
        room.game = Some(server.clone());
        self.metrics.playing_rooms.inc();

        let view = room.view();
        let game_state = server.state_view().await;
        self.broadcast(
            &room,
            ServerFrame::GameStarted {
                room: view.clone(),
                game_state,
            },
            None,
        );

        info!(room = %room_id, players = view.members.len(), "game started");
        self.mirror(view.clone());
        Ok(view)
    }

    /// Forward a player action to the active authoritative server.
    pub async fn process_action(
        &self,
        player_id: PlayerId,
        action: GameAction,
    ) -> Result<(), GameError> {
        let Some(game) = self.game_for_player(player_id).await else {
            return Err(GameError::MatchNotRunning);
        };
        game.submit_action(player_id, action).await
    }

    /// Forcibly end a room's match: the attached server is destroyed without
    /// an outcome and the room is marked finished. Cleanup runs after the
    /// grace window so late result queries still resolve.
    pub async fn end_game(self: &Arc<Self>, room_id: &str) {
        let Some(room) = self.room_handle(room_id).await else {
            return;
        };

        let view = {
            let mut room = room.write().await;
            if let Some(game) = room.game.take() {
                game.destroy().await;
                self.metrics.playing_rooms.dec();
            }
            if room.state != RoomState::Finished {
                room.state = RoomState::Finished;
                room.finished_at = Some(Instant::now());
            }
            room.view()
        };
        self.mirror(view);
        self.schedule_cleanup(room_id.to_string());
    }

    /// Relay a chat message to the sender's room.
    pub async fn chat(&self, player_id: PlayerId, message: String) -> Result<(), RoomError> {
        let room_id = {
            let player_rooms = self.player_rooms.read().await;
            player_rooms.get(&player_id).cloned()
        }
        .ok_or(RoomError::NotInRoom)?;
        let room = self
            .room_handle(&room_id)
            .await
            .ok_or(RoomError::NotFound)?;
        let room = room.read().await;
        let display_name = room
            .member(&player_id)
            .map(|m| m.display_name.clone())
            .ok_or(RoomError::NotInRoom)?;

        self.broadcast(
            &room,
            ServerFrame::Chat {
                player_id,
                display_name,
                message,
            },
            None,
        );
        Ok(())
    }

    /// Synchronous cleanup for a disconnected player.
    pub async fn handle_disconnect(self: &Arc<Self>, player_id: PlayerId) {
        let room_id = {
            let player_rooms = self.player_rooms.read().await;
            player_rooms.get(&player_id).cloned()
        };
        let Some(room_id) = room_id else {
            return;
        };

        // If the match lost its last reachable member, tear it down.
        let abandoned = {
            match self.room_handle(&room_id).await {
                Some(room) => {
                    let room = room.read().await;
                    match &room.game {
                        Some(game) => {
                            game.player_left(player_id).await;
                            game.connected_count().await == 0
                        }
                        None => false,
                    }
                }
                None => false,
            }
        };

        self.leave_room(&room_id, player_id).await;
        if abandoned {
            warn!(room = %room_id, "all players disconnected; ending match");
            self.end_game(&room_id).await;
        }
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Public rooms, optionally filtered by game and state.
    pub async fn list_rooms(
        &self,
        game_id: Option<&str>,
        state: Option<RoomState>,
    ) -> Vec<RoomView> {
        let handles: Vec<_> = {
            let rooms = self.rooms.read().await;
            rooms.values().cloned().collect()
        };

        let mut views = Vec::new();
        for handle in handles {
            let room = handle.read().await;
            if room.is_private {
                continue;
            }
            if let Some(gid) = game_id {
                if room.game_id != gid {
                    continue;
                }
            }
            if let Some(s) = state {
                if room.state != s {
                    continue;
                }
            }
            views.push(room.view());
        }
        views
    }

    /// Sanitized view of one room.
    pub async fn get_room(&self, room_id: &str) -> Option<RoomView> {
        let room = self.room_handle(room_id).await?;
        let room = room.read().await;
        Some(room.view())
    }

    /// The room a player is currently in, if any.
    pub async fn get_player_room(&self, player_id: PlayerId) -> Option<RoomView> {
        let room_id = {
            let player_rooms = self.player_rooms.read().await;
            player_rooms.get(&player_id).cloned()
        }?;
        self.get_room(&room_id).await
    }

    /// Id of the room a player is currently in.
    pub async fn player_room_id(&self, player_id: PlayerId) -> Option<String> {
        let player_rooms = self.player_rooms.read().await;
        player_rooms.get(&player_id).cloned()
    }

    /// Active server for a player's room, if it is playing.
    pub async fn game_for_player(&self, player_id: PlayerId) -> Option<Arc<AuthoritativeServer>> {
        let room_id = self.player_room_id(player_id).await?;
        let room = self.room_handle(&room_id).await?;
        let room = room.read().await;
        room.game.clone()
    }

    /// Number of rooms alive on this instance.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    async fn room_handle(&self, room_id: &str) -> Option<Arc<RwLock<Room>>> {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).cloned()
    }

    async fn release_membership(&self, player_id: PlayerId) {
        let previous = {
            let player_rooms = self.player_rooms.read().await;
            player_rooms.get(&player_id).cloned()
        };
        if let Some(previous) = previous {
            self.leave_room(&previous, player_id).await;
        }
    }

    /// Send a frame to every member (except `skip`). Unreachable members are
    /// silently skipped: delivery is best-effort, at most once per frame.
    fn broadcast(&self, room: &Room, frame: ServerFrame, skip: Option<PlayerId>) {
        for member in &room.members {
            if Some(member.player_id) == skip {
                continue;
            }
            let _ = member.sender.try_send(frame.clone());
        }
    }

    /// Mirror a sanitized view into the shared cache, fire-and-forget.
    fn mirror(&self, view: RoomView) {
        let cache = self.cache.clone();
        let ttl = self.config.mirror_ttl_secs;
        tokio::spawn(async move {
            let key = format!("room:{}", view.id);
            cache.set_json(&key, &view, ttl).await;
        });
    }

    fn schedule_cleanup(self: &Arc<Self>, room_id: String) {
        let grace = self.config.finish_grace;
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(manager) = manager.upgrade() {
                manager.destroy_room(&room_id).await;
            }
        });
    }

    async fn destroy_room(&self, room_id: &str) {
        let Some(room) = ({
            let mut rooms = self.rooms.write().await;
            rooms.remove(room_id)
        }) else {
            return;
        };

        let room = room.read().await;
        if let Some(game) = room.game.clone() {
            game.destroy().await;
            self.metrics.playing_rooms.dec();
        }
        {
            let mut player_rooms = self.player_rooms.write().await;
            for member in &room.members {
                player_rooms.remove(&member.player_id);
            }
        }
        self.metrics.active_rooms.dec();

        let cache = self.cache.clone();
        let key = format!("room:{}", room_id);
        tokio::spawn(async move {
            cache.del(&key).await;
        });

        info!(room = %room_id, "room destroyed");
    }

    /// Remove rooms older than the mirror TTL that were never explicitly
    /// torn down, plus finished rooms whose grace window has passed.
    async fn reap_stale_rooms(&self) {
        let handles: Vec<(String, Arc<RwLock<Room>>)> = {
            let rooms = self.rooms.read().await;
            rooms.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        let ttl = Duration::from_secs(self.config.mirror_ttl_secs);
        for (room_id, handle) in handles {
            let stale = {
                let room = handle.read().await;
                let expired_grace = room.state == RoomState::Finished
                    && room
                        .finished_at
                        .map(|t| t.elapsed() > self.config.finish_grace)
                        .unwrap_or(true);
                room.created_at.elapsed() > ttl || expired_grace
            };
            if stale {
                debug!(room = %room_id, "reaping stale room");
                self.destroy_room(&room_id).await;
            }
        }
    }

    /// Natural match end: record results, adjust ratings, analyze, linger.
    async fn handle_outcome(self: &Arc<Self>, outcome: MatchOutcome) {
        info!(
            room = %outcome.room_id,
            winner = ?outcome.winner.map(|w| w.short()),
            "match finished"
        );

        let view = {
            let Some(room) = self.room_handle(&outcome.room_id).await else {
                return;
            };
            let mut room = room.write().await;
            if let Some(game) = room.game.take() {
                game.destroy().await;
                self.metrics.playing_rooms.dec();
            }
            room.state = RoomState::Finished;
            room.finished_at = Some(Instant::now());

            self.broadcast(
                &room,
                ServerFrame::GameOver {
                    scores: outcome.scores.clone(),
                },
                None,
            );
            room.view()
        };
        self.mirror(view);

        // Persist results and adjust ratings off the broadcast path.
        let players = self.players.clone();
        let participants = outcome.participants.clone();
        let winner = outcome.winner;
        let placements = outcome.placements.clone();
        tokio::spawn(async move {
            for player_id in &participants {
                if let Err(e) = players
                    .record_result(*player_id, Some(*player_id) == winner)
                    .await
                {
                    warn!(player = %player_id.short(), "failed to record result: {e}");
                }
            }
            rating::apply_rating_updates(&placements, players.as_ref()).await;
        });

        self.analyzer
            .analyze(
                &outcome.room_id,
                &outcome.participants,
                outcome.winner,
                outcome.duration,
            )
            .await;

        self.schedule_cleanup(outcome.room_id.clone());
    }
}
