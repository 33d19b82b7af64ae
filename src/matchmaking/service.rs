//! Matchmaking Service
//!
//! Owns the queue buckets and the fixed-interval processing loop. Bucket
//! mutation happens under one service-owned lock (single writer); match
//! formation and notifications run outside it so slow room setup never
//! stalls enqueue/dequeue traffic.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::external::metrics::MetricsCollector;
use crate::game::state::PlayerId;
use crate::matchmaking::{QueueEntry, QueueError, Region};
use crate::network::protocol::ServerFrame;
use crate::room::manager::RoomManager;
use crate::room::{CreateRoomOptions, MemberProfile};

/// Matchmaking tunables.
#[derive(Clone, Debug)]
pub struct MatchmakingConfig {
    /// Processing loop interval.
    pub process_interval: Duration,
    /// Starting skill window (± rating points).
    pub base_window: f64,
    /// Window growth per expansion interval waited.
    pub window_increment: f64,
    /// How long a wait buys one window increment.
    pub expansion_interval: Duration,
    /// Window ceiling.
    pub window_cap: f64,
    /// Wait before an entry joins the cross-region pool.
    pub cross_region_delay: Duration,
    /// Maximum tolerated region-pair latency estimate (ms).
    pub latency_ceiling_ms: u32,
    /// Maximum queue time before eviction with a timeout notice.
    pub max_queue_wait: Duration,
    /// Minimum players for any match.
    pub min_players: usize,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            process_interval: Duration::from_secs(1),
            base_window: 100.0,
            window_increment: 50.0,
            expansion_interval: Duration::from_secs(10),
            window_cap: 500.0,
            cross_region_delay: Duration::from_secs(30),
            latency_ceiling_ms: 150,
            max_queue_wait: Duration::from_secs(120),
            min_players: 2,
        }
    }
}

type BucketKey = (String, Region);

#[derive(Default)]
struct QueueState {
    buckets: HashMap<BucketKey, Vec<QueueEntry>>,
    players: HashMap<PlayerId, BucketKey>,
}

impl QueueState {
    fn depth(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }
}

/// Owns per-(game, region) queues and forms matches.
pub struct MatchmakingService {
    config: MatchmakingConfig,
    state: Mutex<QueueState>,
    rooms: Arc<RoomManager>,
    metrics: MetricsCollector,
}

impl MatchmakingService {
    /// Create a service bound to the room manager.
    pub fn new(
        config: MatchmakingConfig,
        rooms: Arc<RoomManager>,
        metrics: MetricsCollector,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(QueueState::default()),
            rooms,
            metrics,
        })
    }

    /// Spawn the processing loop.
    pub fn start(self: &Arc<Self>) {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(service.config.process_interval);
            loop {
                ticker.tick().await;
                service.process_once().await;
            }
        });
    }

    /// Insert a queue entry. Returns (estimated wait seconds, position).
    pub async fn enqueue(&self, entry: QueueEntry) -> Result<(u64, usize), QueueError> {
        let mut state = self.state.lock().await;
        if state.players.contains_key(&entry.player_id) {
            return Err(QueueError::AlreadyQueued);
        }

        let key = (entry.game_id.clone(), entry.region);
        let size = entry.max_players.max(self.config.min_players);
        let player_id = entry.player_id;

        let bucket = state.buckets.entry(key.clone()).or_default();
        bucket.push(entry);
        let position = bucket.len();
        let estimate = estimate_wait(position, size, self.config.process_interval);

        state.players.insert(player_id, key);
        self.metrics.queued_players.set(state.depth() as i64);

        debug!(player = %player_id.short(), position, "queued for matchmaking");
        Ok((estimate, position))
    }

    /// Remove a player's entry. Idempotent regardless of bucket.
    pub async fn dequeue(&self, player_id: PlayerId) -> bool {
        let mut state = self.state.lock().await;
        let Some(key) = state.players.remove(&player_id) else {
            return false;
        };
        if let Some(bucket) = state.buckets.get_mut(&key) {
            bucket.retain(|e| e.player_id != player_id);
            if bucket.is_empty() {
                state.buckets.remove(&key);
            }
        }
        self.metrics.queued_players.set(state.depth() as i64);
        debug!(player = %player_id.short(), "dequeued");
        true
    }

    /// Number of waiting entries across all buckets.
    pub async fn queue_depth(&self) -> usize {
        self.state.lock().await.depth()
    }

    /// One processing cycle: per-bucket matching, cross-region fallback,
    /// then stale-entry eviction.
    pub async fn process_once(&self) {
        let (proposals, timeouts) = {
            let mut state = self.state.lock().await;
            let mut proposals = self.match_buckets(&mut state);
            proposals.extend(self.match_cross_region(&mut state));
            let timeouts = self.evict_stale(&mut state);
            self.metrics.queued_players.set(state.depth() as i64);
            (proposals, timeouts)
        };

        for proposal in proposals {
            self.form_match(proposal.entries, proposal.host_region).await;
        }

        for entry in timeouts {
            info!(player = %entry.player_id.short(), "matchmaking timeout");
            let _ = entry.sender.try_send(ServerFrame::MatchmakingTimeout);
        }
    }

    /// Current skill window for an entry that has waited `waited`.
    fn window_for(&self, waited: Duration) -> f64 {
        let expansions = (waited.as_secs_f64() / self.config.expansion_interval.as_secs_f64())
            .floor();
        (self.config.base_window + expansions * self.config.window_increment)
            .min(self.config.window_cap)
    }

    /// Greedy same-bucket matching: anchors in skill order, candidates of the
    /// same mode and size inside the anchor's current window.
    fn match_buckets(&self, state: &mut QueueState) -> Vec<MatchProposal> {
        let now = Instant::now();
        let mut proposals = Vec::new();

        for ((_, region), bucket) in state.buckets.iter_mut() {
            bucket.sort_by(|a, b| {
                a.skill_rating
                    .partial_cmp(&b.skill_rating)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            let mut used = vec![false; bucket.len()];
            for anchor_idx in 0..bucket.len() {
                if used[anchor_idx] {
                    continue;
                }
                let (window, size, mode, anchor_skill) = {
                    let anchor = &bucket[anchor_idx];
                    (
                        self.window_for(now.duration_since(anchor.enqueued_at)),
                        anchor.max_players.max(self.config.min_players),
                        anchor.mode.clone(),
                        anchor.skill_rating,
                    )
                };

                let mut group = vec![anchor_idx];
                for candidate_idx in 0..bucket.len() {
                    if group.len() >= size {
                        break;
                    }
                    if candidate_idx == anchor_idx || used[candidate_idx] {
                        continue;
                    }
                    let candidate = &bucket[candidate_idx];
                    if candidate.mode != mode || candidate.max_players != bucket[anchor_idx].max_players {
                        continue;
                    }
                    if (candidate.skill_rating - anchor_skill).abs() <= window {
                        group.push(candidate_idx);
                    }
                }

                if group.len() >= self.config.min_players {
                    for idx in &group {
                        used[*idx] = true;
                    }
                    proposals.push(MatchProposal {
                        player_ids: group.iter().map(|idx| bucket[*idx].player_id).collect(),
                        host_region: *region,
                        entries: Vec::new(),
                    });
                }
            }

            // Extract matched entries by id; indices go stale as soon as the
            // first entry is removed.
            for proposal in proposals.iter_mut().filter(|p| p.entries.is_empty()) {
                for player_id in &proposal.player_ids {
                    if let Some(pos) = bucket.iter().position(|e| e.player_id == *player_id) {
                        proposal.entries.push(bucket.remove(pos));
                    }
                }
            }
        }

        for proposal in &proposals {
            for entry in &proposal.entries {
                state.players.remove(&entry.player_id);
            }
        }
        state.buckets.retain(|_, bucket| !bucket.is_empty());
        proposals
    }

    /// Cross-region fallback for entries past the delay: same window rules
    /// plus a static latency gate; the host region minimizes the average
    /// latency estimate across participants.
    fn match_cross_region(&self, state: &mut QueueState) -> Vec<MatchProposal> {
        let now = Instant::now();
        let delay = self.config.cross_region_delay;

        // Pool (game_id, bucket index) pairs of eligible entries.
        let mut pool: Vec<(BucketKey, usize)> = Vec::new();
        for (key, bucket) in state.buckets.iter() {
            for (idx, entry) in bucket.iter().enumerate() {
                if now.duration_since(entry.enqueued_at) >= delay {
                    pool.push((key.clone(), idx));
                }
            }
        }
        if pool.len() < self.config.min_players {
            return Vec::new();
        }

        pool.sort_by(|a, b| {
            let entry_a = &state.buckets[&a.0][a.1];
            let entry_b = &state.buckets[&b.0][b.1];
            entry_a
                .skill_rating
                .partial_cmp(&entry_b.skill_rating)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut used = vec![false; pool.len()];
        let mut groups: Vec<Vec<PlayerId>> = Vec::new();

        for anchor_pos in 0..pool.len() {
            if used[anchor_pos] {
                continue;
            }
            let anchor = &state.buckets[&pool[anchor_pos].0][pool[anchor_pos].1];
            let anchor_game = anchor.game_id.clone();
            let anchor_mode = anchor.mode.clone();
            let anchor_size = anchor.max_players.max(self.config.min_players);
            let anchor_skill = anchor.skill_rating;
            let anchor_region = anchor.region;
            let window = self.window_for(now.duration_since(anchor.enqueued_at));

            let mut group = vec![anchor_pos];
            for candidate_pos in 0..pool.len() {
                if group.len() >= anchor_size {
                    break;
                }
                if candidate_pos == anchor_pos || used[candidate_pos] {
                    continue;
                }
                let candidate = &state.buckets[&pool[candidate_pos].0][pool[candidate_pos].1];
                if candidate.game_id != anchor_game
                    || candidate.mode != anchor_mode
                    || candidate.max_players != anchor.max_players
                {
                    continue;
                }
                if (candidate.skill_rating - anchor_skill).abs() > window {
                    continue;
                }
                if anchor_region.latency_ms(candidate.region) >= self.config.latency_ceiling_ms {
                    continue;
                }
                group.push(candidate_pos);
            }

            if group.len() >= self.config.min_players {
                for pos in &group {
                    used[*pos] = true;
                }
                // Capture ids now; pool indices go stale once removal starts.
                groups.push(
                    group
                        .iter()
                        .map(|pos| {
                            let (key, idx) = &pool[*pos];
                            state.buckets[key][*idx].player_id
                        })
                        .collect(),
                );
            }
        }

        // Remove matched entries from their buckets, then build proposals.
        let mut proposals = Vec::new();
        for player_ids in groups {
            let mut entries = Vec::new();
            for player_id in &player_ids {
                if let Some(key) = state.players.remove(player_id) {
                    if let Some(bucket) = state.buckets.get_mut(&key) {
                        if let Some(pos) = bucket.iter().position(|e| e.player_id == *player_id) {
                            entries.push(bucket.remove(pos));
                        }
                    }
                }
            }

            let host_region = pick_host_region(&entries);
            debug!(
                players = entries.len(),
                host_region = ?host_region,
                "cross-region match formed"
            );
            proposals.push(MatchProposal {
                player_ids: entries.iter().map(|e| e.player_id).collect(),
                host_region,
                entries,
            });
        }
        state.buckets.retain(|_, bucket| !bucket.is_empty());
        proposals
    }

    fn evict_stale(&self, state: &mut QueueState) -> Vec<QueueEntry> {
        let now = Instant::now();
        let max_wait = self.config.max_queue_wait;
        let mut evicted = Vec::new();

        for bucket in state.buckets.values_mut() {
            let mut keep = Vec::with_capacity(bucket.len());
            for entry in bucket.drain(..) {
                if now.duration_since(entry.enqueued_at) > max_wait {
                    state.players.remove(&entry.player_id);
                    evicted.push(entry);
                } else {
                    keep.push(entry);
                }
            }
            *bucket = keep;
        }
        state.buckets.retain(|_, bucket| !bucket.is_empty());
        evicted
    }

    /// Create the room, join everyone and notify them.
    async fn form_match(&self, entries: Vec<QueueEntry>, host_region: Region) {
        let Some(host) = entries.first().cloned() else {
            return;
        };

        let opts = CreateRoomOptions {
            game_id: host.game_id.clone(),
            max_players: host.max_players.max(entries.len()),
            is_private: true,
            ..Default::default()
        };
        let room = self
            .rooms
            .create_room(
                MemberProfile {
                    player_id: host.player_id,
                    display_name: host.display_name.clone(),
                    avatar: host.avatar.clone(),
                    sender: host.sender.clone(),
                },
                opts,
            )
            .await;

        for entry in entries.iter().skip(1) {
            let profile = MemberProfile {
                player_id: entry.player_id,
                display_name: entry.display_name.clone(),
                avatar: entry.avatar.clone(),
                sender: entry.sender.clone(),
            };
            if let Err(e) = self.rooms.join_room(&room.id, profile).await {
                warn!(
                    room = %room.id,
                    player = %entry.player_id.short(),
                    "matched player failed to join: {e}"
                );
            }
        }

        let Some(view) = self.rooms.get_room(&room.id).await else {
            return;
        };
        let players: Vec<_> = view.members.clone();
        let frame = ServerFrame::MatchFound {
            match_id: view.id.clone(),
            room: view,
            players,
        };
        for entry in &entries {
            let _ = entry.sender.try_send(frame.clone());
        }

        self.metrics.matches_formed_total.inc();
        info!(
            room = %room.id,
            players = entries.len(),
            region = ?host_region,
            "match formed"
        );
    }
}

struct MatchProposal {
    player_ids: Vec<PlayerId>,
    host_region: Region,
    entries: Vec<QueueEntry>,
}

/// Region minimizing the participants' average latency estimate.
fn pick_host_region(entries: &[QueueEntry]) -> Region {
    let mut best = entries.first().map(|e| e.region).unwrap_or(Region::NaEast);
    let mut best_avg = u32::MAX;
    for candidate in Region::ALL {
        let total: u32 = entries
            .iter()
            .map(|e| candidate.latency_ms(e.region))
            .sum();
        let avg = total / entries.len().max(1) as u32;
        if avg < best_avg {
            best_avg = avg;
            best = candidate;
        }
    }
    best
}

fn estimate_wait(position: usize, size: usize, process_interval: Duration) -> u64 {
    let missing = size.saturating_sub(position);
    if missing == 0 {
        process_interval.as_secs().max(1)
    } else {
        missing as u64 * 15
    }
}
