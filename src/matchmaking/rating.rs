//! Post-Match Rating Adjustment
//!
//! Pairwise Elo across all match participants: every pair is scored as
//! win/loss/draw by relative placement, each player's delta is the average
//! of their pairwise deltas, and results are floored at a minimum rating.
//! Deliberately simple; this is the contract, not a rating-theory project.

use skillratings::elo::{elo, EloConfig, EloRating};
use skillratings::Outcomes;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::external::store::PlayerStore;
use crate::game::state::PlayerId;

/// Rating assigned to players with no record.
pub const INITIAL_RATING: f64 = 1000.0;

/// Ratings never drop below this floor.
pub const MIN_RATING: f64 = 100.0;

/// Compute new ratings from placements (1 = best). `ratings` holds current
/// values; missing players default to [`INITIAL_RATING`].
pub fn pairwise_elo(
    placements: &[(PlayerId, u32, i64)],
    ratings: &HashMap<PlayerId, f64>,
) -> HashMap<PlayerId, f64> {
    let config = EloConfig::new();
    let mut deltas: HashMap<PlayerId, (f64, usize)> = HashMap::new();

    for (i, (player_a, place_a, _)) in placements.iter().enumerate() {
        for (player_b, place_b, _) in placements.iter().skip(i + 1) {
            let rating_a = EloRating {
                rating: *ratings.get(player_a).unwrap_or(&INITIAL_RATING),
            };
            let rating_b = EloRating {
                rating: *ratings.get(player_b).unwrap_or(&INITIAL_RATING),
            };

            let outcome = match place_a.cmp(place_b) {
                std::cmp::Ordering::Less => Outcomes::WIN,
                std::cmp::Ordering::Greater => Outcomes::LOSS,
                std::cmp::Ordering::Equal => Outcomes::DRAW,
            };

            let (new_a, new_b) = elo(&rating_a, &rating_b, &outcome, &config);

            let entry_a = deltas.entry(*player_a).or_insert((0.0, 0));
            entry_a.0 += new_a.rating - rating_a.rating;
            entry_a.1 += 1;
            let entry_b = deltas.entry(*player_b).or_insert((0.0, 0));
            entry_b.0 += new_b.rating - rating_b.rating;
            entry_b.1 += 1;
        }
    }

    placements
        .iter()
        .map(|(player, _, _)| {
            let current = *ratings.get(player).unwrap_or(&INITIAL_RATING);
            let delta = deltas
                .get(player)
                .map(|(sum, n)| if *n > 0 { sum / *n as f64 } else { 0.0 })
                .unwrap_or(0.0);
            (*player, (current + delta).max(MIN_RATING))
        })
        .collect()
}

/// Read current ratings, compute the adjustment and write the results back.
/// Best-effort: a store failure is logged and skipped.
pub async fn apply_rating_updates(
    placements: &[(PlayerId, u32, i64)],
    store: &dyn PlayerStore,
) {
    if placements.len() < 2 {
        return;
    }

    let mut current = HashMap::new();
    for (player, _, _) in placements {
        let rating = store.rating(*player).await.unwrap_or(INITIAL_RATING);
        current.insert(*player, rating);
    }

    let updated = pairwise_elo(placements, &current);
    for (player, rating) in updated {
        debug!(
            player = %player.short(),
            old = current.get(&player).copied().unwrap_or(INITIAL_RATING),
            new = rating,
            "rating adjusted"
        );
        if let Err(e) = store.set_rating(player, rating).await {
            warn!(player = %player.short(), "rating write failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::store::MemoryPlayerStore;

    fn players(n: usize) -> Vec<PlayerId> {
        (0..n)
            .map(|i| PlayerId::from_bytes([i as u8 + 1; 16]))
            .collect()
    }

    #[test]
    fn winner_gains_loser_drops() {
        let ids = players(2);
        let placements = vec![(ids[0], 1, 50), (ids[1], 2, 20)];
        let ratings: HashMap<_, _> = ids.iter().map(|id| (*id, 1000.0)).collect();

        let updated = pairwise_elo(&placements, &ratings);
        assert!(updated[&ids[0]] > 1000.0);
        assert!(updated[&ids[1]] < 1000.0);
        // Equal-rated pair: gains and losses mirror each other.
        let gain = updated[&ids[0]] - 1000.0;
        let loss = 1000.0 - updated[&ids[1]];
        assert!((gain - loss).abs() < 1e-9);
    }

    #[test]
    fn upset_moves_more_points_than_expected_win() {
        let ids = players(2);
        let placements = vec![(ids[0], 1, 50), (ids[1], 2, 20)];

        let even: HashMap<_, _> = [(ids[0], 1000.0), (ids[1], 1000.0)].into();
        let upset: HashMap<_, _> = [(ids[0], 800.0), (ids[1], 1200.0)].into();

        let even_gain = pairwise_elo(&placements, &even)[&ids[0]] - 1000.0;
        let upset_gain = pairwise_elo(&placements, &upset)[&ids[0]] - 800.0;
        assert!(upset_gain > even_gain);
    }

    #[test]
    fn draws_leave_equal_ratings_unchanged() {
        let ids = players(2);
        let placements = vec![(ids[0], 1, 30), (ids[1], 1, 30)];
        let ratings: HashMap<_, _> = ids.iter().map(|id| (*id, 1000.0)).collect();

        let updated = pairwise_elo(&placements, &ratings);
        assert!((updated[&ids[0]] - 1000.0).abs() < 1e-9);
        assert!((updated[&ids[1]] - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn ratings_are_floored() {
        let ids = players(2);
        let placements = vec![(ids[0], 1, 50), (ids[1], 2, 20)];
        let ratings: HashMap<_, _> = [(ids[0], 2000.0), (ids[1], 100.0)].into();

        let updated = pairwise_elo(&placements, &ratings);
        assert_eq!(updated[&ids[1]], MIN_RATING);
    }

    #[test]
    fn multiplayer_deltas_average_across_opponents() {
        let ids = players(4);
        let placements: Vec<_> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, (i + 1) as u32, (40 - 10 * i) as i64))
            .collect();
        let ratings: HashMap<_, _> = ids.iter().map(|id| (*id, 1000.0)).collect();

        let updated = pairwise_elo(&placements, &ratings);
        // First beats three equals, last loses to three equals.
        assert!(updated[&ids[0]] > updated[&ids[1]]);
        assert!(updated[&ids[1]] > updated[&ids[2]]);
        assert!(updated[&ids[2]] > updated[&ids[3]]);
        // Averaging keeps one match's swing within a single k-factor.
        assert!(updated[&ids[0]] - 1000.0 <= 32.0);
    }

    #[tokio::test]
    async fn apply_reads_and_writes_the_store() {
        let store = MemoryPlayerStore::new();
        let ids = players(2);
        store.set_rating(ids[0], 1100.0).await.unwrap();
        // ids[1] has no rating on record: defaults to INITIAL_RATING.

        let placements = vec![(ids[0], 2, 10), (ids[1], 1, 90)];
        apply_rating_updates(&placements, &store).await;

        let loser = store.rating(ids[0]).await.unwrap();
        let winner = store.rating(ids[1]).await.unwrap();
        assert!(loser < 1100.0);
        assert!(winner > INITIAL_RATING);
    }

    proptest::proptest! {
        #[test]
        fn floor_holds_for_any_ratings(a in 100.0f64..3000.0, b in 100.0f64..3000.0) {
            let ids = players(2);
            let placements = vec![(ids[0], 1, 1), (ids[1], 2, 0)];
            let ratings: HashMap<_, _> = [(ids[0], a), (ids[1], b)].into();
            let updated = pairwise_elo(&placements, &ratings);
            proptest::prop_assert!(updated[&ids[0]] >= MIN_RATING);
            proptest::prop_assert!(updated[&ids[1]] >= MIN_RATING);
        }
    }
}
