//! Round-robin schedule generation.
//!
//! Uses the circle method: players sit at a table, the first one stays put
//! and the others rotate by one seat each round. With an odd number of
//! players an empty seat is added and whoever faces it sits the round out.

use serde::{Deserialize, Serialize};

/// One scheduled match.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixture {
    pub round_id: u32,
    pub match_id: String,
    pub player_a: String,
    pub player_b: String,
    pub referee_id: String,
}

/// Rounds of pairings where every player meets every other exactly once.
pub fn round_robin_pairings(players: &[String]) -> Vec<Vec<(String, String)>> {
    if players.len() < 2 {
        return vec![];
    }
    let mut seats: Vec<Option<&String>> = players.iter().map(Some).collect();
    if seats.len() % 2 == 1 {
        seats.push(None);
    }
    let n = seats.len();

    let mut rounds = Vec::with_capacity(n - 1);
    for _ in 0..n - 1 {
        let pairs: Vec<(String, String)> = (0..n / 2)
            .filter_map(|i| match (seats[i], seats[n - 1 - i]) {
                (Some(a), Some(b)) => Some((a.clone(), b.clone())),
                _ => None,
            })
            .collect();
        rounds.push(pairs);
        seats[1..].rotate_right(1);
    }
    rounds
}

/// Full schedule, with referees assigned by cycling over `referees` in match order.
///
/// Returns no rounds when there are fewer than two players or no referee.
pub fn build_schedule(players: &[String], referees: &[String]) -> Vec<Vec<Fixture>> {
    if referees.is_empty() {
        return vec![];
    }
    let mut next_referee = referees.iter().cycle();
    round_robin_pairings(players)
        .into_iter()
        .zip(1u32..)
        .map(|(pairs, round_id)| {
            pairs
                .into_iter()
                .zip(1..)
                .map(|((player_a, player_b), k)| Fixture {
                    round_id,
                    match_id: format!("R{round_id}M{k}"),
                    player_a,
                    player_b,
                    referee_id: next_referee.next().cloned().unwrap_or_default(),
                })
                .collect()
        })
        .collect()
}
