//! League table.

use crate::configuration::Scoring;
use crate::protocol::messages::{StandingRow, StandingSummary};

use super::record::{MatchRecord, Outcome};

/// Ranked standings of a league.
///
/// Rows are kept sorted by points, then wins (both descending), then player
/// id, so ranks are always a strict `1..=N` sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Standings {
    rows: Vec<StandingRow>,
    revision: u64,
}

impl Standings {
    /// Zeroed standings for `(player_id, display_name)` pairs.
    pub fn new(players: impl IntoIterator<Item = (String, String)>) -> Self {
        let rows = players
            .into_iter()
            .map(|(player_id, display_name)| zero_row(player_id, display_name))
            .collect();
        let mut standings = Self { rows, revision: 0 };
        standings.rerank();
        standings
    }

    /// Standings restored from persisted rows.
    pub fn from_rows(rows: Vec<StandingRow>, revision: u64) -> Self {
        let mut standings = Self { rows, revision };
        standings.rerank();
        standings
    }

    /// Credits the outcome of `record` to both participants.
    pub fn apply(&mut self, record: &MatchRecord, scoring: Scoring) {
        for player in [&record.player_a, &record.player_b] {
            let Some(outcome) = record.outcome_for(player) else {
                continue;
            };
            let row = self.row_mut(player);
            row.games_played += 1;
            match outcome {
                Outcome::Win => {
                    row.wins += 1;
                    row.points += scoring.win;
                }
                Outcome::Loss => {
                    row.losses += 1;
                    row.points += scoring.loss;
                }
                Outcome::Draw => {
                    row.draws += 1;
                    row.points += scoring.draw;
                }
            }
        }
        self.revision += 1;
        self.rerank();
    }

    fn row_mut(&mut self, player_id: &str) -> &mut StandingRow {
        let index = match self.rows.iter().position(|r| r.player_id == player_id) {
            Some(index) => index,
            None => {
                self.rows
                    .push(zero_row(player_id.to_owned(), player_id.to_owned()));
                self.rows.len() - 1
            }
        };
        &mut self.rows[index]
    }

    fn rerank(&mut self) {
        self.rows.sort_by(|a, b| {
            b.points
                .cmp(&a.points)
                .then(b.wins.cmp(&a.wins))
                .then_with(|| a.player_id.cmp(&b.player_id))
        });
        for (i, row) in self.rows.iter_mut().enumerate() {
            row.rank = i + 1;
        }
    }

    /// Number of results applied since the standings were created.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Rows in rank order.
    pub fn rows(&self) -> &[StandingRow] {
        &self.rows
    }

    /// Row of `player_id`.
    pub fn row(&self, player_id: &str) -> Option<&StandingRow> {
        self.rows.iter().find(|r| r.player_id == player_id)
    }

    /// Win/loss/draw counters of `player_id`, zero if unknown.
    pub fn summary(&self, player_id: &str) -> StandingSummary {
        self.row(player_id)
            .map(|r| StandingSummary {
                wins: r.wins,
                losses: r.losses,
                draws: r.draws,
            })
            .unwrap_or_default()
    }

    /// Rank 1 row.
    pub fn leader(&self) -> Option<&StandingRow> {
        self.rows.first()
    }
}

fn zero_row(player_id: String, display_name: String) -> StandingRow {
    StandingRow {
        player_id,
        display_name,
        wins: 0,
        losses: 0,
        draws: 0,
        points: 0,
        games_played: 0,
        rank: 0,
    }
}
