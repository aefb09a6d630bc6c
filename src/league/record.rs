use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::game::{OutcomeReason, Parity};
use crate::protocol::{messages::MatchResultReport, timestamp_now};

/// How a match ended for one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    #[allow(missing_docs)]
    Win,
    #[allow(missing_docs)]
    Loss,
    #[allow(missing_docs)]
    Draw,
}

/// A match result as accepted by the league manager.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub league_id: String,
    pub round_id: u32,
    pub match_id: String,
    pub player_a: String,
    pub player_b: String,
    /// `None` on a draw.
    pub winner: Option<String>,
    pub drawn_number: Option<u8>,
    pub choices: BTreeMap<String, Option<Parity>>,
    pub reason: OutcomeReason,
    pub referee_id: String,
    pub recorded_at: String,
}

impl MatchRecord {
    /// Record of `report`, sent by `referee_id`.
    pub fn from_report(report: &MatchResultReport, referee_id: &str) -> MatchRecord {
        MatchRecord {
            league_id: report.league_id.clone(),
            round_id: report.round_id,
            match_id: report.match_id.clone(),
            player_a: report.player_a.clone(),
            player_b: report.player_b.clone(),
            winner: report.result.winner.clone(),
            drawn_number: report.result.details.drawn_number,
            choices: report.result.details.choices.clone(),
            reason: report.result.details.reason,
            referee_id: referee_id.to_owned(),
            recorded_at: timestamp_now(),
        }
    }

    /// Whether nobody won.
    pub fn is_draw(&self) -> bool {
        self.winner.is_none()
    }

    /// Outcome for `player_id`, `None` if they did not play this match.
    pub fn outcome_for(&self, player_id: &str) -> Option<Outcome> {
        if player_id != self.player_a && player_id != self.player_b {
            return None;
        }
        Some(match self.winner.as_deref() {
            None => Outcome::Draw,
            Some(winner) if winner == player_id => Outcome::Win,
            Some(_) => Outcome::Loss,
        })
    }

    /// The other participant.
    pub fn opponent_of(&self, player_id: &str) -> Option<&str> {
        if player_id == self.player_a {
            Some(&self.player_b)
        } else if player_id == self.player_b {
            Some(&self.player_a)
        } else {
            None
        }
    }
}

#[cfg(test)]
pub(crate) fn record(match_id: &str, a: &str, b: &str, winner: Option<&str>) -> MatchRecord {
    MatchRecord {
        league_id: "L".into(),
        round_id: 1,
        match_id: match_id.into(),
        player_a: a.into(),
        player_b: b.into(),
        winner: winner.map(str::to_owned),
        drawn_number: Some(4),
        choices: BTreeMap::new(),
        reason: OutcomeReason::ParityMatch,
        referee_id: "REF01".into(),
        recorded_at: timestamp_now(),
    }
}
