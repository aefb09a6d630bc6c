//! Per-match state owned by the referee running it.

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::game::Parity;
use crate::protocol::messages::RunMatch;

/// Phase of a match. Each phase has exactly one successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchState {
    /// Invitations sent, waiting for both acknowledgments.
    WaitingForPlayers,
    /// Parity calls sent, waiting for both bets.
    CollectingChoices,
    /// Both bets in, drawing the number.
    DrawingNumber,
    /// Result decided and reported.
    Finished,
}

impl MatchState {
    /// The only phase reachable from this one.
    pub fn successor(self) -> Option<MatchState> {
        match self {
            MatchState::WaitingForPlayers => Some(MatchState::CollectingChoices),
            MatchState::CollectingChoices => Some(MatchState::DrawingNumber),
            MatchState::DrawingNumber => Some(MatchState::Finished),
            MatchState::Finished => None,
        }
    }
}

/// Everything a referee knows about one match in progress.
#[derive(Debug, Clone)]
pub struct MatchContext {
    /// Assignment this match was started from.
    pub assignment: RunMatch,
    /// Shared by both invitations and their acknowledgments.
    pub join_conversation: Uuid,
    state: MatchState,
    visited: Vec<MatchState>,
    joined: [bool; 2],
    choices: [Option<Parity>; 2],
    /// Conversation of the parity call sent to each seat.
    call_conversations: [Option<Uuid>; 2],
    drawn_number: Option<u8>,
}

impl MatchContext {
    /// Fresh context in [`MatchState::WaitingForPlayers`].
    pub fn new(assignment: RunMatch) -> Self {
        Self {
            assignment,
            join_conversation: Uuid::new_v4(),
            state: MatchState::WaitingForPlayers,
            visited: vec![MatchState::WaitingForPlayers],
            joined: [false; 2],
            choices: [None; 2],
            call_conversations: [None; 2],
            drawn_number: None,
        }
    }

    /// Current phase.
    pub fn state(&self) -> MatchState {
        self.state
    }

    /// Phases entered so far, in order.
    pub fn visited(&self) -> &[MatchState] {
        &self.visited
    }

    /// Moves to `next`. Anything but the successor of the current phase is
    /// refused and leaves the phase unchanged.
    pub fn transition(&mut self, next: MatchState) -> bool {
        if self.state.successor() != Some(next) {
            warn!(
                match_id = %self.assignment.match_id,
                from = ?self.state,
                to = ?next,
                "refused match state transition"
            );
            return false;
        }
        self.state = next;
        self.visited.push(next);
        true
    }

    /// Steps through every remaining phase up to [`MatchState::Finished`].
    pub fn finish(&mut self) {
        while let Some(next) = self.state.successor() {
            self.transition(next);
        }
    }

    /// `[player_a, player_b]`.
    pub fn players(&self) -> [&str; 2] {
        [&self.assignment.player_a, &self.assignment.player_b]
    }

    /// `[player_a_endpoint, player_b_endpoint]`.
    pub fn endpoints(&self) -> [&str; 2] {
        [
            &self.assignment.player_a_endpoint,
            &self.assignment.player_b_endpoint,
        ]
    }

    fn seat(&self, player_id: &str) -> Option<usize> {
        self.players().iter().position(|p| *p == player_id)
    }

    /// Records the acknowledgment of `player_id`. Only counts while waiting
    /// for players.
    pub fn mark_joined(&mut self, player_id: &str) -> bool {
        match self.seat(player_id) {
            Some(seat) if self.state == MatchState::WaitingForPlayers => {
                self.joined[seat] = true;
                true
            }
            _ => false,
        }
    }

    /// Acknowledgments received, by seat.
    pub fn joined(&self) -> [bool; 2] {
        self.joined
    }

    /// Whether both players acknowledged.
    pub fn both_joined(&self) -> bool {
        self.joined == [true, true]
    }

    /// Records the bet of `player_id`.
    ///
    /// Only accepted while collecting choices; a recorded bet is never
    /// overwritten.
    pub fn record_choice(&mut self, player_id: &str, parity: Parity) -> bool {
        if self.state != MatchState::CollectingChoices {
            return false;
        }
        match self.seat(player_id) {
            Some(seat) if self.choices[seat].is_none() => {
                self.choices[seat] = Some(parity);
                true
            }
            _ => false,
        }
    }

    /// Remembers the conversation of the parity call sent to `player_id`.
    /// Only valid while collecting choices.
    pub fn set_call_conversation(&mut self, player_id: &str, conversation_id: Uuid) -> bool {
        match self.seat(player_id) {
            Some(seat) if self.state == MatchState::CollectingChoices => {
                self.call_conversations[seat] = Some(conversation_id);
                true
            }
            _ => false,
        }
    }

    /// Conversation of the parity call sent to `player_id`.
    pub fn call_conversation(&self, player_id: &str) -> Option<Uuid> {
        self.seat(player_id)
            .and_then(|seat| self.call_conversations[seat])
    }

    /// Bets received, by seat.
    pub fn choices(&self) -> [Option<Parity>; 2] {
        self.choices
    }

    /// Remembers the drawn number. Only valid while drawing.
    pub fn set_drawn_number(&mut self, number: u8) -> bool {
        if self.state != MatchState::DrawingNumber || self.drawn_number.is_some() {
            return false;
        }
        self.drawn_number = Some(number);
        true
    }

    /// Number drawn for this match, if any.
    pub fn drawn_number(&self) -> Option<u8> {
        self.drawn_number
    }
}

#[cfg(test)]
pub(crate) fn assignment(match_id: &str, a: &str, b: &str) -> RunMatch {
    RunMatch {
        league_id: "L".into(),
        round_id: 1,
        match_id: match_id.into(),
        game_type: crate::game::GAME_TYPE.into(),
        player_a: a.into(),
        player_b: b.into(),
        player_a_endpoint: format!("http://{a}"),
        player_b_endpoint: format!("http://{b}"),
    }
}
