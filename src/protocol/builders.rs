//! Builders for messages whose fields are derived from league or match state.

use std::{collections::BTreeMap, time::Duration};

use uuid::Uuid;

use crate::configuration::Scoring;
use crate::game::{Parity, Resolution, Verdict};

use super::messages::{
    Champion, ChoiceContext, ChooseParityCall, ErrorCode, GameError, GameOver, GameResult,
    GameStatus, LeagueCompleted, Message, ReportDetails, ReportedResult, StandingRow,
};
use super::timestamp_in;

/// Winner id for `verdict` between `player_a` and `player_b`.
pub fn winner_id<'a>(verdict: Verdict, player_a: &'a str, player_b: &'a str) -> Option<&'a str> {
    match verdict {
        Verdict::PlayerA => Some(player_a),
        Verdict::PlayerB => Some(player_b),
        Verdict::Draw => None,
    }
}

fn choice_map(players: [&str; 2], choices: [Option<Parity>; 2]) -> BTreeMap<String, Option<Parity>> {
    players
        .into_iter()
        .map(str::to_owned)
        .zip(choices)
        .collect()
}

/// `CHOOSE_PARITY_CALL` whose deadline is `timeout` from now.
pub fn choose_parity_call(
    sender: &str,
    match_id: &str,
    player_id: &str,
    game_type: &str,
    context: ChoiceContext,
    timeout: Duration,
) -> Message {
    Message::new(
        sender,
        ChooseParityCall {
            match_id: match_id.to_owned(),
            player_id: player_id.to_owned(),
            game_type: game_type.to_owned(),
            deadline: timestamp_in(timeout),
            context,
        },
    )
}

/// Result block sent to players in `GAME_OVER`.
pub fn game_result(
    players: [&str; 2],
    choices: [Option<Parity>; 2],
    resolution: &Resolution,
) -> GameResult {
    let winner = winner_id(resolution.verdict, players[0], players[1]);
    GameResult {
        status: if winner.is_some() {
            GameStatus::Win
        } else {
            GameStatus::Draw
        },
        winner_player_id: winner.map(str::to_owned),
        drawn_number: resolution.drawn_number,
        number_parity: resolution.number_parity(),
        choices: choice_map(players, choices),
        reason: resolution.reason,
    }
}

/// `GAME_OVER` for one player of the match.
pub fn game_over(
    sender: &str,
    conversation_id: Uuid,
    match_id: &str,
    game_type: &str,
    result: GameResult,
) -> Message {
    Message::continuing(
        sender,
        conversation_id,
        GameOver {
            match_id: match_id.to_owned(),
            game_type: game_type.to_owned(),
            game_result: result,
        },
    )
}

/// Result block of a `MATCH_RESULT_REPORT`, scored with `scoring`.
pub fn reported_result(
    players: [&str; 2],
    choices: [Option<Parity>; 2],
    resolution: &Resolution,
    scoring: Scoring,
) -> ReportedResult {
    let (a, b) = match resolution.verdict {
        Verdict::PlayerA => (scoring.win, scoring.loss),
        Verdict::PlayerB => (scoring.loss, scoring.win),
        Verdict::Draw => (scoring.draw, scoring.draw),
    };
    ReportedResult {
        winner: winner_id(resolution.verdict, players[0], players[1]).map(str::to_owned),
        score: BTreeMap::from([(players[0].to_owned(), a), (players[1].to_owned(), b)]),
        details: ReportDetails {
            drawn_number: resolution.drawn_number,
            choices: choice_map(players, choices),
            reason: resolution.reason,
        },
    }
}

/// `GAME_ERROR` about `affected_player` in `match_id`.
pub fn game_error(
    sender: &str,
    match_id: &str,
    affected_player: &str,
    error_code: ErrorCode,
    description: impl Into<String>,
    action_required: impl Into<String>,
) -> Message {
    Message::new(
        sender,
        GameError {
            match_id: Some(match_id.to_owned()),
            error_code,
            error_description: description.into(),
            affected_player: Some(affected_player.to_owned()),
            action_required: action_required.into(),
            retry_info: None,
        },
    )
}

/// `LEAGUE_COMPLETED` whose champion is the top ranked row.
pub fn league_completed(
    sender: &str,
    league_id: &str,
    total_rounds: u32,
    total_matches: usize,
    final_standings: Vec<StandingRow>,
) -> Message {
    let champion = final_standings
        .iter()
        .min_by_key(|row| row.rank)
        .map(|row| Champion {
            player_id: row.player_id.clone(),
            display_name: row.display_name.clone(),
            points: row.points,
        });
    Message::new(
        sender,
        LeagueCompleted {
            league_id: league_id.to_owned(),
            total_rounds,
            total_matches,
            champion,
            final_standings,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::OutcomeReason;
    use crate::protocol::{messages::MessageBody, validate};

    fn row(id: &str, points: u32, rank: usize) -> StandingRow {
        StandingRow {
            player_id: id.into(),
            display_name: id.into(),
            wins: points / 3,
            losses: 0,
            draws: 0,
            points,
            games_played: 1,
            rank,
        }
    }

    #[test]
    fn forfeit_result_names_the_responder() {
        let res = crate::game::resolve(Some(Parity::Even), None, || unreachable!());
        let result = game_result(["P01", "P02"], [Some(Parity::Even), None], &res);
        assert_eq!(result.status, GameStatus::Win);
        assert_eq!(result.winner_player_id.as_deref(), Some("P01"));
        assert_eq!(result.drawn_number, None);
        assert_eq!(result.choices["P02"], None);
        assert_eq!(result.reason, OutcomeReason::Forfeit);
    }

    #[test]
    fn reported_score_follows_the_scoring_table() {
        let res = crate::game::resolve(Some(Parity::Even), Some(Parity::Even), || 3);
        let report = reported_result(
            ["P01", "P02"],
            [Some(Parity::Even), Some(Parity::Even)],
            &res,
            Scoring::default(),
        );
        assert_eq!(report.winner, None);
        assert_eq!(report.score["P01"], 1);
        assert_eq!(report.score["P02"], 1);
        assert_eq!(report.details.drawn_number, Some(3));
    }

    #[test]
    fn champion_is_rank_one() {
        let msg = league_completed("league_manager", "L", 3, 6, vec![row("P02", 6, 2), row("P01", 9, 1)]);
        assert!(validate(&msg).is_empty());
        let MessageBody::LeagueCompleted(body) = msg.body else {
            panic!("wrong body");
        };
        assert_eq!(body.champion.unwrap().player_id, "P01");
    }

    #[test]
    fn choose_call_deadline_is_a_timestamp() {
        let context = ChoiceContext {
            opponent_id: "P02".into(),
            round_id: 1,
            your_standings: Default::default(),
        };
        let msg = choose_parity_call("referee:REF01", "R1M1", "P01", "even_odd", context, Duration::from_secs(30));
        let MessageBody::ChooseParityCall(call) = &msg.body else {
            panic!("wrong body");
        };
        let deadline = crate::protocol::parse_timestamp(&call.deadline).unwrap();
        let sent = crate::protocol::parse_timestamp(&msg.timestamp).unwrap();
        assert!(deadline > sent);
    }
}
