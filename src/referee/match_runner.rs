//! One match, from invitations to the result report.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::game::{self, Parity, Resolution};
use crate::protocol::builders;
use crate::protocol::messages::{
    ChoiceContext, ErrorCode, GameInvitation, MatchResultReport, Role, StandingSummary,
};
use crate::protocol::{validate_value, Message, MessageBody};

use super::match_state::{MatchContext, MatchState};
use super::Referee;

/// Plays the match described by `ctx` and reports its result.
///
/// `standings` are the `[player_a, player_b]` records shown to each player
/// in their parity call.
#[instrument(skip_all, fields(match_id = %ctx.assignment.match_id))]
pub(crate) async fn run(
    referee: &Referee,
    mut ctx: MatchContext,
    standings: [StandingSummary; 2],
) -> MatchContext {
    let inner = &referee.inner;
    info!(
        player_a = %ctx.assignment.player_a,
        player_b = %ctx.assignment.player_b,
        "match started"
    );

    invite(referee, &mut ctx).await;
    if !ctx.both_joined() {
        let joined = ctx.joined();
        for seat in [0, 1].into_iter().filter(|&seat| !joined[seat]) {
            notify_error(
                referee,
                &ctx,
                seat,
                ErrorCode::JoinTimeout,
                "no join acknowledgment before the deadline",
            )
            .await;
        }
        let resolution = Resolution::no_show(joined[0], joined[1]);
        warn!(?joined, "match abandoned before choices");
        report(referee, &ctx, &resolution).await;
        ctx.finish();
        return ctx;
    }

    ctx.transition(MatchState::CollectingChoices);
    collect_choices(referee, &mut ctx, standings).await;
    let [choice_a, choice_b] = ctx.choices();

    // A forfeit passes through the draw without drawing.
    ctx.transition(MatchState::DrawingNumber);
    let resolution = game::resolve(choice_a, choice_b, || game::draw_number(&mut rand::rng()));
    if let Some(number) = resolution.drawn_number {
        ctx.set_drawn_number(number);
    }
    info!(
        verdict = ?resolution.verdict,
        drawn_number = ?resolution.drawn_number,
        reason = ?resolution.reason,
        "match resolved"
    );

    let result = builders::game_result(ctx.players(), ctx.choices(), &resolution);
    let game_over = builders::game_over(
        &inner.sender,
        ctx.join_conversation,
        &ctx.assignment.match_id,
        &ctx.assignment.game_type,
        result,
    );
    let [endpoint_a, endpoint_b] = ctx.endpoints();
    let (sent_a, sent_b) = tokio::join!(
        inner.messenger.send(endpoint_a, &game_over),
        inner.messenger.send(endpoint_b, &game_over)
    );
    if sent_a.is_none() || sent_b.is_none() {
        debug!(
            player_a = sent_a.is_some(),
            player_b = sent_b.is_some(),
            "GAME_OVER not acknowledged"
        );
    }

    report(referee, &ctx, &resolution).await;
    ctx.transition(MatchState::Finished);
    ctx
}

/// Sends both invitations concurrently and records who acknowledged.
async fn invite(referee: &Referee, ctx: &mut MatchContext) {
    let inner = &referee.inner;
    let timeout = inner.config.join_timeout;
    let [player_a, player_b] = ctx.players();
    let invitation = |role: Role, opponent: &str| {
        Message::continuing(
            &inner.sender,
            ctx.join_conversation,
            GameInvitation {
                league_id: ctx.assignment.league_id.clone(),
                round_id: ctx.assignment.round_id,
                match_id: ctx.assignment.match_id.clone(),
                game_type: ctx.assignment.game_type.clone(),
                role_in_match: role,
                opponent_id: opponent.to_owned(),
            },
        )
    };
    let (to_a, to_b) = (
        invitation(Role::PlayerA, player_b),
        invitation(Role::PlayerB, player_a),
    );
    let [endpoint_a, endpoint_b] = ctx.endpoints();
    let (answer_a, answer_b) = tokio::join!(
        call(referee, endpoint_a, &to_a, timeout),
        call(referee, endpoint_b, &to_b, timeout)
    );

    let acks: Vec<String> = [answer_a, answer_b]
        .into_iter()
        .flatten()
        .filter_map(|answer| match answer.body {
            MessageBody::GameJoinAck(ack)
                if ack.accept && ack.match_id == ctx.assignment.match_id =>
            {
                Some(ack.player_id)
            }
            other => {
                debug!(message_type = other.message_type(), "unexpected invitation answer");
                None
            }
        })
        .collect();
    for player_id in acks {
        ctx.mark_joined(&player_id);
    }
}

/// Sends both parity calls concurrently and records the valid bets.
async fn collect_choices(
    referee: &Referee,
    ctx: &mut MatchContext,
    standings: [StandingSummary; 2],
) {
    let inner = &referee.inner;
    let timeout = inner.config.choice_timeout;
    let [player_a, player_b] = ctx.players();
    let parity_call = |player_id: &str, opponent_id: &str, record: StandingSummary| {
        builders::choose_parity_call(
            &inner.sender,
            &ctx.assignment.match_id,
            player_id,
            &ctx.assignment.game_type,
            ChoiceContext {
                opponent_id: opponent_id.to_owned(),
                round_id: ctx.assignment.round_id,
                your_standings: record,
            },
            timeout,
        )
    };
    let (to_a, to_b) = (
        parity_call(player_a, player_b, standings[0]),
        parity_call(player_b, player_a, standings[1]),
    );
    let (player_a, player_b) = (player_a.to_owned(), player_b.to_owned());
    ctx.set_call_conversation(&player_a, to_a.conversation_id);
    ctx.set_call_conversation(&player_b, to_b.conversation_id);

    let [endpoint_a, endpoint_b] = ctx.endpoints();
    let (answer_a, answer_b) = tokio::join!(
        call(referee, endpoint_a, &to_a, timeout),
        call(referee, endpoint_b, &to_b, timeout)
    );

    let view: &MatchContext = ctx;
    let bets: Vec<(usize, Option<Parity>)> = [answer_a, answer_b]
        .into_iter()
        .enumerate()
        .map(|(seat, answer)| (seat, parity_from(answer, view, view.players()[seat])))
        .collect();
    for (seat, bet) in bets {
        let player_id = ctx.players()[seat].to_owned();
        match bet {
            Some(parity) => {
                ctx.record_choice(&player_id, parity);
            }
            None => {
                notify_error(
                    referee,
                    ctx,
                    seat,
                    ErrorCode::ChoiceTimeout,
                    "no valid parity choice before the deadline",
                )
                .await;
            }
        }
    }
}

/// The bet carried by `answer`, if it answers the parity call sent to
/// `player_id` in this match.
fn parity_from(answer: Option<Message>, ctx: &MatchContext, player_id: &str) -> Option<Parity> {
    let answer = answer?;
    if ctx.call_conversation(player_id) != Some(answer.conversation_id) {
        debug!(player_id, conversation_id = %answer.conversation_id, "parity answer from another conversation");
        return None;
    }
    match answer.body {
        MessageBody::ChooseParityResponse(response)
            if response.player_id == player_id && response.match_id == ctx.assignment.match_id =>
        {
            Some(response.parity_choice)
        }
        other => {
            debug!(player_id, message_type = other.message_type(), "invalid parity answer");
            None
        }
    }
}

/// One delivery bounded by the protocol `timeout`, answer decoded.
async fn call(
    referee: &Referee,
    endpoint: &str,
    message: &Message,
    timeout: Duration,
) -> Option<Message> {
    let answer: Value = tokio::time::timeout(timeout, referee.inner.messenger.send(endpoint, message))
        .await
        .ok()
        .flatten()?;
    match validate_value(answer) {
        Ok(message) => Some(message),
        Err(e) => {
            debug!(endpoint, %e, "answer is not a protocol message");
            None
        }
    }
}

async fn notify_error(
    referee: &Referee,
    ctx: &MatchContext,
    seat: usize,
    error_code: ErrorCode,
    description: &str,
) {
    let player_id = ctx.players()[seat];
    warn!(player_id, ?error_code, "player failed a deadline");
    let message = builders::game_error(
        &referee.inner.sender,
        &ctx.assignment.match_id,
        player_id,
        error_code,
        description,
        "none",
    );
    referee
        .inner
        .messenger
        .send(ctx.endpoints()[seat], &message)
        .await;
}

/// Reports the result to the league manager with retries.
async fn report(referee: &Referee, ctx: &MatchContext, resolution: &Resolution) {
    let inner = &referee.inner;
    let Some(auth_token) = referee.auth_token() else {
        warn!("reporting a result without being registered");
        return;
    };
    let assignment = &ctx.assignment;
    let message = Message::new(
        inner.sender.clone(),
        MatchResultReport {
            league_id: assignment.league_id.clone(),
            round_id: assignment.round_id,
            match_id: assignment.match_id.clone(),
            game_type: assignment.game_type.clone(),
            auth_token,
            player_a: assignment.player_a.clone(),
            player_b: assignment.player_b.clone(),
            result: builders::reported_result(
                ctx.players(),
                ctx.choices(),
                resolution,
                inner.config.scoring,
            ),
        },
    );
    let league_manager = &inner.identity.league_manager;
    match inner
        .messenger
        .send_with_retry(league_manager, &message, inner.config.retry_policy(), true)
        .await
    {
        Ok(Some(_)) => info!("result reported"),
        Ok(None) => warn!("result report was not delivered"),
        Err(e) => warn!(%e, "result report not sent"),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::agent::{AgentIdentity, AgentType};
    use crate::configuration::Configuration;
    use crate::game::{OutcomeReason, Verdict};
    use crate::protocol::messages::{
        ChooseParityResponse, GameError, GameJoinAck, MatchResultReport,
    };
    use crate::protocol::timestamp_now;
    use crate::referee::match_state::assignment;
    use crate::transport::{circuit_breaker::BreakerRegistry, Messenger, Transport};

    /// How a scripted player behaves.
    #[derive(Debug, Clone, Copy)]
    pub(crate) enum Script {
        /// Joins and bets.
        Plays(Parity),
        /// Never answers the invitation.
        NoShow,
        /// Joins, then never answers the parity call.
        Silent,
        /// Joins, then answers the parity call an hour late.
        Late(Parity),
        /// Joins, then bets in a conversation of its own.
        Stray(Parity),
    }

    /// Plays scripted players (keyed by endpoint `http://<id>`) and records
    /// what reaches the league manager.
    #[derive(Default)]
    pub(crate) struct Scripted {
        pub scripts: HashMap<String, Script>,
        pub reports: Mutex<Vec<MatchResultReport>>,
        pub errors: Mutex<Vec<GameError>>,
        pub game_overs: Mutex<Vec<String>>,
    }

    impl Scripted {
        pub(crate) fn new(scripts: &[(&str, Script)]) -> Self {
            Self {
                scripts: scripts
                    .iter()
                    .map(|(id, s)| (format!("http://{id}"), *s))
                    .collect(),
                ..Default::default()
            }
        }
    }

    fn answer(message: Message) -> Option<Value> {
        Some(serde_json::to_value(message).unwrap())
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(&self, endpoint: &str, message: &Message) -> Option<Value> {
            let player_id = endpoint.trim_start_matches("http://").to_owned();
            let script = self.scripts.get(endpoint).copied();
            match (&message.body, script) {
                (MessageBody::GameInvitation(_), Some(Script::NoShow)) => None,
                (MessageBody::GameInvitation(invitation), Some(_)) => answer(Message::reply(
                    message,
                    format!("player:{player_id}"),
                    GameJoinAck {
                        match_id: invitation.match_id.clone(),
                        player_id,
                        arrival_timestamp: timestamp_now(),
                        accept: true,
                    },
                )),
                (MessageBody::ChooseParityCall(call), Some(Script::Plays(parity) | Script::Late(parity))) => {
                    if matches!(script, Some(Script::Late(_))) {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                    }
                    answer(Message::reply(
                        message,
                        format!("player:{player_id}"),
                        ChooseParityResponse {
                            match_id: call.match_id.clone(),
                            player_id,
                            parity_choice: parity,
                        },
                    ))
                }
                (MessageBody::ChooseParityCall(call), Some(Script::Stray(parity))) => {
                    answer(Message::new(
                        format!("player:{player_id}"),
                        ChooseParityResponse {
                            match_id: call.match_id.clone(),
                            player_id,
                            parity_choice: parity,
                        },
                    ))
                }
                (MessageBody::ChooseParityCall(_), _) => None,
                (MessageBody::GameOver(_), _) => {
                    self.game_overs.lock().unwrap().push(player_id);
                    Some(json!({"status": "ok"}))
                }
                (MessageBody::GameError(error), _) => {
                    self.errors.lock().unwrap().push(error.clone());
                    Some(json!({"status": "ok"}))
                }
                (MessageBody::MatchResultReport(report), _) => {
                    self.reports.lock().unwrap().push(report.clone());
                    Some(json!({"status": "ok", "message": "result recorded"}))
                }
                _ => Some(json!({"status": "ok"})),
            }
        }
    }

    pub(crate) fn referee(transport: Arc<Scripted>) -> Referee {
        let config = Configuration::new()
            .with_join_timeout(Duration::from_secs(5))
            .with_choice_timeout(Duration::from_secs(30))
            .with_retry(3, Duration::from_millis(100));
        let messenger = Messenger::new(
            transport,
            Arc::new(BreakerRegistry::new(5, Duration::from_secs(60))),
        );
        let identity = AgentIdentity::new("REF01", AgentType::Referee, "http://REF01", "http://LM");
        let referee = Referee::new(identity, config, messenger, 4);
        referee.set_auth_token("token".into());
        referee
    }

    const EVERY_PHASE: [MatchState; 4] = [
        MatchState::WaitingForPlayers,
        MatchState::CollectingChoices,
        MatchState::DrawingNumber,
        MatchState::Finished,
    ];

    async fn play(scripts: &[(&str, Script)]) -> (MatchContext, Arc<Scripted>) {
        let transport = Arc::new(Scripted::new(scripts));
        let referee = referee(transport.clone());
        let ctx = MatchContext::new(assignment("R1M1", "P01", "P02"));
        let ctx = run(&referee, ctx, [StandingSummary::default(); 2]).await;
        (ctx, transport)
    }

    #[tokio::test(start_paused = true)]
    async fn both_players_answer() {
        let (ctx, transport) = play(&[
            ("P01", Script::Plays(Parity::Even)),
            ("P02", Script::Plays(Parity::Odd)),
        ])
        .await;
        assert_eq!(ctx.state(), MatchState::Finished);
        assert_eq!(ctx.choices(), [Some(Parity::Even), Some(Parity::Odd)]);
        let number = ctx.drawn_number().unwrap();
        assert!((1..=10).contains(&number));

        let reports = transport.reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        let expected = if number % 2 == 0 { "P01" } else { "P02" };
        assert_eq!(reports[0].result.winner.as_deref(), Some(expected));
        assert_eq!(reports[0].result.score[expected], 3);
        assert_eq!(reports[0].auth_token, "token");
        assert_eq!(transport.game_overs.lock().unwrap().len(), 2);
        assert!(transport.errors.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn late_answer_forfeits() {
        let (ctx, transport) = play(&[
            ("P01", Script::Late(Parity::Even)),
            ("P02", Script::Plays(Parity::Odd)),
        ])
        .await;
        assert_eq!(ctx.choices(), [None, Some(Parity::Odd)]);
        assert_eq!(ctx.drawn_number(), None);
        assert_eq!(ctx.visited(), EVERY_PHASE);

        let reports = transport.reports.lock().unwrap();
        assert_eq!(reports[0].result.winner.as_deref(), Some("P02"));
        assert_eq!(reports[0].result.details.reason, OutcomeReason::Forfeit);
        let errors = transport.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_code, ErrorCode::ChoiceTimeout);
        assert_eq!(errors[0].affected_player.as_deref(), Some("P01"));
    }

    #[tokio::test(start_paused = true)]
    async fn double_timeout_is_a_draw() {
        let (ctx, transport) = play(&[("P01", Script::Silent), ("P02", Script::Silent)]).await;
        assert_eq!(ctx.state(), MatchState::Finished);
        let reports = transport.reports.lock().unwrap();
        assert_eq!(reports[0].result.winner, None);
        assert_eq!(reports[0].result.details.reason, OutcomeReason::DoubleForfeit);
        assert_eq!(reports[0].result.score["P01"], 1);
        assert_eq!(transport.errors.lock().unwrap().len(), 2);
        assert_eq!(transport.game_overs.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn no_show_is_a_technical_loss_without_game_over() {
        let (ctx, transport) = play(&[
            ("P01", Script::Plays(Parity::Even)),
            ("P02", Script::NoShow),
        ])
        .await;
        assert_eq!(ctx.visited(), EVERY_PHASE);
        assert_eq!(ctx.choices(), [None, None]);
        assert!(transport.game_overs.lock().unwrap().is_empty());

        let reports = transport.reports.lock().unwrap();
        assert_eq!(reports[0].result.winner.as_deref(), Some("P01"));
        assert_eq!(reports[0].result.details.reason, OutcomeReason::NoShow);
        let errors = transport.errors.lock().unwrap();
        assert_eq!(errors[0].error_code, ErrorCode::JoinTimeout);
        assert_eq!(errors[0].affected_player.as_deref(), Some("P02"));
    }

    #[tokio::test(start_paused = true)]
    async fn bets_from_another_conversation_are_refused() {
        let (ctx, transport) = play(&[
            ("P01", Script::Plays(Parity::Even)),
            ("P02", Script::Stray(Parity::Odd)),
        ])
        .await;
        assert_eq!(ctx.choices(), [Some(Parity::Even), None]);
        assert_eq!(ctx.visited(), EVERY_PHASE);

        let reports = transport.reports.lock().unwrap();
        assert_eq!(reports[0].result.winner.as_deref(), Some("P01"));
        assert_eq!(reports[0].result.details.reason, OutcomeReason::Forfeit);
        let errors = transport.errors.lock().unwrap();
        assert_eq!(errors[0].affected_player.as_deref(), Some("P02"));
    }

    #[test]
    fn resolution_of_a_no_show_names_the_present_player() {
        assert_eq!(Resolution::no_show(false, true).verdict, Verdict::PlayerB);
    }
}
