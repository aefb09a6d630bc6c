//! Typed message bodies.
//!
//! Every message shares the [`Message`] envelope; the `message_type` tag selects
//! the [`MessageBody`] variant and the variant's fields are flattened next to
//! the envelope fields on the wire.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::agent::split_sender;
use crate::game::{OutcomeReason, Parity};

use super::{timestamp_now, PROTOCOL_VERSION};

/// Protocol-versioned envelope around a [`MessageBody`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Protocol version, always [`PROTOCOL_VERSION`] for messages built here.
    pub protocol: String,
    /// `"<type>:<id>"`, or the bare role of a singleton agent.
    pub sender: String,
    /// UTC, millisecond precision, `Z` suffix.
    pub timestamp: String,
    /// Correlates the messages of one exchange.
    pub conversation_id: Uuid,
    /// Type specific payload, tagged by `message_type`.
    #[serde(flatten)]
    pub body: MessageBody,
}

impl Message {
    /// Starts a new exchange.
    pub fn new(sender: impl Into<String>, body: impl Into<MessageBody>) -> Message {
        Message::continuing(sender, Uuid::new_v4(), body)
    }

    /// Builds a message belonging to an existing exchange.
    pub fn continuing(
        sender: impl Into<String>,
        conversation_id: Uuid,
        body: impl Into<MessageBody>,
    ) -> Message {
        Message {
            protocol: PROTOCOL_VERSION.to_owned(),
            sender: sender.into(),
            timestamp: timestamp_now(),
            conversation_id,
            body: body.into(),
        }
    }

    /// Answers `request`, keeping its conversation id.
    pub fn reply(
        request: &Message,
        sender: impl Into<String>,
        body: impl Into<MessageBody>,
    ) -> Message {
        Message::continuing(sender, request.conversation_id, body)
    }

    /// Wire name of the body variant.
    pub fn message_type(&self) -> &'static str {
        self.body.message_type()
    }

    /// Id part of the sender (`"P01"` for `"player:P01"`).
    pub fn sender_id(&self) -> &str {
        split_sender(&self.sender).1
    }
}

macro_rules! message_bodies {
    ($( $(#[$doc:meta])* $variant:ident($ty:ty) => $name:literal, )*) => {
        /// Payload of a [`Message`], one variant per `message_type`.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(tag = "message_type")]
        pub enum MessageBody {
            $(
                $(#[$doc])*
                #[serde(rename = $name)]
                $variant($ty),
            )*
        }

        impl MessageBody {
            /// Wire name of this variant.
            pub fn message_type(&self) -> &'static str {
                match self {
                    $( MessageBody::$variant(_) => $name, )*
                }
            }
        }

        /// Every `message_type` this crate understands.
        pub const MESSAGE_TYPES: &[&str] = &[$($name),*];
    };
}

message_bodies! {
    /// Referee asks to join the league.
    RefereeRegisterRequest(RefereeRegisterRequest) => "REFEREE_REGISTER_REQUEST",
    /// League manager answers a referee registration.
    RefereeRegisterResponse(RegisterResponse) => "REFEREE_REGISTER_RESPONSE",
    /// Player asks to join the league.
    LeagueRegisterRequest(LeagueRegisterRequest) => "LEAGUE_REGISTER_REQUEST",
    /// League manager answers a player registration.
    LeagueRegisterResponse(RegisterResponse) => "LEAGUE_REGISTER_RESPONSE",
    /// Agent leaves the league.
    Deregister(Deregister) => "DEREGISTER",
    /// Launcher asks the league manager to start playing.
    StartLeague(StartLeague) => "START_LEAGUE",
    /// Explicit match assignment to a referee.
    RunMatch(RunMatch) => "RUN_MATCH",
    /// Referee invites a player to a match.
    GameInvitation(GameInvitation) => "GAME_INVITATION",
    /// Player acknowledges an invitation.
    GameJoinAck(GameJoinAck) => "GAME_JOIN_ACK",
    /// Referee asks a player for a parity bet.
    ChooseParityCall(ChooseParityCall) => "CHOOSE_PARITY_CALL",
    /// Player's parity bet.
    ChooseParityResponse(ChooseParityResponse) => "CHOOSE_PARITY_RESPONSE",
    /// Referee tells both players how the match ended.
    GameOver(GameOver) => "GAME_OVER",
    /// Referee reports a match result to the league manager.
    MatchResultReport(MatchResultReport) => "MATCH_RESULT_REPORT",
    /// League manager publishes the matches of a round.
    RoundAnnouncement(RoundAnnouncement) => "ROUND_ANNOUNCEMENT",
    /// League manager closes a round.
    RoundCompleted(RoundCompleted) => "ROUND_COMPLETED",
    /// League manager publishes the standings.
    LeagueStandingsUpdate(LeagueStandingsUpdate) => "LEAGUE_STANDINGS_UPDATE",
    /// League manager announces the end of the league.
    LeagueCompleted(LeagueCompleted) => "LEAGUE_COMPLETED",
    /// Authenticated read of the league state.
    LeagueQuery(LeagueQuery) => "LEAGUE_QUERY",
    /// Answer to a [`LeagueQuery`].
    LeagueQueryResponse(LeagueQueryResponse) => "LEAGUE_QUERY_RESPONSE",
    /// Protocol-level error notification.
    GameError(GameError) => "GAME_ERROR",
}

macro_rules! impl_from_body {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for MessageBody {
                fn from(body: $variant) -> MessageBody {
                    MessageBody::$variant(body)
                }
            }
        )*
    };
}

impl_from_body!(
    RefereeRegisterRequest,
    LeagueRegisterRequest,
    Deregister,
    StartLeague,
    RunMatch,
    GameInvitation,
    GameJoinAck,
    ChooseParityCall,
    ChooseParityResponse,
    GameOver,
    MatchResultReport,
    RoundAnnouncement,
    RoundCompleted,
    LeagueStandingsUpdate,
    LeagueCompleted,
    LeagueQuery,
    LeagueQueryResponse,
    GameError,
);

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefereeMeta {
    pub display_name: String,
    pub version: String,
    pub game_types: Vec<String>,
    pub contact_endpoint: String,
    pub max_concurrent_matches: u32,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerMeta {
    pub display_name: String,
    pub version: String,
    pub game_types: Vec<String>,
    pub contact_endpoint: String,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefereeRegisterRequest {
    pub referee_meta: RefereeMeta,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeagueRegisterRequest {
    pub player_meta: PlayerMeta,
}

/// Outcome of a registration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegisterStatus {
    #[allow(missing_docs)]
    Accepted,
    #[allow(missing_docs)]
    Rejected,
}

/// Body of both registration responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    /// Whether the agent was registered.
    pub status: RegisterStatus,
    /// League the agent registered with.
    pub league_id: String,
    /// Id the league manager knows the agent by.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Opaque token to present on authenticated requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Why the registration was rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deregister {
    pub auth_token: String,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartLeague {
    pub league_id: String,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMatch {
    pub league_id: String,
    pub round_id: u32,
    pub match_id: String,
    pub game_type: String,
    pub player_a: String,
    pub player_b: String,
    pub player_a_endpoint: String,
    pub player_b_endpoint: String,
}

/// Seat of a player in a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    #[allow(missing_docs)]
    PlayerA,
    #[allow(missing_docs)]
    PlayerB,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameInvitation {
    pub league_id: String,
    pub round_id: u32,
    pub match_id: String,
    pub game_type: String,
    pub role_in_match: Role,
    pub opponent_id: String,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameJoinAck {
    pub match_id: String,
    pub player_id: String,
    pub arrival_timestamp: String,
    pub accept: bool,
}

/// A player's record as shown to that player.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandingSummary {
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceContext {
    pub opponent_id: String,
    pub round_id: u32,
    pub your_standings: StandingSummary,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChooseParityCall {
    pub match_id: String,
    pub player_id: String,
    pub game_type: String,
    /// Time after which the referee stops waiting, same format as `timestamp`.
    pub deadline: String,
    pub context: ChoiceContext,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChooseParityResponse {
    pub match_id: String,
    pub player_id: String,
    pub parity_choice: Parity,
}

/// Headline of a finished match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameStatus {
    /// Someone won.
    Win,
    /// Nobody won.
    Draw,
}

/// Outcome sent to both players.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameResult {
    #[allow(missing_docs)]
    pub status: GameStatus,
    /// `None` on a draw.
    pub winner_player_id: Option<String>,
    /// `None` when a forfeit short-circuited the draw.
    pub drawn_number: Option<u8>,
    #[allow(missing_docs)]
    pub number_parity: Option<Parity>,
    /// Player id to bet, `None` for a player who did not answer.
    pub choices: BTreeMap<String, Option<Parity>>,
    #[allow(missing_docs)]
    pub reason: OutcomeReason,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameOver {
    pub match_id: String,
    pub game_type: String,
    pub game_result: GameResult,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDetails {
    pub drawn_number: Option<u8>,
    pub choices: BTreeMap<String, Option<Parity>>,
    pub reason: OutcomeReason,
}

/// Result block of a [`MatchResultReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedResult {
    /// `None` on a draw.
    pub winner: Option<String>,
    /// Points each player earned in this match.
    pub score: BTreeMap<String, u32>,
    #[allow(missing_docs)]
    pub details: ReportDetails,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResultReport {
    pub league_id: String,
    pub round_id: u32,
    pub match_id: String,
    pub game_type: String,
    pub auth_token: String,
    pub player_a: String,
    pub player_b: String,
    pub result: ReportedResult,
}

/// One match of a [`RoundAnnouncement`].
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledMatch {
    pub match_id: String,
    pub game_type: String,
    #[serde(rename = "player_A_id")]
    pub player_a_id: String,
    #[serde(rename = "player_B_id")]
    pub player_b_id: String,
    #[serde(rename = "player_A_endpoint")]
    pub player_a_endpoint: String,
    #[serde(rename = "player_B_endpoint")]
    pub player_b_endpoint: String,
    pub referee_id: String,
    pub referee_endpoint: String,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundAnnouncement {
    pub league_id: String,
    pub round_id: u32,
    pub matches: Vec<ScheduledMatch>,
    /// Standings at the start of the round.
    #[serde(default)]
    pub standings: Vec<StandingRow>,
}

/// Counters over the results collected for a round.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub scheduled: usize,
    pub completed: usize,
    pub decisive: usize,
    pub draws: usize,
    pub technical: usize,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundCompleted {
    pub league_id: String,
    pub round_id: u32,
    pub matches_completed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_round_id: Option<u32>,
    pub summary: RoundSummary,
}

/// One row of the standings table.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandingRow {
    pub player_id: String,
    pub display_name: String,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    pub points: u32,
    pub games_played: u32,
    /// 1-based, strict.
    pub rank: usize,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeagueStandingsUpdate {
    pub league_id: String,
    pub round_id: u32,
    pub standings: Vec<StandingRow>,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Champion {
    pub player_id: String,
    pub display_name: String,
    pub points: u32,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeagueCompleted {
    pub league_id: String,
    pub total_rounds: u32,
    pub total_matches: usize,
    /// `None` for a league without players.
    pub champion: Option<Champion>,
    pub final_standings: Vec<StandingRow>,
}

/// What a [`LeagueQuery`] asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryType {
    /// League status, current round and last error.
    GetStatus,
    /// Current standings.
    GetStandings,
    /// Full match schedule.
    GetSchedule,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeagueQuery {
    pub league_id: String,
    pub auth_token: String,
    pub query_type: QueryType,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeagueQueryResponse {
    pub league_id: String,
    pub query_type: QueryType,
    pub success: bool,
    pub data: Value,
}

/// Machine readable cause of a [`GameError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The player never acknowledged the invitation.
    JoinTimeout,
    /// The player did not send a parity bet in time.
    ChoiceTimeout,
    /// The player answered with something that is not a bet for this match.
    InvalidResponse,
    /// The agent presented an unknown token.
    AuthenticationFailed,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryInfo {
    pub retry_count: u32,
    pub max_retries: u32,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<String>,
    pub error_code: ErrorCode,
    pub error_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_player: Option<String>,
    pub action_required: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_info: Option<RetryInfo>,
}

/// Answer of an agent to an inbound message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    /// A protocol message.
    Message(Box<Message>),
    /// A bare `{status, message}` acknowledgment.
    Status(StatusReply),
}

/// `status` field of a [`StatusReply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    #[allow(missing_docs)]
    Ok,
    #[allow(missing_docs)]
    Error,
}

/// Bare acknowledgment.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReply {
    pub status: ReplyStatus,
    pub message: String,
}

impl Reply {
    /// Successful acknowledgment.
    pub fn ok(message: impl Into<String>) -> Reply {
        Reply::Status(StatusReply {
            status: ReplyStatus::Ok,
            message: message.into(),
        })
    }

    /// Protocol-level failure.
    pub fn error(message: impl Into<String>) -> Reply {
        Reply::Status(StatusReply {
            status: ReplyStatus::Error,
            message: message.into(),
        })
    }

    /// Reply to a `message_type` nobody handles.
    pub fn unknown_message_type() -> Reply {
        Reply::error("Unknown message type")
    }

    /// Whether this is a `{status: "error"}` reply.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Reply::Status(StatusReply {
                status: ReplyStatus::Error,
                ..
            })
        )
    }
}

impl From<Message> for Reply {
    fn from(message: Message) -> Reply {
        Reply::Message(Box::new(message))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn body_is_flattened_next_to_the_envelope() {
        let msg = Message::new(
            "player:P01",
            ChooseParityResponse {
                match_id: "R1M1".into(),
                player_id: "P01".into(),
                parity_choice: Parity::Even,
            },
        );
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["protocol"], PROTOCOL_VERSION);
        assert_eq!(value["message_type"], "CHOOSE_PARITY_RESPONSE");
        assert_eq!(value["parity_choice"], "even");
        assert_eq!(value["conversation_id"], msg.conversation_id.to_string());

        let back: Message = serde_json::from_value(value).unwrap();
        assert_eq!(back, msg);
        assert_eq!(back.sender_id(), "P01");
    }

    #[test]
    fn reply_keeps_the_conversation() {
        let call = Message::new(
            "referee:REF01",
            GameInvitation {
                league_id: "L".into(),
                round_id: 1,
                match_id: "R1M1".into(),
                game_type: "even_odd".into(),
                role_in_match: Role::PlayerA,
                opponent_id: "P02".into(),
            },
        );
        let ack = Message::reply(
            &call,
            "player:P01",
            GameJoinAck {
                match_id: "R1M1".into(),
                player_id: "P01".into(),
                arrival_timestamp: call.timestamp.clone(),
                accept: true,
            },
        );
        assert_eq!(ack.conversation_id, call.conversation_id);
        assert_ne!(Message::new("x", StartLeague { league_id: "L".into() }).conversation_id, call.conversation_id);
    }

    #[test]
    fn scheduled_match_uses_upper_case_seat_names() {
        let m = ScheduledMatch {
            match_id: "R1M1".into(),
            game_type: "even_odd".into(),
            player_a_id: "P01".into(),
            player_b_id: "P02".into(),
            player_a_endpoint: "http://a".into(),
            player_b_endpoint: "http://b".into(),
            referee_id: "REF01".into(),
            referee_endpoint: "http://r".into(),
        };
        let value = serde_json::to_value(&m).unwrap();
        assert_eq!(value["player_A_id"], "P01");
        assert_eq!(value["player_B_id"], "P02");
    }

    #[test]
    fn status_replies_serialize_bare() {
        assert_eq!(
            serde_json::to_value(Reply::unknown_message_type()).unwrap(),
            json!({"status": "error", "message": "Unknown message type"})
        );
        assert!(Reply::error("x").is_error());
        assert!(!Reply::ok("x").is_error());
    }
}
