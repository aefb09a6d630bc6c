//! Structural validation of inbound messages.
//!
//! [`validate_value`] is the gate every inbound JSON document goes through
//! before it reaches a handler: it checks the envelope, the fields required by
//! the message type and the value domains, then decodes the typed [`Message`].

use serde_json::Value;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::game::{MAX_NUMBER, MIN_NUMBER};

use super::messages::{Message, MESSAGE_TYPES};
use super::{parse_timestamp, PROTOCOL_VERSION};

/// Number of violations shown in an error message.
const SHOWN_VIOLATIONS: usize = 5;

const BASE_FIELDS: [&str; 5] = [
    "protocol",
    "message_type",
    "sender",
    "timestamp",
    "conversation_id",
];

/// Why an inbound document was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// `message_type` is missing or not a string.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    /// No schema is registered for this `message_type`.
    #[error("no schema registered for message type '{0}'")]
    SchemaNotFound(String),
    /// The document violates its schema.
    #[error("{message_type} failed validation: {}", summarize(.violations))]
    Validation {
        /// Type of the rejected message.
        message_type: String,
        /// Violations, in the order they were found.
        violations: Vec<String>,
    },
}

fn summarize(violations: &[String]) -> String {
    let mut out = violations
        .iter()
        .take(SHOWN_VIOLATIONS)
        .cloned()
        .collect::<Vec<_>>()
        .join("; ");
    if violations.len() > SHOWN_VIOLATIONS {
        out.push_str(&format!(" (and {} more)", violations.len() - SHOWN_VIOLATIONS));
    }
    out
}

/// Fields (dotted paths) a message type must carry besides the envelope.
fn required_fields(message_type: &str) -> Option<&'static [&'static str]> {
    let fields: &'static [&'static str] = match message_type {
        "REFEREE_REGISTER_REQUEST" => &[
            "referee_meta",
            "referee_meta.display_name",
            "referee_meta.version",
            "referee_meta.game_types",
            "referee_meta.contact_endpoint",
            "referee_meta.max_concurrent_matches",
        ],
        "LEAGUE_REGISTER_REQUEST" => &[
            "player_meta",
            "player_meta.display_name",
            "player_meta.version",
            "player_meta.game_types",
            "player_meta.contact_endpoint",
        ],
        "REFEREE_REGISTER_RESPONSE" | "LEAGUE_REGISTER_RESPONSE" => &["status", "league_id"],
        "DEREGISTER" => &["auth_token"],
        "START_LEAGUE" => &["league_id"],
        "RUN_MATCH" => &[
            "league_id",
            "round_id",
            "match_id",
            "game_type",
            "player_a",
            "player_b",
            "player_a_endpoint",
            "player_b_endpoint",
        ],
        "GAME_INVITATION" => &[
            "league_id",
            "round_id",
            "match_id",
            "game_type",
            "role_in_match",
            "opponent_id",
        ],
        "GAME_JOIN_ACK" => &["match_id", "player_id", "arrival_timestamp", "accept"],
        "CHOOSE_PARITY_CALL" => &[
            "match_id",
            "player_id",
            "game_type",
            "deadline",
            "context",
            "context.opponent_id",
            "context.round_id",
            "context.your_standings",
        ],
        "CHOOSE_PARITY_RESPONSE" => &["match_id", "player_id", "parity_choice"],
        "GAME_OVER" => &[
            "match_id",
            "game_type",
            "game_result",
            "game_result.status",
            "game_result.choices",
            "game_result.reason",
        ],
        "MATCH_RESULT_REPORT" => &[
            "league_id",
            "round_id",
            "match_id",
            "game_type",
            "auth_token",
            "player_a",
            "player_b",
            "result",
            "result.score",
            "result.details",
            "result.details.choices",
            "result.details.reason",
        ],
        "ROUND_ANNOUNCEMENT" => &["league_id", "round_id", "matches"],
        "ROUND_COMPLETED" => &["league_id", "round_id", "matches_completed", "summary"],
        "LEAGUE_STANDINGS_UPDATE" => &["league_id", "round_id", "standings"],
        "LEAGUE_COMPLETED" => &["league_id", "total_rounds", "total_matches", "final_standings"],
        "LEAGUE_QUERY" => &["league_id", "auth_token", "query_type"],
        "LEAGUE_QUERY_RESPONSE" => &["league_id", "query_type", "success", "data"],
        "GAME_ERROR" => &["error_code", "error_description", "action_required"],
        _ => return None,
    };
    debug_assert!(MESSAGE_TYPES.contains(&message_type));
    Some(fields)
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |node, key| node.get(key))
        .filter(|v| !v.is_null())
}

fn check_parity(value: &Value, path: &str, violations: &mut Vec<String>) {
    let Some(v) = lookup(value, path) else {
        return;
    };
    let ok = v
        .as_str()
        .is_some_and(|s| s.eq_ignore_ascii_case("even") || s.eq_ignore_ascii_case("odd"));
    if !ok {
        violations.push(format!("{path}: expected 'even' or 'odd', got {v}"));
    }
}

fn check_choices(value: &Value, path: &str, violations: &mut Vec<String>) {
    let Some(choices) = lookup(value, path) else {
        return;
    };
    let Some(map) = choices.as_object() else {
        violations.push(format!("{path}: expected an object"));
        return;
    };
    for player in map.keys() {
        check_parity(choices, player, violations);
    }
}

fn check_drawn_number(value: &Value, path: &str, violations: &mut Vec<String>) {
    let Some(v) = lookup(value, path) else {
        return;
    };
    let in_range = v
        .as_u64()
        .is_some_and(|n| (u64::from(MIN_NUMBER)..=u64::from(MAX_NUMBER)).contains(&n));
    if !in_range {
        violations.push(format!("{path}: expected an integer in [{MIN_NUMBER}, {MAX_NUMBER}], got {v}"));
    }
}

fn check_domains(message_type: &str, value: &Value, violations: &mut Vec<String>) {
    match message_type {
        "CHOOSE_PARITY_RESPONSE" => check_parity(value, "parity_choice", violations),
        "GAME_OVER" => {
            check_drawn_number(value, "game_result.drawn_number", violations);
            check_parity(value, "game_result.number_parity", violations);
            check_choices(value, "game_result.choices", violations);
        }
        "MATCH_RESULT_REPORT" => {
            check_drawn_number(value, "result.details.drawn_number", violations);
            check_choices(value, "result.details.choices", violations);
        }
        "GAME_JOIN_ACK" => {
            if lookup(value, "accept").is_some_and(|v| !v.is_boolean()) {
                violations.push("accept: expected a boolean".to_owned());
            }
        }
        _ => {}
    }
}

fn check_envelope(value: &Value, violations: &mut Vec<String>) {
    for field in BASE_FIELDS {
        if lookup(value, field).is_none() {
            violations.push(format!("missing required field '{field}'"));
        }
    }
    if let Some(protocol) = lookup(value, "protocol") {
        if protocol.as_str() != Some(PROTOCOL_VERSION) {
            violations.push(format!("protocol: expected '{PROTOCOL_VERSION}', got {protocol}"));
        }
    }
    if let Some(ts) = lookup(value, "timestamp") {
        match ts.as_str() {
            Some(s) => violations.extend(check_timestamp(s)),
            None => violations.push("timestamp: expected a string".to_owned()),
        }
    }
    if let Some(id) = lookup(value, "conversation_id") {
        if id.as_str().and_then(|s| Uuid::parse_str(s).ok()).is_none() {
            violations.push(format!("conversation_id: expected a UUID, got {id}"));
        }
    }
}

fn check_timestamp(raw: &str) -> Option<String> {
    if !raw.ends_with('Z') {
        Some(format!("timestamp: '{raw}' must be UTC with a 'Z' suffix"))
    } else if parse_timestamp(raw).is_err() {
        Some(format!("timestamp: '{raw}' is not YYYY-MM-DDTHH:MM:SS.mmmZ"))
    } else {
        None
    }
}

/// Checks the envelope of an already typed message.
///
/// Returns the violations found, empty when the message is well formed.
pub fn validate(message: &Message) -> Vec<String> {
    let mut violations = Vec::new();
    if message.protocol != PROTOCOL_VERSION {
        violations.push(format!(
            "protocol: expected '{PROTOCOL_VERSION}', got '{}'",
            message.protocol
        ));
    }
    if message.sender.is_empty() {
        violations.push("missing required field 'sender'".to_owned());
    }
    violations.extend(check_timestamp(&message.timestamp));
    violations
}

/// Validates an inbound JSON document and decodes it.
pub fn validate_value(value: Value) -> Result<Message, ProtocolError> {
    let message_type = match value.get("message_type") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => {
            return Err(ProtocolError::InvalidMessage(format!(
                "message_type must be a string, got {other}"
            )))
        }
        None => {
            return Err(ProtocolError::InvalidMessage(
                "missing message_type".to_owned(),
            ))
        }
    };
    let Some(required) = required_fields(&message_type) else {
        return Err(ProtocolError::SchemaNotFound(message_type));
    };

    let mut violations = Vec::new();
    check_envelope(&value, &mut violations);
    for field in required {
        if lookup(&value, field).is_none() {
            violations.push(format!("missing required field '{field}'"));
        }
    }
    check_domains(&message_type, &value, &mut violations);
    if !violations.is_empty() {
        return Err(ProtocolError::Validation {
            message_type,
            violations,
        });
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::Validation {
        message_type,
        violations: vec![e.to_string()],
    })
}

/// Logs the first few violations without failing.
pub fn log_violations(message_type: &str, violations: &[String]) {
    for violation in violations.iter().take(3) {
        warn!(message_type, violation = %violation, "protocol violation");
    }
    if violations.len() > 3 {
        warn!(message_type, remaining = violations.len() - 3, "more protocol violations");
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::configuration::Scoring;
    use crate::game::Parity;
    use crate::protocol::builders;
    use crate::protocol::messages::*;

    fn round_trip(msg: &Message) {
        assert!(validate(msg).is_empty(), "{:?}", validate(msg));
        let value = serde_json::to_value(msg).unwrap();
        let back = validate_value(value).unwrap_or_else(|e| panic!("{}: {e}", msg.message_type()));
        assert_eq!(&back, msg);
    }

    #[test]
    fn built_messages_validate() {
        let res = crate::game::resolve(Some(Parity::Even), Some(Parity::Odd), || 7);
        let choices = [Some(Parity::Even), Some(Parity::Odd)];
        let context = ChoiceContext {
            opponent_id: "P02".into(),
            round_id: 1,
            your_standings: StandingSummary::default(),
        };
        let messages = vec![
            Message::new(
                "referee:REF01",
                RefereeRegisterRequest {
                    referee_meta: RefereeMeta {
                        display_name: "Referee".into(),
                        version: "1.0.0".into(),
                        game_types: vec!["even_odd".into()],
                        contact_endpoint: "http://127.0.0.1:8001/mcp".into(),
                        max_concurrent_matches: 2,
                    },
                },
            ),
            Message::new(
                "league_manager",
                MessageBody::LeagueRegisterResponse(RegisterResponse {
                    status: RegisterStatus::Accepted,
                    league_id: "L".into(),
                    agent_id: Some("P01".into()),
                    auth_token: Some("tok".into()),
                    reason: None,
                }),
            ),
            builders::choose_parity_call("referee:REF01", "R1M1", "P01", "even_odd", context, std::time::Duration::from_secs(1)),
            Message::new(
                "player:P01",
                ChooseParityResponse {
                    match_id: "R1M1".into(),
                    player_id: "P01".into(),
                    parity_choice: Parity::Odd,
                },
            ),
            builders::game_over(
                "referee:REF01",
                Uuid::new_v4(),
                "R1M1",
                "even_odd",
                builders::game_result(["P01", "P02"], choices, &res),
            ),
            Message::new(
                "referee:REF01",
                MatchResultReport {
                    league_id: "L".into(),
                    round_id: 1,
                    match_id: "R1M1".into(),
                    game_type: "even_odd".into(),
                    auth_token: "tok".into(),
                    player_a: "P01".into(),
                    player_b: "P02".into(),
                    result: builders::reported_result(["P01", "P02"], choices, &res, Scoring::default()),
                },
            ),
            builders::game_error(
                "referee:REF01",
                "R1M1",
                "P02",
                ErrorCode::ChoiceTimeout,
                "no answer",
                "none",
            ),
            Message::new(
                "league_manager",
                LeagueQuery {
                    league_id: "L".into(),
                    auth_token: "tok".into(),
                    query_type: QueryType::GetStatus,
                },
            ),
        ];
        for msg in &messages {
            round_trip(msg);
        }
    }

    #[test]
    fn missing_or_unknown_type_is_reported_distinctly() {
        assert!(matches!(
            validate_value(json!({"protocol": "league.v2"})),
            Err(ProtocolError::InvalidMessage(_))
        ));
        assert!(matches!(
            validate_value(json!({"message_type": 3})),
            Err(ProtocolError::InvalidMessage(_))
        ));
        assert_eq!(
            validate_value(json!({"message_type": "TELEPORT"})),
            Err(ProtocolError::SchemaNotFound("TELEPORT".into()))
        );
    }

    #[test]
    fn violations_are_collected_in_order() {
        let err = validate_value(json!({
            "message_type": "CHOOSE_PARITY_RESPONSE",
            "protocol": "league.v1",
            "timestamp": "2025-01-01T12:00:00.000+00:00",
            "parity_choice": "maybe",
        }))
        .unwrap_err();
        let ProtocolError::Validation { violations, .. } = &err else {
            panic!("unexpected {err:?}");
        };
        assert_eq!(violations[0], "missing required field 'sender'");
        assert_eq!(violations[1], "missing required field 'conversation_id'");
        assert!(violations[2].starts_with("protocol:"));
        assert!(violations[3].starts_with("timestamp:"));
        assert!(violations.last().unwrap().starts_with("parity_choice:"));

        let shown = err.to_string();
        assert!(shown.contains("(and "), "{shown}");
    }

    #[test]
    fn parity_is_case_insensitive_and_numbers_are_bounded() {
        let base = serde_json::to_value(Message::new(
            "player:P01",
            ChooseParityResponse {
                match_id: "R1M1".into(),
                player_id: "P01".into(),
                parity_choice: Parity::Even,
            },
        ))
        .unwrap();

        let mut upper = base.clone();
        upper["parity_choice"] = json!("EVEN");
        let msg = validate_value(upper).unwrap();
        let MessageBody::ChooseParityResponse(body) = msg.body else {
            panic!("wrong body");
        };
        assert_eq!(body.parity_choice, Parity::Even);

        let res = crate::game::resolve(Some(Parity::Even), Some(Parity::Odd), || 2);
        let mut over = serde_json::to_value(builders::game_over(
            "referee:REF01",
            Uuid::new_v4(),
            "R1M1",
            "even_odd",
            builders::game_result(["P01", "P02"], [Some(Parity::Even), Some(Parity::Odd)], &res),
        ))
        .unwrap();
        over["game_result"]["drawn_number"] = json!(11);
        assert!(matches!(validate_value(over), Err(ProtocolError::Validation { .. })));
    }
}
