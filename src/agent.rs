//! Identity of the agents taking part in a league.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sender string used by the (singleton) league manager.
pub const LEAGUE_MANAGER: &str = "league_manager";

/// Role of an agent in the league.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    /// Plays matches.
    Player,
    /// Runs matches between players.
    Referee,
    /// Orchestrates the league.
    LeagueManager,
}

impl AgentType {
    /// Prefix used in `sender` strings (`"player:P01"`).
    pub fn as_str(self) -> &'static str {
        match self {
            AgentType::Player => "player",
            AgentType::Referee => "referee",
            AgentType::LeagueManager => LEAGUE_MANAGER,
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who an agent process is and where it can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    /// League-wide unique id (`P01`, `REF01`, ...).
    pub agent_id: String,
    /// Role of the agent.
    pub agent_type: AgentType,
    /// Human readable name, defaults to the id.
    pub display_name: String,
    /// URL other agents POST messages to.
    pub endpoint: String,
    /// Endpoint of the league manager.
    pub league_manager: String,
}

impl AgentIdentity {
    /// Creates an identity whose display name is its id.
    pub fn new(
        agent_id: impl Into<String>,
        agent_type: AgentType,
        endpoint: impl Into<String>,
        league_manager: impl Into<String>,
    ) -> AgentIdentity {
        let agent_id = agent_id.into();
        AgentIdentity {
            display_name: agent_id.clone(),
            agent_id,
            agent_type,
            endpoint: endpoint.into(),
            league_manager: league_manager.into(),
        }
    }

    /// Overrides the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// `sender` field for messages emitted by this agent.
    pub fn sender(&self) -> String {
        sender(self.agent_type, &self.agent_id)
    }
}

/// Formats a `sender` field: `"<type>:<id>"`, or the bare role for the league manager.
pub fn sender(agent_type: AgentType, agent_id: &str) -> String {
    match agent_type {
        AgentType::LeagueManager => LEAGUE_MANAGER.to_owned(),
        _ => format!("{agent_type}:{agent_id}"),
    }
}

/// Splits a `sender` field into its role prefix (if any) and id.
pub fn split_sender(sender: &str) -> (Option<&str>, &str) {
    match sender.split_once(':') {
        Some((kind, id)) => (Some(kind), id),
        None => (None, sender),
    }
}

/// HTTP endpoint served by an agent listening on `addr`.
pub fn endpoint_for(addr: impl fmt::Display) -> String {
    format!("http://{addr}/mcp")
}
