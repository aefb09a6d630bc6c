//! Registered agents of a league and their opaque auth tokens.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use crate::agent::AgentType;

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Created but not yet usable.
    Pending,
    /// Registered and authenticated.
    Active,
    /// Temporarily not accepting requests.
    Suspended,
    /// Deregistered or shut down.
    Closed,
}

/// One registered agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Unique per registration.
    pub session_id: Uuid,
    #[allow(missing_docs)]
    pub agent_id: String,
    #[allow(missing_docs)]
    pub agent_type: AgentType,
    /// Where the agent receives messages.
    pub endpoint: String,
    #[allow(missing_docs)]
    pub display_name: String,
    #[allow(missing_docs)]
    pub state: SessionState,
    /// Opaque bearer token the agent presents on authenticated requests.
    pub auth_token: String,
    #[allow(missing_docs)]
    pub created_at: OffsetDateTime,
    /// Refreshed on every authenticated request.
    pub last_activity: OffsetDateTime,
}

/// Outcome of [`SessionRegistry::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// The agent now has an active session.
    Accepted(Session),
    /// The agent was not registered.
    Rejected {
        /// Human readable cause.
        reason: String,
    },
}

/// Sessions of the agents known to the league manager.
///
/// At most one active session exists per agent id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `agent_id`, using the id as display name.
    pub fn register(&self, agent_id: &str, agent_type: AgentType, endpoint: &str) -> Registration {
        self.register_with_name(agent_id, agent_type, endpoint, agent_id)
    }

    /// Registers `agent_id` with a fresh auth token.
    ///
    /// An agent id that already has an active session is rejected; a closed
    /// one may register again.
    pub fn register_with_name(
        &self,
        agent_id: &str,
        agent_type: AgentType,
        endpoint: &str,
        display_name: &str,
    ) -> Registration {
        let mut sessions = self.lock();
        if let Some(existing) = sessions.get(agent_id) {
            if existing.state == SessionState::Active {
                debug!(agent_id, "duplicate registration");
                return Registration::Rejected {
                    reason: format!("agent '{agent_id}' is already registered"),
                };
            }
        }

        let now = OffsetDateTime::now_utc();
        let session = Session {
            session_id: Uuid::new_v4(),
            agent_id: agent_id.to_owned(),
            agent_type,
            endpoint: endpoint.to_owned(),
            display_name: display_name.to_owned(),
            state: SessionState::Active,
            auth_token: Uuid::new_v4().simple().to_string(),
            created_at: now,
            last_activity: now,
        };
        sessions.insert(agent_id.to_owned(), session.clone());
        info!(agent_id, %agent_type, endpoint, "agent registered");
        Registration::Accepted(session)
    }

    /// Whether `token` belongs to the active session of `agent_id`.
    ///
    /// Refreshes `last_activity` on success.
    pub fn validate_token(&self, agent_id: &str, token: &str) -> bool {
        let mut sessions = self.lock();
        match sessions.get_mut(agent_id) {
            Some(session) if session.state == SessionState::Active && session.auth_token == token => {
                session.last_activity = OffsetDateTime::now_utc();
                true
            }
            _ => false,
        }
    }

    /// Id of the active agent owning `token`, refreshing its activity.
    pub fn agent_for_token(&self, token: &str) -> Option<String> {
        let mut sessions = self.lock();
        let session = sessions
            .values_mut()
            .find(|s| s.state == SessionState::Active && s.auth_token == token)?;
        session.last_activity = OffsetDateTime::now_utc();
        Some(session.agent_id.clone())
    }

    /// Closes the session of `agent_id`. Returns whether it was active.
    pub fn close(&self, agent_id: &str) -> bool {
        let mut sessions = self.lock();
        match sessions.get_mut(agent_id) {
            Some(session) if session.state != SessionState::Closed => {
                let was_active = session.state == SessionState::Active;
                session.state = SessionState::Closed;
                info!(agent_id, "session closed");
                was_active
            }
            _ => false,
        }
    }

    /// Closes every session.
    pub fn close_all(&self) {
        for session in self.lock().values_mut() {
            session.state = SessionState::Closed;
        }
    }

    /// Ids of the active agents, optionally of one type, sorted.
    pub fn list_active(&self, agent_type: Option<AgentType>) -> Vec<String> {
        let mut ids: Vec<String> = self
            .lock()
            .values()
            .filter(|s| s.state == SessionState::Active)
            .filter(|s| agent_type.map_or(true, |t| t == s.agent_type))
            .map(|s| s.agent_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Copy of the session of `agent_id`.
    pub fn session(&self, agent_id: &str) -> Option<Session> {
        self.lock().get(agent_id).cloned()
    }

    /// Endpoint of `agent_id`.
    pub fn endpoint(&self, agent_id: &str) -> Option<String> {
        self.lock().get(agent_id).map(|s| s.endpoint.clone())
    }

    /// Display name of `agent_id`.
    pub fn display_name(&self, agent_id: &str) -> Option<String> {
        self.lock().get(agent_id).map(|s| s.display_name.clone())
    }

    /// Endpoints of every active agent.
    pub fn active_endpoints(&self) -> Vec<String> {
        let mut endpoints: Vec<String> = self
            .lock()
            .values()
            .filter(|s| s.state == SessionState::Active)
            .map(|s| s.endpoint.clone())
            .collect();
        endpoints.sort();
        endpoints
    }
}
