//! Referee agent.
//!
//! A referee registers with the league manager, then runs the matches
//! assigned to it, either explicitly with `RUN_MATCH` or by picking its own
//! matches out of a `ROUND_ANNOUNCEMENT`. At most `max_concurrent_matches`
//! matches run at once; the others wait for a free slot.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use anyhow::{bail, Context};
use async_trait::async_trait;
use tokio::{sync::Semaphore, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::agent::AgentIdentity;
use crate::configuration::Configuration;
use crate::game::GAME_TYPE;
use crate::protocol::messages::{
    RefereeMeta, RefereeRegisterRequest, RegisterStatus, RoundAnnouncement, RunMatch,
    StandingSummary,
};
use crate::protocol::{validate_value, Message, MessageBody, Reply};
use crate::server::AgentService;
use crate::transport::Messenger;

pub mod match_runner;
pub mod match_state;

use match_state::MatchContext;

const VERSION: &str = env!("CARGO_PKG_VERSION");

struct Inner {
    identity: AgentIdentity,
    sender: String,
    config: Configuration,
    messenger: Messenger,
    max_concurrent: usize,
    slots: Arc<Semaphore>,
    auth_token: Mutex<Option<String>>,
    in_flight: Mutex<HashSet<String>>,
}

/// Referee agent. Cheap to clone, clones share their matches.
#[derive(Clone)]
pub struct Referee {
    inner: Arc<Inner>,
}

impl Referee {
    /// Referee running at most `max_concurrent` matches at once.
    pub fn new(
        identity: AgentIdentity,
        config: Configuration,
        messenger: Messenger,
        max_concurrent: usize,
    ) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            inner: Arc::new(Inner {
                sender: identity.sender(),
                identity,
                config,
                messenger,
                max_concurrent,
                slots: Arc::new(Semaphore::new(max_concurrent)),
                auth_token: Mutex::new(None),
                in_flight: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Referee talking HTTP as configured.
    pub fn from_config(
        identity: AgentIdentity,
        config: Configuration,
        max_concurrent: usize,
    ) -> anyhow::Result<Self> {
        let messenger = Messenger::from_config(&config)?;
        Ok(Self::new(identity, config, messenger, max_concurrent))
    }

    /// Who this referee is.
    pub fn identity(&self) -> &AgentIdentity {
        &self.inner.identity
    }

    /// Token received at registration.
    pub fn auth_token(&self) -> Option<String> {
        self.inner
            .auth_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_auth_token(&self, token: String) {
        *self
            .inner
            .auth_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    fn in_flight(&self) -> MutexGuard<'_, HashSet<String>> {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers with the league manager and keeps the returned token.
    pub async fn register(&self) -> anyhow::Result<()> {
        let inner = &self.inner;
        let identity = &inner.identity;
        let request = Message::new(
            inner.sender.clone(),
            RefereeRegisterRequest {
                referee_meta: RefereeMeta {
                    display_name: identity.display_name.clone(),
                    version: VERSION.to_owned(),
                    game_types: vec![GAME_TYPE.to_owned()],
                    contact_endpoint: identity.endpoint.clone(),
                    max_concurrent_matches: u32::try_from(inner.max_concurrent)
                        .unwrap_or(u32::MAX),
                },
            },
        );
        let answer = inner
            .messenger
            .send_with_retry(
                &identity.league_manager,
                &request,
                inner.config.retry_policy(),
                false,
            )
            .await?
            .context("league manager did not answer the registration")?;
        let answer = validate_value(answer).context("invalid registration response")?;
        let MessageBody::RefereeRegisterResponse(response) = answer.body else {
            bail!("unexpected {} answer to a registration", answer.message_type());
        };
        if response.status != RegisterStatus::Accepted {
            bail!(
                "registration rejected: {}",
                response.reason.unwrap_or_default()
            );
        }
        let token = response
            .auth_token
            .context("accepted registration without a token")?;
        self.set_auth_token(token);
        info!(agent_id = %identity.agent_id, league_id = %response.league_id, "referee registered");
        Ok(())
    }

    /// Runs `assignment` on a background task.
    ///
    /// Returns `None`, starting nothing, when the match is already running
    /// here. `standings` are the `[player_a, player_b]` records shown to the
    /// players.
    pub fn assign(
        &self,
        assignment: RunMatch,
        standings: [StandingSummary; 2],
    ) -> Option<JoinHandle<()>> {
        if !self.in_flight().insert(assignment.match_id.clone()) {
            debug!(match_id = %assignment.match_id, "match already in flight");
            return None;
        }
        let referee = self.clone();
        Some(tokio::spawn(async move {
            let match_id = assignment.match_id.clone();
            match referee.inner.slots.clone().acquire_owned().await {
                Ok(_permit) => {
                    referee.run_match(assignment, standings).await;
                }
                Err(e) => warn!(%match_id, %e, "no slot to run the match"),
            }
            referee.in_flight().remove(&match_id);
        }))
    }

    /// Runs `assignment` to completion on the current task.
    pub async fn run_match(
        &self,
        assignment: RunMatch,
        standings: [StandingSummary; 2],
    ) -> MatchContext {
        match_runner::run(self, MatchContext::new(assignment), standings).await
    }

    fn on_announcement(&self, announcement: &RoundAnnouncement) -> Reply {
        let identity = &self.inner.identity;
        let summary = |player_id: &str| {
            announcement
                .standings
                .iter()
                .find(|row| row.player_id == player_id)
                .map(|row| StandingSummary {
                    wins: row.wins,
                    losses: row.losses,
                    draws: row.draws,
                })
                .unwrap_or_default()
        };
        let mut started = 0;
        for scheduled in announcement
            .matches
            .iter()
            .filter(|m| m.referee_endpoint == identity.endpoint || m.referee_id == identity.agent_id)
        {
            let assignment = RunMatch {
                league_id: announcement.league_id.clone(),
                round_id: announcement.round_id,
                match_id: scheduled.match_id.clone(),
                game_type: scheduled.game_type.clone(),
                player_a: scheduled.player_a_id.clone(),
                player_b: scheduled.player_b_id.clone(),
                player_a_endpoint: scheduled.player_a_endpoint.clone(),
                player_b_endpoint: scheduled.player_b_endpoint.clone(),
            };
            let standings = [summary(&assignment.player_a), summary(&assignment.player_b)];
            if self.assign(assignment, standings).is_some() {
                started += 1;
            }
        }
        info!(round_id = announcement.round_id, started, "round announcement handled");
        Reply::ok(format!("{started} matches started"))
    }
}

#[async_trait]
impl AgentService for Referee {
    async fn handle(&self, message: Message) -> Reply {
        match &message.body {
            MessageBody::RunMatch(assignment) => {
                match self.assign(assignment.clone(), [StandingSummary::default(); 2]) {
                    Some(_) => Reply::ok("match accepted"),
                    None => Reply::ok("match already running"),
                }
            }
            MessageBody::RoundAnnouncement(announcement) => self.on_announcement(announcement),
            MessageBody::RoundCompleted(_)
            | MessageBody::LeagueStandingsUpdate(_)
            | MessageBody::LeagueCompleted(_) => {
                debug!(message_type = message.message_type(), "league update");
                Reply::ok("acknowledged")
            }
            MessageBody::GameError(error) => {
                warn!(error_code = ?error.error_code, description = %error.error_description, "error notification");
                Reply::ok("acknowledged")
            }
            _ => Reply::error(format!(
                "{} is not handled by a referee",
                message.message_type()
            )),
        }
    }
}
