//! Player agent.
//!
//! A player registers with the league manager, accepts every invitation and
//! answers parity calls with the bet of its [`ParityStrategy`].

use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::agent::AgentIdentity;
use crate::configuration::Configuration;
use crate::game::{OutcomeReason, Parity, GAME_TYPE};
use crate::league::record::Outcome;
use crate::protocol::messages::{
    ChooseParityCall, ChooseParityResponse, Deregister, GameInvitation, GameJoinAck, GameOver,
    LeagueQuery, LeagueRegisterRequest, PlayerMeta, QueryType, RegisterStatus,
};
use crate::protocol::{timestamp_now, validate_value, Message, MessageBody, Reply};
use crate::server::AgentService;
use crate::transport::Messenger;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Decides the parity bet of a player.
pub trait ParityStrategy: Send + Sync {
    /// Bet for `call`.
    fn choose(&self, call: &ChooseParityCall) -> Parity;
}

/// Bets uniformly at random.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomStrategy;

impl ParityStrategy for RandomStrategy {
    fn choose(&self, _call: &ChooseParityCall) -> Parity {
        if rand::random::<bool>() {
            Parity::Even
        } else {
            Parity::Odd
        }
    }
}

/// Always bets the same parity.
#[derive(Debug, Clone, Copy)]
pub struct FixedStrategy(pub Parity);

impl ParityStrategy for FixedStrategy {
    fn choose(&self, _call: &ChooseParityCall) -> Parity {
        self.0
    }
}

/// Bets even, odd, even, ...
#[derive(Debug, Default)]
pub struct AlternatingStrategy {
    odd_next: AtomicBool,
}

impl ParityStrategy for AlternatingStrategy {
    fn choose(&self, _call: &ChooseParityCall) -> Parity {
        if self.odd_next.fetch_xor(true, Ordering::Relaxed) {
            Parity::Odd
        } else {
            Parity::Even
        }
    }
}

/// Strategy selectable from the command line.
///
/// Parsed from `random`, `alternating`, `even` or `odd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// [`RandomStrategy`].
    Random,
    /// [`AlternatingStrategy`].
    Alternating,
    /// [`FixedStrategy`].
    Fixed(Parity),
}

impl StrategyKind {
    /// Instantiates the strategy.
    pub fn build(self) -> Box<dyn ParityStrategy> {
        match self {
            StrategyKind::Random => Box::new(RandomStrategy),
            StrategyKind::Alternating => Box::<AlternatingStrategy>::default(),
            StrategyKind::Fixed(parity) => Box::new(FixedStrategy(parity)),
        }
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(StrategyKind::Random),
            "alternating" => Ok(StrategyKind::Alternating),
            other => other
                .parse::<Parity>()
                .map(StrategyKind::Fixed)
                .map_err(|_| format!("unknown strategy '{s}'")),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Random => f.write_str("random"),
            StrategyKind::Alternating => f.write_str("alternating"),
            StrategyKind::Fixed(parity) => write!(f, "{parity}"),
        }
    }
}

/// One finished match as seen by the player.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameRecord {
    pub match_id: String,
    pub opponent_id: Option<String>,
    pub my_choice: Option<Parity>,
    pub drawn_number: Option<u8>,
    pub outcome: Outcome,
    pub reason: OutcomeReason,
}

#[derive(Debug, Default)]
struct Pending {
    opponent_id: Option<String>,
    choice: Option<Parity>,
}

struct Inner {
    identity: AgentIdentity,
    sender: String,
    config: Configuration,
    messenger: Messenger,
    strategy: Box<dyn ParityStrategy>,
    auth_token: Mutex<Option<String>>,
    pending: Mutex<HashMap<String, Pending>>,
    history: Mutex<Vec<GameRecord>>,
}

/// Player agent. Cheap to clone, clones share their history.
#[derive(Clone)]
pub struct Player {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Player {
    /// Player betting with `strategy`.
    pub fn new(
        identity: AgentIdentity,
        config: Configuration,
        messenger: Messenger,
        strategy: Box<dyn ParityStrategy>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sender: identity.sender(),
                identity,
                config,
                messenger,
                strategy,
                auth_token: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                history: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Player talking HTTP as configured.
    pub fn from_config(
        identity: AgentIdentity,
        config: Configuration,
        strategy: StrategyKind,
    ) -> anyhow::Result<Self> {
        let messenger = Messenger::from_config(&config)?;
        Ok(Self::new(identity, config, messenger, strategy.build()))
    }

    /// Who this player is.
    pub fn identity(&self) -> &AgentIdentity {
        &self.inner.identity
    }

    /// Token received at registration.
    pub fn auth_token(&self) -> Option<String> {
        lock(&self.inner.auth_token).clone()
    }

    /// Finished matches, oldest first.
    pub fn history(&self) -> Vec<GameRecord> {
        lock(&self.inner.history).clone()
    }

    async fn request(&self, message: &Message) -> anyhow::Result<Message> {
        let inner = &self.inner;
        let answer = inner
            .messenger
            .send_with_retry(
                &inner.identity.league_manager,
                message,
                inner.config.retry_policy(),
                false,
            )
            .await?
            .with_context(|| format!("league manager did not answer {}", message.message_type()))?;
        Ok(validate_value(answer)?)
    }

    /// Registers with the league manager and keeps the returned token.
    pub async fn register(&self) -> anyhow::Result<()> {
        let identity = &self.inner.identity;
        let request = Message::new(
            self.inner.sender.clone(),
            LeagueRegisterRequest {
                player_meta: PlayerMeta {
                    display_name: identity.display_name.clone(),
                    version: VERSION.to_owned(),
                    game_types: vec![GAME_TYPE.to_owned()],
                    contact_endpoint: identity.endpoint.clone(),
                },
            },
        );
        let answer = self.request(&request).await?;
        let MessageBody::LeagueRegisterResponse(response) = answer.body else {
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
        *lock(&self.inner.auth_token) = Some(token);
        info!(agent_id = %identity.agent_id, league_id = %response.league_id, "player registered");
        Ok(())
    }

    /// Asks the league manager for `query_type` and returns the answer data.
    pub async fn query(&self, query_type: QueryType) -> anyhow::Result<Value> {
        let auth_token = self.auth_token().context("not registered")?;
        let request = Message::new(
            self.inner.sender.clone(),
            LeagueQuery {
                league_id: self.inner.config.league_id.clone(),
                auth_token,
                query_type,
            },
        );
        let answer = self.request(&request).await?;
        match answer.body {
            MessageBody::LeagueQueryResponse(response) if response.success => Ok(response.data),
            MessageBody::LeagueQueryResponse(_) => bail!("league manager failed the query"),
            other => bail!("unexpected {} answer to a query", other.message_type()),
        }
    }

    /// Leaves the league.
    pub async fn deregister(&self) -> anyhow::Result<()> {
        let auth_token = self.auth_token().context("not registered")?;
        let request = Message::new(self.inner.sender.clone(), Deregister { auth_token });
        let inner = &self.inner;
        inner
            .messenger
            .send_with_retry(
                &inner.identity.league_manager,
                &request,
                inner.config.retry_policy(),
                false,
            )
            .await?
            .context("league manager did not answer the deregistration")?;
        *lock(&inner.auth_token) = None;
        Ok(())
    }

    fn on_invitation(&self, message: &Message, invitation: &GameInvitation) -> Reply {
        debug!(match_id = %invitation.match_id, role = ?invitation.role_in_match, "invited");
        lock(&self.inner.pending).insert(
            invitation.match_id.clone(),
            Pending {
                opponent_id: Some(invitation.opponent_id.clone()),
                choice: None,
            },
        );
        Message::reply(
            message,
            self.inner.sender.clone(),
            GameJoinAck {
                match_id: invitation.match_id.clone(),
                player_id: self.inner.identity.agent_id.clone(),
                arrival_timestamp: timestamp_now(),
                accept: true,
            },
        )
        .into()
    }

    #[instrument(skip_all, fields(match_id = %call.match_id))]
    fn on_parity_call(&self, message: &Message, call: &ChooseParityCall) -> Reply {
        let me = &self.inner.identity.agent_id;
        if call.player_id != *me {
            warn!(player_id = %call.player_id, "parity call for another player");
            return Reply::error(format!("this is player '{me}'"));
        }
        let choice = self.inner.strategy.choose(call);
        lock(&self.inner.pending)
            .entry(call.match_id.clone())
            .or_default()
            .choice = Some(choice);
        debug!(%choice, "parity chosen");
        Message::reply(
            message,
            self.inner.sender.clone(),
            ChooseParityResponse {
                match_id: call.match_id.clone(),
                player_id: me.clone(),
                parity_choice: choice,
            },
        )
        .into()
    }

    fn on_game_over(&self, game_over: &GameOver) -> Reply {
        let me = &self.inner.identity.agent_id;
        let result = &game_over.game_result;
        let outcome = match result.winner_player_id.as_deref() {
            None => Outcome::Draw,
            Some(winner) if winner == me => Outcome::Win,
            Some(_) => Outcome::Loss,
        };
        let pending = lock(&self.inner.pending)
            .remove(&game_over.match_id)
            .unwrap_or_default();
        let opponent_id = pending.opponent_id.or_else(|| {
            result
                .choices
                .keys()
                .find(|id| *id != me)
                .cloned()
        });
        let my_choice = result.choices.get(me).copied().flatten().or(pending.choice);
        info!(match_id = %game_over.match_id, ?outcome, "match over");
        lock(&self.inner.history).push(GameRecord {
            match_id: game_over.match_id.clone(),
            opponent_id,
            my_choice,
            drawn_number: result.drawn_number,
            outcome,
            reason: result.reason,
        });
        Reply::ok("acknowledged")
    }
}

#[async_trait]
impl AgentService for Player {
    async fn handle(&self, message: Message) -> Reply {
        match &message.body {
            MessageBody::GameInvitation(invitation) => self.on_invitation(&message, invitation),
            MessageBody::ChooseParityCall(call) => self.on_parity_call(&message, call),
            MessageBody::GameOver(game_over) => self.on_game_over(game_over),
            MessageBody::LeagueCompleted(completed) => {
                info!(
                    champion = ?completed.champion.as_ref().map(|c| &c.player_id),
                    "league completed"
                );
                Reply::ok("acknowledged")
            }
            MessageBody::RoundAnnouncement(_)
            | MessageBody::RoundCompleted(_)
            | MessageBody::LeagueStandingsUpdate(_) => {
                debug!(message_type = message.message_type(), "league update");
                Reply::ok("acknowledged")
            }
            MessageBody::GameError(error) => {
                warn!(error_code = ?error.error_code, description = %error.error_description, "error notification");
                if let Some(match_id) = &error.match_id {
                    lock(&self.inner.pending).remove(match_id);
                }
                Reply::ok("acknowledged")
            }
            _ => Reply::error(format!(
                "{} is not handled by a player",
                message.message_type()
            )),
        }
    }
}
