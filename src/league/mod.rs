//! League manager agent.
//!
//! The [`LeagueManager`] owns the registry of agents, the standings and the
//! schedule. It answers registrations and queries over HTTP and, once
//! started, drives the rounds on a background task (see [`orchestrator`]).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::bail;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::agent::{AgentType, LEAGUE_MANAGER};
use crate::configuration::Configuration;
use crate::protocol::messages::{
    Deregister, LeagueQuery, LeagueQueryResponse, LeagueRegisterRequest, MatchResultReport,
    QueryType, RefereeRegisterRequest, RegisterResponse, RegisterStatus, StandingRow, StartLeague,
};
use crate::protocol::{Message, MessageBody, Reply};
use crate::registry::{Registration, SessionRegistry};
use crate::server::{AgentService, Shutdown};
use crate::storage::LeagueStore;
use crate::transport::Messenger;

/// Drives the rounds of a started league.
pub mod orchestrator;
/// Accepted match results.
pub mod record;
/// Completion tracking of the matches of a round.
pub mod round_tracker;
/// Round-robin pairing and referee assignment.
pub mod schedule;
/// Points and ranks.
pub mod standings;

use record::MatchRecord;
use round_tracker::RoundTracker;
use schedule::Fixture;
use standings::Standings;

/// Lifecycle of a league.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeagueStatus {
    /// Accepting registrations.
    WaitingForPlayers,
    /// Rounds are being played.
    Active,
    /// Every round was played.
    Completed,
    /// Orchestration stopped on an error.
    Error,
}

/// State of the league as answered to `GET_STATUS`.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeagueSnapshot {
    pub league_id: String,
    pub status: LeagueStatus,
    /// 0 before the first round starts.
    pub current_round: u32,
    pub total_rounds: u32,
    pub players: Vec<String>,
    pub referees: Vec<String>,
    /// Why the league is in [`LeagueStatus::Error`].
    pub error: Option<String>,
}

#[derive(Debug)]
struct LeagueState {
    status: LeagueStatus,
    current_round: u32,
    total_rounds: u32,
    schedule: Vec<Vec<Fixture>>,
    error: Option<String>,
}

struct Inner {
    config: Configuration,
    registry: SessionRegistry,
    tracker: RoundTracker<MatchRecord>,
    standings: Mutex<Standings>,
    state: Mutex<LeagueState>,
    messenger: Messenger,
    store: LeagueStore,
    shutdown: Shutdown,
}

/// League manager agent. Cheap to clone, clones share the same league.
#[derive(Clone)]
pub struct LeagueManager {
    inner: Arc<Inner>,
}

impl LeagueManager {
    /// League manager sending through `messenger`, persisting under the
    /// configured data directory and triggering `shutdown` once the league is
    /// over.
    pub fn new(config: Configuration, messenger: Messenger, shutdown: Shutdown) -> Self {
        let store = LeagueStore::new(config.data_dir.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                registry: SessionRegistry::new(),
                tracker: RoundTracker::new(),
                standings: Mutex::new(Standings::default()),
                state: Mutex::new(LeagueState {
                    status: LeagueStatus::WaitingForPlayers,
                    current_round: 0,
                    total_rounds: 0,
                    schedule: Vec::new(),
                    error: None,
                }),
                messenger,
                store,
                shutdown,
            }),
        }
    }

    /// League manager talking HTTP as configured.
    pub fn from_config(config: Configuration, shutdown: Shutdown) -> anyhow::Result<Self> {
        let messenger = Messenger::from_config(&config)?;
        Ok(Self::new(config, messenger, shutdown))
    }

    fn lock_state(&self) -> MutexGuard<'_, LeagueState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_standings(&self) -> MutexGuard<'_, Standings> {
        self.inner
            .standings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registered agents.
    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    /// Persistent store.
    pub fn store(&self) -> &LeagueStore {
        &self.inner.store
    }

    /// Current lifecycle status.
    pub fn status(&self) -> LeagueStatus {
        self.lock_state().status
    }

    /// Current standings, in rank order.
    pub fn standings(&self) -> Vec<StandingRow> {
        self.lock_standings().rows().to_vec()
    }

    /// Fixtures of every round, empty until the league starts.
    pub fn schedule(&self) -> Vec<Vec<Fixture>> {
        self.lock_state().schedule.clone()
    }

    /// Status, progress and participants.
    pub fn snapshot(&self) -> LeagueSnapshot {
        let state = self.lock_state();
        LeagueSnapshot {
            league_id: self.inner.config.league_id.clone(),
            status: state.status,
            current_round: state.current_round,
            total_rounds: state.total_rounds,
            players: self.inner.registry.list_active(Some(AgentType::Player)),
            referees: self.inner.registry.list_active(Some(AgentType::Referee)),
            error: state.error.clone(),
        }
    }

    /// Loads the standings persisted by a previous run, if any.
    ///
    /// Only meaningful before the league starts; starting resets the table
    /// to the registered players.
    pub async fn restore_standings(&self) -> anyhow::Result<bool> {
        let league_id = &self.inner.config.league_id;
        let Some(document) = self.inner.store.load_standings(league_id).await? else {
            return Ok(false);
        };
        info!(%league_id, version = document.version, "standings restored");
        *self.lock_standings() = Standings::from_rows(document.standings, document.version);
        Ok(true)
    }

    /// Starts the league on a background task.
    ///
    /// Fails when the league is not waiting for players.
    pub fn start(&self) -> anyhow::Result<()> {
        {
            let mut state = self.lock_state();
            if state.status != LeagueStatus::WaitingForPlayers {
                bail!("league cannot start while {:?}", state.status);
            }
            state.status = LeagueStatus::Active;
        }
        info!(league_id = %self.inner.config.league_id, "league started");
        tokio::spawn(orchestrator::run(self.clone()));
        Ok(())
    }

    fn fail(&self, reason: String) {
        error!(%reason, "league failed");
        let mut state = self.lock_state();
        state.status = LeagueStatus::Error;
        state.error = Some(reason);
    }

    async fn persist_standings(&self) {
        let (revision, rows) = {
            let standings = self.lock_standings();
            (standings.revision(), standings.rows().to_vec())
        };
        if let Err(e) = self
            .inner
            .store
            .save_standings(&self.inner.config.league_id, revision, &rows)
            .await
        {
            warn!(error = %format!("{e:#}"), "failed to persist standings");
        }
    }

    fn register_response(
        &self,
        request: &Message,
        agent_type: AgentType,
        registration: Registration,
    ) -> Reply {
        let league_id = self.inner.config.league_id.clone();
        let response = match registration {
            Registration::Accepted(session) => RegisterResponse {
                status: RegisterStatus::Accepted,
                league_id,
                agent_id: Some(session.agent_id),
                auth_token: Some(session.auth_token),
                reason: None,
            },
            Registration::Rejected { reason } => {
                info!(sender = %request.sender, %reason, "registration rejected");
                RegisterResponse {
                    status: RegisterStatus::Rejected,
                    league_id,
                    agent_id: None,
                    auth_token: None,
                    reason: Some(reason),
                }
            }
        };
        let body = match agent_type {
            AgentType::Referee => MessageBody::RefereeRegisterResponse(response),
            _ => MessageBody::LeagueRegisterResponse(response),
        };
        Message::reply(request, LEAGUE_MANAGER, body).into()
    }

    fn supports_game(&self, game_types: &[String]) -> bool {
        game_types.iter().any(|g| *g == self.inner.config.game_type)
    }

    fn on_referee_register(&self, message: &Message, request: &RefereeRegisterRequest) -> Reply {
        let meta = &request.referee_meta;
        let registration = if self.supports_game(&meta.game_types) {
            self.inner.registry.register_with_name(
                message.sender_id(),
                AgentType::Referee,
                &meta.contact_endpoint,
                &meta.display_name,
            )
        } else {
            Registration::Rejected {
                reason: format!("referee does not support {}", self.inner.config.game_type),
            }
        };
        self.register_response(message, AgentType::Referee, registration)
    }

    fn on_player_register(&self, message: &Message, request: &LeagueRegisterRequest) -> Reply {
        let meta = &request.player_meta;
        let status = self.status();
        let registration = if status != LeagueStatus::WaitingForPlayers {
            Registration::Rejected {
                reason: format!("registration is closed, league is {status:?}"),
            }
        } else if !self.supports_game(&meta.game_types) {
            Registration::Rejected {
                reason: format!("player does not support {}", self.inner.config.game_type),
            }
        } else {
            self.inner.registry.register_with_name(
                message.sender_id(),
                AgentType::Player,
                &meta.contact_endpoint,
                &meta.display_name,
            )
        };
        self.register_response(message, AgentType::Player, registration)
    }

    fn on_start(&self, request: &StartLeague) -> Reply {
        if request.league_id != self.inner.config.league_id {
            return Reply::error(format!("unknown league '{}'", request.league_id));
        }
        match self.start() {
            Ok(()) => Reply::ok("league started"),
            Err(e) => Reply::error(e.to_string()),
        }
    }

    #[instrument(skip_all, fields(match_id = %report.match_id, round_id = report.round_id))]
    async fn on_match_result(&self, message: &Message, report: &MatchResultReport) -> Reply {
        let referee_id = message.sender_id();
        if report.league_id != self.inner.config.league_id {
            return Reply::error(format!("unknown league '{}'", report.league_id));
        }
        if !self
            .inner
            .registry
            .validate_token(referee_id, &report.auth_token)
        {
            warn!(referee_id, "result report with an invalid token");
            return Reply::error("authentication failed");
        }

        let record = MatchRecord::from_report(report, referee_id);
        {
            // Applying under the standings lock keeps the round waiter from
            // reading the table before this result is in it.
            let mut standings = self.lock_standings();
            if !self
                .inner
                .tracker
                .record_result(report.round_id, &report.match_id, record.clone())
            {
                return Reply::ok("result ignored");
            }
            standings.apply(&record, self.inner.config.scoring);
        }
        info!(winner = ?record.winner, reason = ?record.reason, "match result recorded");

        let store = &self.inner.store;
        if let Err(e) = store.save_match(&record).await {
            warn!(error = %format!("{e:#}"), "failed to persist match");
        }
        if let Err(e) = store.append_history(&record).await {
            warn!(error = %format!("{e:#}"), "failed to persist player history");
        }
        self.persist_standings().await;
        Reply::ok("result recorded")
    }

    fn on_query(&self, message: &Message, query: &LeagueQuery) -> Reply {
        if self.inner.registry.agent_for_token(&query.auth_token).is_none() {
            warn!(sender = %message.sender, "query with an invalid token");
            return Reply::error("authentication failed");
        }
        let data = match query.query_type {
            QueryType::GetStatus => serde_json::to_value(self.snapshot()),
            QueryType::GetStandings => serde_json::to_value(self.standings()),
            QueryType::GetSchedule => serde_json::to_value(self.schedule()),
        };
        let (success, data) = match data {
            Ok(data) => (true, data),
            Err(e) => {
                warn!(%e, "failed to encode query answer");
                (false, Value::Null)
            }
        };
        Message::reply(
            message,
            LEAGUE_MANAGER,
            LeagueQueryResponse {
                league_id: self.inner.config.league_id.clone(),
                query_type: query.query_type,
                success,
                data,
            },
        )
        .into()
    }

    fn on_deregister(&self, message: &Message, request: &Deregister) -> Reply {
        let agent_id = message.sender_id();
        if !self.inner.registry.validate_token(agent_id, &request.auth_token) {
            return Reply::error("authentication failed");
        }
        self.inner.registry.close(agent_id);
        Reply::ok("deregistered")
    }
}

#[async_trait]
impl AgentService for LeagueManager {
    async fn handle(&self, message: Message) -> Reply {
        match &message.body {
            MessageBody::RefereeRegisterRequest(request) => {
                self.on_referee_register(&message, request)
            }
            MessageBody::LeagueRegisterRequest(request) => {
                self.on_player_register(&message, request)
            }
            MessageBody::StartLeague(request) => self.on_start(request),
            MessageBody::MatchResultReport(report) => self.on_match_result(&message, report).await,
            MessageBody::LeagueQuery(query) => self.on_query(&message, query),
            MessageBody::Deregister(request) => self.on_deregister(&message, request),
            _ => {
                debug!(message_type = message.message_type(), "not handled by the league manager");
                Reply::error(format!(
                    "{} is not handled by the league manager",
                    message.message_type()
                ))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        sync::Mutex as StdMutex,
        time::{Duration, Instant},
    };

    use serde_json::json;

    use super::*;
    use crate::configuration::Scoring;
    use crate::game::{OutcomeReason, Parity, GAME_TYPE};
    use crate::protocol::messages::{PlayerMeta, RefereeMeta, ReportDetails, ReportedResult};
    use crate::transport::{circuit_breaker::BreakerRegistry, Transport};

    /// Answers every delivery and remembers `(endpoint, message)`.
    #[derive(Default)]
    pub(crate) struct Recorder {
        pub sent: StdMutex<Vec<(String, Message)>>,
    }

    impl Recorder {
        pub fn types_sent_to(&self, endpoint: &str) -> Vec<&'static str> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(e, _)| e == endpoint)
                .map(|(_, m)| m.message_type())
                .collect()
        }
    }

    #[async_trait]
    impl Transport for Recorder {
        async fn send(&self, endpoint: &str, message: &Message) -> Option<Value> {
            self.sent
                .lock()
                .unwrap()
                .push((endpoint.to_owned(), message.clone()));
            Some(json!({"status": "ok"}))
        }
    }

    fn manager(dir: &std::path::Path) -> (LeagueManager, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let messenger = Messenger::new(
            recorder.clone(),
            Arc::new(BreakerRegistry::new(5, Duration::from_secs(60))),
        );
        let config = Configuration::new()
            .with_league_id("L")
            .with_match_timeout(Duration::from_secs(5))
            .with_shutdown_delay(Duration::from_millis(10))
            .with_data_dir(dir);
        (LeagueManager::new(config, messenger, Shutdown::new()), recorder)
    }

    async fn register_player(lm: &LeagueManager, id: &str) -> RegisterResponse {
        let request = Message::new(
            format!("player:{id}"),
            LeagueRegisterRequest {
                player_meta: PlayerMeta {
                    display_name: format!("Player {id}"),
                    version: "1.0".into(),
                    game_types: vec![GAME_TYPE.into()],
                    contact_endpoint: format!("http://{id}"),
                },
            },
        );
        registration(lm.handle(request).await)
    }

    async fn register_referee(lm: &LeagueManager, id: &str) -> RegisterResponse {
        let request = Message::new(
            format!("referee:{id}"),
            RefereeRegisterRequest {
                referee_meta: RefereeMeta {
                    display_name: id.into(),
                    version: "1.0".into(),
                    game_types: vec![GAME_TYPE.into()],
                    contact_endpoint: format!("http://{id}"),
                    max_concurrent_matches: 2,
                },
            },
        );
        registration(lm.handle(request).await)
    }

    fn registration(reply: Reply) -> RegisterResponse {
        match reply {
            Reply::Message(message) => match message.body {
                MessageBody::LeagueRegisterResponse(r) | MessageBody::RefereeRegisterResponse(r) => r,
                other => panic!("unexpected body {other:?}"),
            },
            other => panic!("unexpected reply {other:?}"),
        }
    }

    fn report(token: &str, match_id: &str, a: &str, b: &str, winner: Option<&str>) -> Message {
        let mut choices = std::collections::BTreeMap::new();
        choices.insert(a.to_owned(), Some(Parity::Even));
        choices.insert(b.to_owned(), Some(Parity::Odd));
        Message::new(
            "referee:REF01",
            MatchResultReport {
                league_id: "L".into(),
                round_id: 1,
                match_id: match_id.into(),
                game_type: GAME_TYPE.into(),
                auth_token: token.into(),
                player_a: a.into(),
                player_b: b.into(),
                result: ReportedResult {
                    winner: winner.map(str::to_owned),
                    score: Default::default(),
                    details: ReportDetails {
                        drawn_number: Some(4),
                        choices,
                        reason: OutcomeReason::ParityMatch,
                    },
                },
            },
        )
    }

    async fn wait_for_status(lm: &LeagueManager, status: LeagueStatus) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while lm.status() != status {
            assert!(Instant::now() < deadline, "league stuck in {:?}", lm.status());
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub(crate) async fn wait_for_delivery(recorder: &Recorder, endpoint: &str, message_type: &str) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !recorder.types_sent_to(endpoint).contains(&message_type) {
            assert!(Instant::now() < deadline, "{message_type} never sent to {endpoint}");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn start() -> Message {
        Message::new(LEAGUE_MANAGER, StartLeague { league_id: "L".into() })
    }

    #[tokio::test]
    async fn two_player_league_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let (lm, recorder) = manager(dir.path());
        assert_eq!(register_player(&lm, "P01").await.status, RegisterStatus::Accepted);
        assert_eq!(register_player(&lm, "P02").await.status, RegisterStatus::Accepted);
        let referee = register_referee(&lm, "REF01").await;
        let token = referee.auth_token.unwrap();

        assert!(!lm.handle(start()).await.is_error());
        assert!(lm.handle(start()).await.is_error());
        let late = register_player(&lm, "P03").await;
        assert_eq!(late.status, RegisterStatus::Rejected);

        // The round is tracked once it is announced.
        wait_for_delivery(&recorder, "http://REF01", "ROUND_ANNOUNCEMENT").await;

        let forged = lm.handle(report("forged", "R1M1", "P01", "P02", Some("P01"))).await;
        assert!(forged.is_error());
        let accepted = lm.handle(report(&token, "R1M1", "P01", "P02", Some("P01"))).await;
        assert_eq!(accepted, Reply::ok("result recorded"));

        wait_for_status(&lm, LeagueStatus::Completed).await;
        let standings = lm.standings();
        assert_eq!(standings[0].player_id, "P01");
        assert_eq!(standings[0].points, 3);

        let duplicate = lm.handle(report(&token, "R1M1", "P01", "P02", Some("P02"))).await;
        assert_eq!(duplicate, Reply::ok("result ignored"));
        assert_eq!(lm.standings()[0].points, 3);

        for expected in [
            "ROUND_ANNOUNCEMENT",
            "ROUND_COMPLETED",
            "LEAGUE_STANDINGS_UPDATE",
            "LEAGUE_COMPLETED",
        ] {
            wait_for_delivery(&recorder, "http://P01", expected).await;
        }

        let saved = lm.store().load_standings("L").await.unwrap().unwrap();
        assert_eq!(saved.standings[0].points, 3);
        assert!(lm.store().load_match("L", "R1M1").await.unwrap().is_some());

        tokio::time::timeout(Duration::from_secs(5), lm.inner.shutdown.wait())
            .await
            .unwrap();
        assert!(lm.registry().list_active(None).is_empty());
    }

    #[tokio::test]
    async fn league_without_referees_fails_but_answers_queries() {
        let dir = tempfile::tempdir().unwrap();
        let (lm, _recorder) = manager(dir.path());
        let player = register_player(&lm, "P01").await;
        register_player(&lm, "P02").await;

        lm.start().unwrap();
        wait_for_status(&lm, LeagueStatus::Error).await;

        let query = Message::new(
            "player:P01",
            LeagueQuery {
                league_id: "L".into(),
                auth_token: player.auth_token.unwrap(),
                query_type: QueryType::GetStatus,
            },
        );
        let Reply::Message(answer) = lm.handle(query).await else {
            panic!("expected a query response");
        };
        let MessageBody::LeagueQueryResponse(response) = answer.body else {
            panic!("expected a query response");
        };
        assert!(response.success);
        assert_eq!(response.data["status"], "ERROR");
        assert!(response.data["error"].as_str().unwrap().contains("referee"));
    }

    #[tokio::test]
    async fn queries_and_deregistration_need_a_token() {
        let dir = tempfile::tempdir().unwrap();
        let (lm, _recorder) = manager(dir.path());
        let token = register_player(&lm, "P01").await.auth_token.unwrap();

        let query = |token: &str| {
            Message::new(
                "player:P01",
                LeagueQuery {
                    league_id: "L".into(),
                    auth_token: token.into(),
                    query_type: QueryType::GetStandings,
                },
            )
        };
        assert!(lm.handle(query("nope")).await.is_error());
        assert!(!lm.handle(query(&token)).await.is_error());

        let leave = |token: &str| {
            Message::new(
                "player:P01",
                Deregister {
                    auth_token: token.into(),
                },
            )
        };
        assert!(lm.handle(leave("nope")).await.is_error());
        assert_eq!(lm.handle(leave(&token)).await, Reply::ok("deregistered"));
        assert!(lm.registry().list_active(Some(AgentType::Player)).is_empty());
        assert_eq!(register_player(&lm, "P01").await.status, RegisterStatus::Accepted);
    }

    #[tokio::test]
    async fn restores_persisted_standings() {
        let dir = tempfile::tempdir().unwrap();
        let (lm, _recorder) = manager(dir.path());
        assert!(!lm.restore_standings().await.unwrap());

        let mut standings = Standings::new([("P01".to_owned(), "One".to_owned())]);
        standings.apply(&record::record("M1", "P01", "P02", Some("P01")), Scoring::default());
        lm.store()
            .save_standings("L", standings.revision(), standings.rows())
            .await
            .unwrap();

        let (fresh, _recorder) = manager(dir.path());
        assert!(fresh.restore_standings().await.unwrap());
        assert_eq!(fresh.standings(), standings.rows());
        assert_eq!(fresh.snapshot().status, LeagueStatus::WaitingForPlayers);
    }

    #[tokio::test]
    async fn registration_checks_the_game_type() {
        let dir = tempfile::tempdir().unwrap();
        let (lm, _recorder) = manager(dir.path());
        let request = Message::new(
            "player:P09",
            LeagueRegisterRequest {
                player_meta: PlayerMeta {
                    display_name: "Chess fan".into(),
                    version: "1.0".into(),
                    game_types: vec!["chess".into()],
                    contact_endpoint: "http://P09".into(),
                },
            },
        );
        let response = registration(lm.handle(request).await);
        assert_eq!(response.status, RegisterStatus::Rejected);
        assert!(response.auth_token.is_none());
        assert!(lm.registry().list_active(None).is_empty());
    }
}
