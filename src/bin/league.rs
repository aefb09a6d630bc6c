//! Launcher of the agents of an Even-Odd league.
//!
//! ```text
//! league league-manager --bind 127.0.0.1:8000
//! league referee --id REF01 --bind 127.0.0.1:8001 --league-manager http://127.0.0.1:8000/mcp
//! league player --id P01 --bind 127.0.0.1:8101 --league-manager http://127.0.0.1:8000/mcp
//! league start --league-manager http://127.0.0.1:8000/mcp
//! ```

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{info, warn};

use even_odd_league::agent::endpoint_for;
use even_odd_league::logger::init_logger;
use even_odd_league::prelude::*;
use even_odd_league::protocol::messages::StartLeague;
use even_odd_league::server;
use even_odd_league::transport::Messenger;

#[derive(Parser)]
#[command(name = "league")]
#[command(about = "Even-Odd league agents")]
struct Cli {
    /// Wrap outbound messages in JSON-RPC 2.0.
    #[arg(long, global = true)]
    jsonrpc: bool,

    /// Root directory of persisted files.
    #[arg(long, global = true, env = "LEAGUE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Write logs to files in this directory instead of stdout.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the league manager.
    LeagueManager {
        /// Address to listen on.
        #[arg(long, default_value = "127.0.0.1:8000")]
        bind: String,
    },
    /// Run a referee.
    Referee {
        #[command(flatten)]
        agent: AgentArgs,
        /// Matches run at the same time.
        #[arg(long, default_value = "2")]
        max_concurrent: usize,
    },
    /// Run a player.
    Player {
        #[command(flatten)]
        agent: AgentArgs,
        /// Betting strategy: random, alternating, even or odd.
        #[arg(long, default_value = "random")]
        strategy: StrategyKind,
    },
    /// Ask the league manager to start the league.
    Start {
        /// Endpoint of the league manager.
        #[arg(long, default_value = "http://127.0.0.1:8000/mcp")]
        league_manager: String,
    },
}

#[derive(Args)]
struct AgentArgs {
    /// Agent id, unique in the league.
    #[arg(long)]
    id: String,
    /// Display name, defaults to the id.
    #[arg(long)]
    name: Option<String>,
    /// Address to listen on.
    #[arg(long)]
    bind: String,
    /// Endpoint announced to the league, defaults to the bound address.
    #[arg(long)]
    advertise: Option<String>,
    /// Endpoint of the league manager.
    #[arg(long, default_value = "http://127.0.0.1:8000/mcp")]
    league_manager: String,
}

impl AgentArgs {
    async fn bind(&self, agent_type: AgentType) -> anyhow::Result<(TcpListener, AgentIdentity)> {
        let listener = TcpListener::bind(&self.bind)
            .await
            .with_context(|| format!("failed to bind {}", self.bind))?;
        let endpoint = match &self.advertise {
            Some(endpoint) => endpoint.clone(),
            None => endpoint_for(listener.local_addr()?),
        };
        let mut identity =
            AgentIdentity::new(&self.id, agent_type, endpoint, &self.league_manager);
        if let Some(name) = &self.name {
            identity = identity.with_display_name(name);
        }
        Ok((listener, identity))
    }
}

fn stop_on_ctrl_c(shutdown: &Shutdown) {
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(%e, "cannot listen for ctrl-c");
            return;
        }
        shutdown.trigger();
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Configuration::from_env();
    if cli.jsonrpc {
        config = config.with_jsonrpc(true);
    }
    if let Some(dir) = &cli.data_dir {
        config = config.with_data_dir(dir);
    }

    let agent_name = match &cli.command {
        Command::LeagueManager { .. } => "league_manager".to_owned(),
        Command::Start { .. } => "launcher".to_owned(),
        Command::Referee { agent, .. } | Command::Player { agent, .. } => agent.id.clone(),
    };
    let log_dir = cli
        .log_dir
        .clone()
        .or_else(|| config.log_to_file().then(|| config.data_dir().join("logs")));
    init_logger(&agent_name, log_dir.as_deref())?;

    let shutdown = Shutdown::new();
    match cli.command {
        Command::LeagueManager { bind } => {
            let manager = LeagueManager::from_config(config, shutdown.clone())?;
            if manager.restore_standings().await? {
                info!("previous standings loaded");
            }
            let listener = TcpListener::bind(&bind)
                .await
                .with_context(|| format!("failed to bind {bind}"))?;
            stop_on_ctrl_c(&shutdown);
            server::serve(listener, Arc::new(manager), shutdown).await
        }
        Command::Referee {
            agent,
            max_concurrent,
        } => {
            let (listener, identity) = agent.bind(AgentType::Referee).await?;
            let referee = Referee::from_config(identity, config, max_concurrent)?;
            let serving = tokio::spawn(server::serve(
                listener,
                Arc::new(referee.clone()),
                shutdown.clone(),
            ));
            referee.register().await?;
            stop_on_ctrl_c(&shutdown);
            serving.await?
        }
        Command::Player { agent, strategy } => {
            let (listener, identity) = agent.bind(AgentType::Player).await?;
            let player = Player::from_config(identity, config, strategy)?;
            let serving = tokio::spawn(server::serve(
                listener,
                Arc::new(player.clone()),
                shutdown.clone(),
            ));
            player.register().await?;
            info!(%strategy, "player ready");
            stop_on_ctrl_c(&shutdown);
            serving.await?
        }
        Command::Start { league_manager } => {
            let message = Message::new(
                "launcher",
                StartLeague {
                    league_id: config.league_id().to_owned(),
                },
            );
            let answer = Messenger::from_config(&config)?
                .send(&league_manager, &message)
                .await
                .context("league manager did not answer")?;
            println!("{answer}");
            Ok(())
        }
    }
}
