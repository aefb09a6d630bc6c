//! # Even-Odd League
//!
//! A multi-agent league of the Even-Odd game. Independent agent processes talk
//! JSON over HTTP:
//!
//! - one [`LeagueManager`](crate::league::LeagueManager) registers agents,
//!   builds a round-robin schedule, announces rounds, collects results and keeps
//!   the standings,
//! - [`Referee`](crate::referee::Referee)s run the matches they are assigned,
//! - [`Player`](crate::player::Player)s bet on the parity of a number drawn
//!   in `1..=10`.
//!
//! In a match both players bet `even` or `odd`; whoever guessed the parity of
//! the drawn number alone wins, otherwise the match is a draw. A player who
//! does not answer in time forfeits.
//!
//! # Documentation Overview
//!
//! - Message formats, validation and JSON-RPC wrapping live in [`protocol`].
//! - Delivery, retries and circuit breakers live in [`transport`].
//! - Timeouts, scoring and file locations are set through
//!   [`Configuration`](crate::configuration::Configuration).
//! - Every agent serves its [`AgentService`](crate::server::AgentService) with
//!   [`server::serve`].
//!
//! # Usage Example
//!
//! Running a league manager in-process:
//!
//! ```no_run
//! use std::sync::Arc;
//! use even_odd_league::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Configuration::from_env().with_data_dir("./data");
//!     let shutdown = Shutdown::new();
//!     let manager = LeagueManager::from_config(config, shutdown.clone())?;
//!     manager.restore_standings().await?;
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8000").await?;
//!     even_odd_league::server::serve(listener, Arc::new(manager), shutdown).await
//! }
//! ```
#![warn(missing_docs)]

pub use anyhow;

pub mod agent;
pub mod configuration;
pub mod game;
pub mod league;
pub mod logger;
pub mod player;
pub mod protocol;
pub mod referee;
pub mod registry;
pub mod server;
pub mod storage;
pub mod transport;

/// Commonly used types and traits for quick access.
///
/// Import this prelude to get started easily:
/// ```rust
/// use even_odd_league::prelude::*;
/// ```
///
/// Includes:
/// - [`Configuration`](crate::configuration::Configuration)
/// - the three agents and their identity
/// - [`Shutdown`](crate::server::Shutdown) and the [`AgentService`](crate::server::AgentService) trait
pub mod prelude {
    pub use crate::agent::{AgentIdentity, AgentType};
    pub use crate::configuration::{Configuration, Scoring};
    pub use crate::game::Parity;
    pub use crate::league::{LeagueManager, LeagueStatus};
    pub use crate::player::{ParityStrategy, Player, StrategyKind};
    pub use crate::protocol::{Message, MessageBody, Reply};
    pub use crate::referee::Referee;
    pub use crate::server::{AgentService, Shutdown};
}
