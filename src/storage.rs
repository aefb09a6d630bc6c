//! Flat-file JSON persistence of the league manager.
//!
//! Layout under the data directory:
//!
//! ```text
//! leagues/<league_id>/standings.json
//! matches/<league_id>/<match_id>.json
//! players/<player_id>/history.json
//! ```
//!
//! Every document is written to a temporary file in the same directory then
//! renamed over the target, so readers see either the old or the new version.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::league::record::{MatchRecord, Outcome};
use crate::protocol::{messages::StandingRow, timestamp_now};

/// Persisted standings of a league.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandingsDocument {
    /// Increases with every update of the standings.
    pub version: u64,
    pub league_id: String,
    pub last_updated: String,
    pub standings: Vec<StandingRow>,
}

/// One match in a player's history.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub league_id: String,
    pub round_id: u32,
    pub match_id: String,
    pub opponent_id: String,
    pub outcome: Outcome,
    pub recorded_at: String,
}

/// Every match a player took part in, oldest first.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerHistory {
    pub player_id: String,
    pub matches: Vec<HistoryEntry>,
}

/// JSON document store rooted at the data directory.
#[derive(Debug)]
pub struct LeagueStore {
    root: PathBuf,
    last_standings_version: Mutex<u64>,
    history: Mutex<()>,
}

impl LeagueStore {
    /// Store rooted at `root`. Directories are created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            last_standings_version: Mutex::new(0),
            history: Mutex::new(()),
        }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the standings document of `league_id`.
    pub fn standings_path(&self, league_id: &str) -> PathBuf {
        self.root.join("leagues").join(league_id).join("standings.json")
    }

    /// Path of the record of `match_id`.
    pub fn match_path(&self, league_id: &str, match_id: &str) -> PathBuf {
        self.root
            .join("matches")
            .join(league_id)
            .join(format!("{match_id}.json"))
    }

    /// Path of the history of `player_id`.
    pub fn history_path(&self, player_id: &str) -> PathBuf {
        self.root.join("players").join(player_id).join("history.json")
    }

    /// Writes the standings at `version`.
    ///
    /// A version older than the last one written is skipped, so concurrent
    /// writers never roll the document back. Returns whether it was written.
    pub async fn save_standings(
        &self,
        league_id: &str,
        version: u64,
        standings: &[StandingRow],
    ) -> anyhow::Result<bool> {
        let mut last = self.last_standings_version.lock().await;
        if version < *last {
            trace!(version, last = *last, "stale standings not written");
            return Ok(false);
        }
        let document = StandingsDocument {
            version,
            league_id: league_id.to_owned(),
            last_updated: timestamp_now(),
            standings: standings.to_vec(),
        };
        write_json_atomic(&self.standings_path(league_id), &document).await?;
        *last = version;
        debug!(league_id, version, "standings saved");
        Ok(true)
    }

    /// Reads the standings of `league_id`, `None` if never written.
    pub async fn load_standings(&self, league_id: &str) -> anyhow::Result<Option<StandingsDocument>> {
        read_json(&self.standings_path(league_id)).await
    }

    /// Writes the record of one match.
    pub async fn save_match(&self, record: &MatchRecord) -> anyhow::Result<()> {
        let path = self.match_path(&record.league_id, &record.match_id);
        write_json_atomic(&path, record).await
    }

    /// Reads the record of one match.
    pub async fn load_match(&self, league_id: &str, match_id: &str) -> anyhow::Result<Option<MatchRecord>> {
        read_json(&self.match_path(league_id, match_id)).await
    }

    /// Appends `record` to the history of both participants.
    pub async fn append_history(&self, record: &MatchRecord) -> anyhow::Result<()> {
        let _guard = self.history.lock().await;
        for player in [&record.player_a, &record.player_b] {
            let (Some(outcome), Some(opponent)) = (record.outcome_for(player), record.opponent_of(player))
            else {
                continue;
            };
            let path = self.history_path(player);
            let mut history: PlayerHistory = read_json(&path).await?.unwrap_or_default();
            history.player_id.clone_from(player);
            history.matches.push(HistoryEntry {
                league_id: record.league_id.clone(),
                round_id: record.round_id,
                match_id: record.match_id.clone(),
                opponent_id: opponent.to_owned(),
                outcome,
                recorded_at: record.recorded_at.clone(),
            });
            write_json_atomic(&path, &history).await?;
        }
        Ok(())
    }

    /// Reads the history of `player_id`, empty if never written.
    pub async fn load_history(&self, player_id: &str) -> anyhow::Result<PlayerHistory> {
        Ok(read_json(&self.history_path(player_id))
            .await?
            .unwrap_or_else(|| PlayerHistory {
                player_id: player_id.to_owned(),
                matches: Vec::new(),
            }))
    }
}

async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let bytes = serde_json::to_vec_pretty(value).context("failed to encode document")?;
    let tmp = dir.join(format!(".{}.tmp", Uuid::new_v4().simple()));
    tokio::fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("failed to move {} into place", path.display()))
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
    };
    let value = serde_json::from_slice(&bytes)
        .with_context(|| format!("{} is not a valid document", path.display()))?;
    Ok(Some(value))
}
