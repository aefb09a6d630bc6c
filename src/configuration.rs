//! Config for league, referee and player behaviors
//!
//! Configuration can be created programmatically using [`Configuration::new()`] and the
//! `with_*` setters, or by reading environment variables using [`Configuration::from_env()`].
//!
//! # Environment Variables
//!
//! All values are optional. Durations are integers in the unit named by the suffix, flags are
//! enabled by setting the value to `"true"` (case-insensitive).
//!
//! - `LEAGUE_ID` — League identifier (default: `league_2025_even_odd`)
//! - `LEAGUE_JOIN_TIMEOUT_MS` — How long a referee waits for a join acknowledgment (default: `5000`)
//! - `LEAGUE_CHOICE_TIMEOUT_MS` — How long a referee waits for a parity choice (default: `30000`)
//! - `LEAGUE_HTTP_TIMEOUT_MS` — Transport level timeout of a single HTTP call (default: `10000`)
//! - `LEAGUE_RETRY_ATTEMPTS` — Attempts made by `send_with_retry` (default: `3`)
//! - `LEAGUE_RETRY_BASE_DELAY_MS` — Base delay of the exponential backoff (default: `1000`)
//! - `LEAGUE_BREAKER_THRESHOLD` — Failures before a circuit breaker opens (default: `5`)
//! - `LEAGUE_BREAKER_RESET_SECS` — Time before an open breaker allows a trial call (default: `60`)
//! - `LEAGUE_MATCH_TIMEOUT_SECS` — Per-match share of a round deadline (default: `60`)
//! - `LEAGUE_WIN_POINTS`, `LEAGUE_DRAW_POINTS`, `LEAGUE_LOSS_POINTS` — Scoring table (default: `3`, `1`, `0`)
//! - `LEAGUE_SHUTDOWN_DELAY_SECS` — Delay between league completion and shutdown (default: `5`)
//! - `LEAGUE_DATA_DIR` — Root directory of persisted JSON files (default: `./data`)
//! - `LEAGUE_JSONRPC` — Wrap outbound messages in JSON-RPC 2.0 (default: `false`)
//! - `LEAGUE_LOG` — Log to a file instead of stdout (default: `false`)

use std::{env, path::PathBuf, time::Duration};

use crate::game::GAME_TYPE;
use crate::transport::retry::RetryPolicy;

/// Points credited per match outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scoring {
    /// Points for a win.
    pub win: u32,
    /// Points for each side of a draw.
    pub draw: u32,
    /// Points for a loss.
    pub loss: u32,
}

impl Default for Scoring {
    fn default() -> Self {
        Scoring {
            win: 3,
            draw: 1,
            loss: 0,
        }
    }
}

/// Configuration shared by every agent of a league.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub(crate) league_id: String,
    pub(crate) game_type: String,
    pub(crate) join_timeout: Duration,
    pub(crate) choice_timeout: Duration,
    pub(crate) http_timeout: Duration,
    pub(crate) retry_attempts: u32,
    pub(crate) retry_base_delay: Duration,
    pub(crate) breaker_threshold: u32,
    pub(crate) breaker_reset_timeout: Duration,
    pub(crate) match_timeout: Duration,
    pub(crate) scoring: Scoring,
    pub(crate) shutdown_delay: Duration,
    pub(crate) data_dir: PathBuf,
    pub(crate) jsonrpc: bool,
    pub(crate) log: bool,
}

impl Configuration {
    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - Players have 5 seconds to join a match and 30 seconds to choose a parity.
    /// - A single HTTP call times out after 10 seconds.
    /// - Result reports are attempted 3 times with a 1 second base backoff.
    /// - A circuit breaker opens after 5 failures and allows a trial call after 60 seconds.
    /// - A round waits at most 60 seconds per scheduled match.
    /// - Wins are worth 3 points, draws 1, losses 0.
    /// - Persisted files live under `./data`.
    /// - Messages are posted bare (no JSON-RPC envelope) and logs go to stdout.
    pub fn new() -> Self {
        Self {
            league_id: "league_2025_even_odd".to_owned(),
            game_type: GAME_TYPE.to_owned(),
            join_timeout: Duration::from_secs(5),
            choice_timeout: Duration::from_secs(30),
            http_timeout: Duration::from_secs(10),
            retry_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            breaker_threshold: 5,
            breaker_reset_timeout: Duration::from_secs(60),
            match_timeout: Duration::from_secs(60),
            scoring: Scoring::default(),
            shutdown_delay: Duration::from_secs(5),
            data_dir: PathBuf::from("./data"),
            jsonrpc: false,
            log: false,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// See the [module documentation](self) for the recognized variables. Unset or unparsable
    /// values fall back to the defaults of [`Configuration::new()`].
    pub fn from_env() -> Self {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        fn parse_u32(var: &str) -> Option<u32> {
            env::var(var).ok()?.parse().ok()
        }

        fn parse_duration_millis(var: &str) -> Option<Duration> {
            env::var(var)
                .ok()?
                .parse::<u64>()
                .ok()
                .map(Duration::from_millis)
        }

        fn parse_duration_secs(var: &str) -> Option<Duration> {
            env::var(var)
                .ok()?
                .parse::<u64>()
                .ok()
                .map(Duration::from_secs)
        }

        let default = Self::new();
        let scoring = Scoring {
            win: parse_u32("LEAGUE_WIN_POINTS").unwrap_or(default.scoring.win),
            draw: parse_u32("LEAGUE_DRAW_POINTS").unwrap_or(default.scoring.draw),
            loss: parse_u32("LEAGUE_LOSS_POINTS").unwrap_or(default.scoring.loss),
        };

        Self {
            league_id: env::var("LEAGUE_ID").unwrap_or(default.league_id),
            game_type: default.game_type,
            join_timeout: parse_duration_millis("LEAGUE_JOIN_TIMEOUT_MS")
                .unwrap_or(default.join_timeout),
            choice_timeout: parse_duration_millis("LEAGUE_CHOICE_TIMEOUT_MS")
                .unwrap_or(default.choice_timeout),
            http_timeout: parse_duration_millis("LEAGUE_HTTP_TIMEOUT_MS")
                .unwrap_or(default.http_timeout),
            retry_attempts: parse_u32("LEAGUE_RETRY_ATTEMPTS").unwrap_or(default.retry_attempts),
            retry_base_delay: parse_duration_millis("LEAGUE_RETRY_BASE_DELAY_MS")
                .unwrap_or(default.retry_base_delay),
            breaker_threshold: parse_u32("LEAGUE_BREAKER_THRESHOLD")
                .unwrap_or(default.breaker_threshold),
            breaker_reset_timeout: parse_duration_secs("LEAGUE_BREAKER_RESET_SECS")
                .unwrap_or(default.breaker_reset_timeout),
            match_timeout: parse_duration_secs("LEAGUE_MATCH_TIMEOUT_SECS")
                .unwrap_or(default.match_timeout),
            scoring,
            shutdown_delay: parse_duration_secs("LEAGUE_SHUTDOWN_DELAY_SECS")
                .unwrap_or(default.shutdown_delay),
            data_dir: env::var("LEAGUE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.data_dir),
            jsonrpc: get_env_flag("LEAGUE_JSONRPC", default.jsonrpc),
            log: get_env_flag("LEAGUE_LOG", default.log),
        }
    }

    /// Set the league identifier.
    pub fn with_league_id(mut self, league_id: impl Into<String>) -> Self {
        self.league_id = league_id.into();
        self
    }

    /// Set how long a referee waits for both join acknowledgments.
    pub fn with_join_timeout(mut self, value: Duration) -> Self {
        self.join_timeout = value;
        self
    }

    /// Set how long a referee waits for both parity choices.
    pub fn with_choice_timeout(mut self, value: Duration) -> Self {
        self.choice_timeout = value;
        self
    }

    /// Set the timeout of a single HTTP call.
    pub fn with_http_timeout(mut self, value: Duration) -> Self {
        self.http_timeout = value;
        self
    }

    /// Set the number of attempts and the base backoff delay of `send_with_retry`.
    pub fn with_retry(mut self, attempts: u32, base_delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_base_delay = base_delay;
        self
    }

    /// Set the failure threshold and reset timeout of circuit breakers.
    pub fn with_circuit_breaker(mut self, threshold: u32, reset_timeout: Duration) -> Self {
        self.breaker_threshold = threshold;
        self.breaker_reset_timeout = reset_timeout;
        self
    }

    /// Set the per-match share of a round deadline.
    pub fn with_match_timeout(mut self, value: Duration) -> Self {
        self.match_timeout = value;
        self
    }

    /// Set the scoring table.
    pub fn with_scoring(mut self, scoring: Scoring) -> Self {
        self.scoring = scoring;
        self
    }

    /// Set the delay between league completion and shutdown.
    pub fn with_shutdown_delay(mut self, value: Duration) -> Self {
        self.shutdown_delay = value;
        self
    }

    /// Set the root directory of persisted files.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Enable or disable JSON-RPC wrapping of outbound messages.
    pub fn with_jsonrpc(mut self, value: bool) -> Self {
        self.jsonrpc = value;
        self
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// League identifier.
    pub fn league_id(&self) -> &str {
        &self.league_id
    }

    /// Scoring table.
    pub fn scoring(&self) -> Scoring {
        self.scoring
    }

    /// Root directory of persisted files.
    pub fn data_dir(&self) -> &std::path::Path {
        &self.data_dir
    }

    /// Whether logs go to a file.
    pub fn log_to_file(&self) -> bool {
        self.log
    }

    /// Retry policy used for deliveries that must not be dropped.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, self.retry_base_delay)
    }

    /// Deadline of a whole round of `matches` matches.
    pub(crate) fn round_timeout(&self, matches: usize) -> Duration {
        self.match_timeout
            .saturating_mul(u32::try_from(matches.max(1)).unwrap_or(u32::MAX))
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = Configuration::new()
            .with_league_id("test")
            .with_choice_timeout(Duration::from_millis(200))
            .with_retry(5, Duration::from_millis(10))
            .with_scoring(Scoring {
                win: 2,
                draw: 1,
                loss: 0,
            });

        assert_eq!(config.league_id(), "test");
        assert_eq!(config.choice_timeout, Duration::from_millis(200));
        assert_eq!(config.join_timeout, Duration::from_secs(5));
        assert_eq!(config.retry_policy(), RetryPolicy::new(5, Duration::from_millis(10)));
        assert_eq!(config.scoring().win, 2);
    }

    #[test]
    fn round_timeout_scales_with_matches() {
        let config = Configuration::new().with_match_timeout(Duration::from_secs(10));
        assert_eq!(config.round_timeout(3), Duration::from_secs(30));
        assert_eq!(config.round_timeout(0), Duration::from_secs(10));
    }
}
