//! Rules of the Even-Odd parity game.
//!
//! Each player bets on the parity of a number the referee draws uniformly in
//! `[MIN_NUMBER, MAX_NUMBER]`. A player wins when their bet matches the drawn
//! parity and the opponent's does not; every other combination is a draw.
//!
//! Players that fail to answer in time forfeit: a responding player always
//! beats a silent one, and two silent players draw. Forfeits are resolved
//! before any number is drawn.

use std::{fmt, str::FromStr};

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};

/// Game type identifier carried by every match-level message.
pub const GAME_TYPE: &str = "even_odd";
/// Smallest number the referee can draw.
pub const MIN_NUMBER: u8 = 1;
/// Largest number the referee can draw.
pub const MAX_NUMBER: u8 = 10;

/// A parity bet, or the parity of a drawn number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// Divisible by two.
    Even,
    /// Not divisible by two.
    Odd,
}

impl Parity {
    /// Parity of `number`.
    pub fn of(number: u8) -> Parity {
        if number % 2 == 0 {
            Parity::Even
        } else {
            Parity::Odd
        }
    }

    /// The other parity.
    pub fn flipped(self) -> Parity {
        match self {
            Parity::Even => Parity::Odd,
            Parity::Odd => Parity::Even,
        }
    }

    /// Wire representation (`"even"` / `"odd"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Parity::Even => "even",
            Parity::Odd => "odd",
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Parity {
    type Err = String;

    /// Case-insensitive: `"EVEN"`, `"Even"` and `"even"` are all accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("even") {
            Ok(Parity::Even)
        } else if s.eq_ignore_ascii_case("odd") {
            Ok(Parity::Odd)
        } else {
            Err(format!("'{s}' is not a parity (expected 'even' or 'odd')"))
        }
    }
}

impl<'de> Deserialize<'de> for Parity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Which side of a match won.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// First seat won.
    PlayerA,
    /// Second seat won.
    PlayerB,
    /// Nobody won.
    Draw,
}

/// Why a match ended the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeReason {
    /// Both players answered and the drawn number decided.
    ParityMatch,
    /// Exactly one player failed to answer the parity call.
    Forfeit,
    /// Neither player answered the parity call.
    DoubleForfeit,
    /// At least one player never acknowledged the invitation.
    NoShow,
}

/// Final verdict of a match plus the number drawn to reach it, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// Winner (or draw).
    pub verdict: Verdict,
    /// `None` when a forfeit short-circuited the draw.
    pub drawn_number: Option<u8>,
    /// How the verdict was reached.
    pub reason: OutcomeReason,
}

impl Resolution {
    /// Technical result for a match abandoned during the invitation phase.
    pub fn no_show(a_joined: bool, b_joined: bool) -> Resolution {
        let verdict = match (a_joined, b_joined) {
            (true, false) => Verdict::PlayerA,
            (false, true) => Verdict::PlayerB,
            _ => Verdict::Draw,
        };
        Resolution {
            verdict,
            drawn_number: None,
            reason: OutcomeReason::NoShow,
        }
    }

    /// Parity of the drawn number, if one was drawn.
    pub fn number_parity(&self) -> Option<Parity> {
        self.drawn_number.map(Parity::of)
    }
}

/// Draws a number uniformly in `[MIN_NUMBER, MAX_NUMBER]`.
pub fn draw_number<R: Rng + ?Sized>(rng: &mut R) -> u8 {
    rng.random_range(MIN_NUMBER..=MAX_NUMBER)
}

/// Decides a match where both players answered.
pub fn determine_winner(choice_a: Parity, choice_b: Parity, number: u8) -> Verdict {
    let parity = Parity::of(number);
    match (choice_a == parity, choice_b == parity) {
        (true, false) => Verdict::PlayerA,
        (false, true) => Verdict::PlayerB,
        _ => Verdict::Draw,
    }
}

/// Resolves a match from the collected choices.
///
/// `None` means the player did not answer in time. `draw` is only called when
/// both players answered.
pub fn resolve(
    choice_a: Option<Parity>,
    choice_b: Option<Parity>,
    draw: impl FnOnce() -> u8,
) -> Resolution {
    match (choice_a, choice_b) {
        (Some(a), Some(b)) => {
            let number = draw();
            Resolution {
                verdict: determine_winner(a, b, number),
                drawn_number: Some(number),
                reason: OutcomeReason::ParityMatch,
            }
        }
        (Some(_), None) => Resolution {
            verdict: Verdict::PlayerA,
            drawn_number: None,
            reason: OutcomeReason::Forfeit,
        },
        (None, Some(_)) => Resolution {
            verdict: Verdict::PlayerB,
            drawn_number: None,
            reason: OutcomeReason::Forfeit,
        },
        (None, None) => Resolution {
            verdict: Verdict::Draw,
            drawn_number: None,
            reason: OutcomeReason::DoubleForfeit,
        },
    }
}
