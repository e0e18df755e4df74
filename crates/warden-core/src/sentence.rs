//! Sentence durations
//!
//! A sentence is either a bounded number of seconds or permanent. The numeric
//! sentinel for permanent is `u64::MAX`; bounded arithmetic saturates one
//! below it so the sentinel is never produced by accident.
//!
//! Text form accepts `<n>[s|m|h|d|w]` components (`"90"`, `"15m"`,
//! `"1h 30m"`) and `permanent` / `perm`.

use std::{fmt, str::FromStr, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Numeric value reserved for a permanent sentence.
pub const PERMANENT_SENTINEL: u64 = u64::MAX;

/// Largest bounded sentence, in seconds.
pub const MAX_BOUNDED_SECS: u64 = PERMANENT_SENTINEL - 1;

const UNITS: [(&str, u64); 5] = [
    ("w", 604_800),
    ("d", 86_400),
    ("h", 3_600),
    ("m", 60),
    ("s", 1),
];

static WHOLE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(?:\d+[smhdw]?)+$").ok());
static COMPONENT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\d+)([smhdw]?)").ok());

/// Length of a confinement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sentence {
    /// Bounded sentence in seconds
    Seconds(u64),
    /// Never expires automatically
    Permanent,
}

impl Sentence {
    /// Bounded sentence, clamped below the permanent sentinel.
    #[must_use]
    pub const fn seconds(secs: u64) -> Self {
        if secs > MAX_BOUNDED_SECS {
            Self::Seconds(MAX_BOUNDED_SECS)
        } else {
            Self::Seconds(secs)
        }
    }

    /// Clamp a bounded value below the permanent sentinel.
    #[must_use]
    pub const fn normalized(self) -> Self {
        match self {
            Self::Seconds(secs) => Self::seconds(secs),
            Self::Permanent => Self::Permanent,
        }
    }

    /// Interpret a raw numeric duration where `u64::MAX` means permanent.
    #[must_use]
    pub const fn from_raw(secs: u64) -> Self {
        if secs == PERMANENT_SENTINEL {
            Self::Permanent
        } else {
            Self::Seconds(secs)
        }
    }

    /// Build a sentence from a signed value, rejecting negatives.
    pub fn from_signed(secs: i64) -> Result<Self> {
        u64::try_from(secs)
            .map(Self::seconds)
            .map_err(|_| Error::InvalidDuration(format!("duration cannot be negative: {secs}")))
    }

    #[must_use]
    pub const fn is_permanent(self) -> bool {
        matches!(self, Self::Permanent)
    }

    /// Seconds, with the sentinel for permanent.
    #[must_use]
    pub const fn as_secs(self) -> u64 {
        match self {
            Self::Seconds(secs) => secs,
            Self::Permanent => PERMANENT_SENTINEL,
        }
    }

    /// Saturating addition; permanent absorbs.
    #[must_use]
    pub const fn add(self, secs: u64) -> Self {
        match self {
            Self::Seconds(current) => Self::seconds(current.saturating_add(secs)),
            Self::Permanent => Self::Permanent,
        }
    }

    /// Subtraction clamped at zero; permanent absorbs.
    #[must_use]
    pub const fn subtract(self, secs: u64) -> Self {
        match self {
            Self::Seconds(current) => Self::seconds(current.saturating_sub(secs)),
            Self::Permanent => Self::Permanent,
        }
    }

    /// Time left of a sentence that started at `start`, observed at `now`.
    ///
    /// A start in the future counts as nothing elapsed.
    #[must_use]
    pub fn remaining(self, start: i64, now: i64) -> Self {
        match self {
            Self::Seconds(secs) => {
                let elapsed = u64::try_from(now.saturating_sub(start)).unwrap_or(0);
                Self::Seconds(secs.saturating_sub(elapsed))
            }
            Self::Permanent => Self::Permanent,
        }
    }

    /// True for a bounded sentence with nothing left.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        matches!(self, Self::Seconds(0))
    }
}

impl fmt::Display for Sentence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = match *self {
            Self::Permanent => return f.write_str("permanent"),
            Self::Seconds(0) => return f.write_str("0s"),
            Self::Seconds(secs) => secs,
        };

        let parts: Vec<String> = UNITS
            .iter()
            .scan(secs, |rest, &(suffix, size)| {
                let count = *rest / size;
                *rest %= size;
                Some((count, suffix))
            })
            .filter(|(count, _)| *count > 0)
            .map(|(count, suffix)| format!("{count}{suffix}"))
            .collect();

        f.write_str(&parts.join(" "))
    }
}

impl FromStr for Sentence {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let text = s.trim().to_lowercase();

        if text.is_empty() {
            return Err(Error::InvalidDuration("empty duration".to_string()));
        }
        if text == "permanent" || text == "perm" {
            return Ok(Self::Permanent);
        }
        if text.starts_with('-') {
            return Err(Error::InvalidDuration(format!(
                "duration cannot be negative: {s}"
            )));
        }

        let (Some(whole), Some(component)) = (WHOLE.as_ref(), COMPONENT.as_ref()) else {
            return Err(Error::InvalidDuration("duration pattern unavailable".to_string()));
        };
        // Separate tokens must each carry a unit, so "1 0" is not ten seconds.
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let well_formed = tokens.iter().all(|token| whole.is_match(token))
            && (tokens.len() == 1
                || tokens
                    .iter()
                    .all(|token| token.ends_with(|c: char| c.is_ascii_alphabetic())));
        if !well_formed {
            return Err(Error::InvalidDuration(format!("wrong duration format: {s}")));
        }

        let total = tokens
            .iter()
            .copied()
            .flat_map(|token| component.captures_iter(token))
            .try_fold(0_u64, |total, caps| {
                let amount: u64 = caps[1]
                    .parse()
                    .map_err(|_| Error::InvalidDuration(format!("duration too large: {s}")))?;
                let unit = unit_seconds(&caps[2]);
                amount
                    .checked_mul(unit)
                    .and_then(|secs| total.checked_add(secs))
                    .ok_or_else(|| Error::InvalidDuration(format!("duration too large: {s}")))
            })?;

        if total > MAX_BOUNDED_SECS {
            return Err(Error::InvalidDuration(format!("duration too large: {s}")));
        }
        Ok(Self::Seconds(total))
    }
}

fn unit_seconds(suffix: &str) -> u64 {
    UNITS
        .iter()
        .find(|(unit, _)| *unit == suffix)
        .map_or(1, |(_, size)| *size)
}

impl Serialize for Sentence {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Self::Seconds(secs) => serializer.serialize_u64(*secs),
            Self::Permanent => serializer.serialize_str("permanent"),
        }
    }
}

impl<'de> Deserialize<'de> for Sentence {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct SentenceVisitor;

        impl serde::de::Visitor<'_> for SentenceVisitor {
            type Value = Sentence;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a non-negative number of seconds or \"permanent\"")
            }

            fn visit_u64<E>(self, v: u64) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(Sentence::from_raw(v))
            }

            fn visit_i64<E>(self, v: i64) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Sentence::from_signed(v).map_err(E::custom)
            }

            fn visit_str<E>(self, v: &str) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(SentenceVisitor)
    }
}

/// Adjustment applied to an active sentence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentenceChange {
    /// Extend by the given seconds (no effect on permanent)
    Add(u64),
    /// Shorten by the given seconds, never below zero (no effect on permanent)
    Subtract(u64),
    /// Replace the sentence and restart it from now
    Set(Sentence),
}

impl SentenceChange {
    /// Parse an operation name (`add`, `subtract`/`remove`, `set`) and amount.
    pub fn parse(op: &str, amount: &str) -> Result<Self> {
        let sentence: Sentence = amount.parse()?;
        match (op.trim().to_lowercase().as_str(), sentence) {
            ("set", sentence) => Ok(Self::Set(sentence)),
            ("add" | "subtract" | "remove", Sentence::Permanent) => Err(Error::InvalidDuration(
                format!("cannot {op} a permanent amount; use set"),
            )),
            ("add", Sentence::Seconds(secs)) => Ok(Self::Add(secs)),
            ("subtract" | "remove", Sentence::Seconds(secs)) => Ok(Self::Subtract(secs)),
            _ => Err(Error::InvalidDuration(format!(
                "unknown sentence operation: {op}. Must be one of: add, subtract, set"
            ))),
        }
    }

    /// New sentence after applying this change to `current`.
    #[must_use]
    pub const fn apply(self, current: Sentence) -> Sentence {
        match self {
            Self::Add(secs) => current.add(secs),
            Self::Subtract(secs) => current.subtract(secs),
            Self::Set(sentence) => sentence.normalized(),
        }
    }

    /// Whether the start timestamp moves to the mutation instant.
    #[must_use]
    pub const fn restarts_clock(self) -> bool {
        matches!(self, Self::Set(_))
    }
}

impl fmt::Display for SentenceChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add(secs) => write!(f, "add {}", Sentence::Seconds(*secs)),
            Self::Subtract(secs) => write!(f, "subtract {}", Sentence::Seconds(*secs)),
            Self::Set(sentence) => write!(f, "set {sentence}"),
        }
    }
}
