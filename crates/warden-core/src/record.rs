//! Active restriction records

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    sentence::Sentence,
    zone::{Location, ZoneName},
    Error, Result,
};

/// Opaque subject identifier supplied by the host environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(Uuid);

impl SubjectId {
    pub const fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Fresh random id, for hosts without their own identifiers.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for SubjectId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SubjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| Error::ParseError(format!("invalid subject id {s}: {e}")))
    }
}

/// Live state tying a subject to a zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestrictionRecord {
    pub subject_id: SubjectId,
    pub subject_name: String,
    pub zone: ZoneName,
    pub sentence: Sentence,
    /// Seconds since the epoch at which the sentence started counting
    pub start_time: i64,
    pub reason: String,
    pub issuer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_location: Option<Location>,
}

impl RestrictionRecord {
    pub fn remaining(&self, now: i64) -> Sentence {
        self.sentence.remaining(self.start_time, now)
    }

    /// Remaining seconds, `None` when permanent.
    pub fn remaining_secs(&self, now: i64) -> Option<u64> {
        match self.remaining(now) {
            Sentence::Seconds(secs) => Some(secs),
            Sentence::Permanent => None,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.remaining(now).is_zero()
    }

    /// Expiry instant, `None` when permanent.
    pub fn expires_at(&self, now: i64) -> Option<i64> {
        self.remaining_secs(now)
            .map(|secs| now.saturating_add(i64::try_from(secs).unwrap_or(i64::MAX)))
    }
}

/// Parameters for a new restriction
#[derive(Debug, Clone, PartialEq)]
pub struct NewRestriction {
    pub subject_id: SubjectId,
    pub subject_name: String,
    pub zone: ZoneName,
    pub sentence: Sentence,
    pub reason: String,
    pub issuer: String,
    pub prior_location: Option<Location>,
}

impl NewRestriction {
    pub(crate) fn into_record(self, start_time: i64) -> RestrictionRecord {
        RestrictionRecord {
            subject_id: self.subject_id,
            subject_name: self.subject_name,
            zone: self.zone,
            sentence: self.sentence.normalized(),
            start_time,
            reason: self.reason,
            issuer: self.issuer,
            prior_location: self.prior_location,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(sentence: Sentence) -> Result<RestrictionRecord> {
        Ok(NewRestriction {
            subject_id: SubjectId::random(),
            subject_name: "alice".to_string(),
            zone: ZoneName::new("yard")?,
            sentence,
            reason: "test".to_string(),
            issuer: "Console".to_string(),
            prior_location: None,
        }
        .into_record(1_000))
    }

    #[test]
    fn test_expiry() -> Result<()> {
        let rec = record(Sentence::Seconds(30))?;
        assert!(!rec.is_expired(1_029));
        assert!(rec.is_expired(1_030));
        assert_eq!(rec.remaining_secs(1_010), Some(20));
        assert_eq!(rec.expires_at(1_010), Some(1_030));
        Ok(())
    }

    #[test]
    fn test_permanent_never_expires() -> Result<()> {
        let rec = record(Sentence::Permanent)?;
        assert!(!rec.is_expired(i64::MAX));
        assert_eq!(rec.remaining_secs(5_000), None);
        assert_eq!(rec.expires_at(5_000), None);
        Ok(())
    }

    #[test]
    fn test_zero_sentence_is_expired_immediately() -> Result<()> {
        let rec = record(Sentence::Seconds(0))?;
        assert!(rec.is_expired(1_000));
        Ok(())
    }

    #[test]
    fn test_subject_id_parse() -> Result<()> {
        let id = SubjectId::random();
        assert_eq!(id.to_string().parse::<SubjectId>()?, id);
        assert!(matches!(
            "not-a-uuid".parse::<SubjectId>(),
            Err(Error::ParseError(_))
        ));
        Ok(())
    }

    #[test]
    fn test_prior_location_omitted_when_absent() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let rec = record(Sentence::Seconds(30))?;
        let value = serde_json::to_value(&rec)?;
        assert!(value.get("prior_location").is_none());
        assert_eq!(value["zone"], "yard");
        assert_eq!(value["sentence"], 30);

        let with_prior = RestrictionRecord {
            prior_location: Some(Location::new("overworld", 1.0, 2.0, 3.0)),
            ..rec
        };
        let value = serde_json::to_value(&with_prior)?;
        assert_eq!(value["prior_location"]["world"], "overworld");
        Ok(())
    }
}
