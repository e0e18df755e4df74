//! Lifecycle notifications for audit and statistics collaborators

use std::fmt;

use strum::{Display, IntoStaticStr};
use tracing::info;

use crate::{
    record::{RestrictionRecord, SubjectId},
    sentence::SentenceChange,
    zone::{Zone, ZoneName},
};

/// Why a restriction ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ReleaseCause {
    Expired,
    Command,
    ZoneDeleted,
}

/// State transition reported after it has been applied
#[derive(Debug, Clone, PartialEq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum LifecycleEvent {
    ZoneCreated {
        zone: Zone,
    },
    ZoneDeleted {
        zone: ZoneName,
        released: Vec<SubjectId>,
    },
    Confined {
        record: RestrictionRecord,
    },
    Released {
        record: RestrictionRecord,
        cause: ReleaseCause,
    },
    SentenceChanged {
        record: RestrictionRecord,
        op: SentenceChange,
    },
}

impl LifecycleEvent {
    /// Stable snake_case event name.
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

/// Fire-and-forget receiver of lifecycle events
///
/// Called synchronously on the mutating thread after the state change; an
/// observer has no way to fail the operation.
pub trait LifecycleObserver: Send + Sync + fmt::Debug {
    fn notify(&self, event: &LifecycleEvent);
}

/// Writes every event to the `tracing` log at info level
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl LifecycleObserver for TracingObserver {
    fn notify(&self, event: &LifecycleEvent) {
        let kind = event.name();
        match event {
            LifecycleEvent::ZoneCreated { zone } => {
                info!(event = kind, zone = %zone.name, location = %zone.location, "Zone created");
            }
            LifecycleEvent::ZoneDeleted { zone, released } => {
                info!(event = kind, zone = %zone, released = released.len(), "Zone deleted");
            }
            LifecycleEvent::Confined { record } => {
                info!(
                    event = kind,
                    subject = %record.subject_id,
                    subject_name = %record.subject_name,
                    zone = %record.zone,
                    sentence = %record.sentence,
                    reason = %record.reason,
                    issuer = %record.issuer,
                    "Subject confined"
                );
            }
            LifecycleEvent::Released { record, cause } => {
                info!(
                    event = kind,
                    subject = %record.subject_id,
                    subject_name = %record.subject_name,
                    zone = %record.zone,
                    cause = %cause,
                    "Subject released"
                );
            }
            LifecycleEvent::SentenceChanged { record, op } => {
                info!(
                    event = kind,
                    subject = %record.subject_id,
                    subject_name = %record.subject_name,
                    op = %op,
                    sentence = %record.sentence,
                    "Sentence changed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{zone::Location, Result};

    #[test]
    fn test_event_names() -> Result<()> {
        let event = LifecycleEvent::ZoneDeleted {
            zone: ZoneName::new("yard")?,
            released: Vec::new(),
        };
        assert_eq!(event.name(), "zone_deleted");

        let event = LifecycleEvent::ZoneCreated {
            zone: Zone::new(ZoneName::new("yard")?, Location::new("overworld", 0.0, 0.0, 0.0)),
        };
        assert_eq!(event.name(), "zone_created");
        Ok(())
    }

    #[test]
    fn test_release_cause_display() {
        assert_eq!(ReleaseCause::Expired.to_string(), "expired");
        assert_eq!(ReleaseCause::ZoneDeleted.to_string(), "zone_deleted");
    }
}
