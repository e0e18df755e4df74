//! warden-core: confinement zones, active restrictions and their lifecycle
//!
//! [`RestrictionManager`] is the entry point. It owns a [`ZoneRegistry`] and
//! a [`RestrictionStore`], flushes both through a [`Persistence`] gateway
//! after every change, and runs an [`ExpirationScheduler`] that hands expired
//! subjects back to the host through a [`ReleaseSink`].

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod persistence;
pub mod record;
pub mod scheduler;
pub mod sentence;
pub mod store;
pub mod world;
pub mod zone;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_settings, Settings};
pub use error::{Error, Result};
pub use events::{LifecycleEvent, LifecycleObserver, ReleaseCause, TracingObserver};
pub use manager::{
    Applied, ConfinementRequest, LoadSummary, ManagerBuilder, Presence, RestrictionManager,
    ZoneDeletion,
};
pub use persistence::{JsonFileGateway, Persistence};
pub use record::{RestrictionRecord, SubjectId};
pub use scheduler::{ChannelReleaseSink, ExpirationScheduler, ReleaseSink, SchedulerState};
pub use sentence::{Sentence, SentenceChange};
pub use store::RestrictionStore;
pub use world::{OpenWorld, World};
pub use zone::{Location, Zone, ZoneName, ZoneRegistry};
