//! Restriction lifecycle manager
//!
//! The single mutation entry point. Every state change goes through here,
//! is reported to the registered observers, and is flushed to the
//! [`Persistence`] gateway before the call returns.
//!
//! # Persistence failures
//!
//! A failed flush does not roll back the in-memory change. Mutating
//! operations return [`Applied`], which carries the operation's value together
//! with the outcome of the save, so a caller that released a subject still
//! gets the record it needs to restore them. [`RestrictionManager::save_all`]
//! retries the write.
//!
//! # Locking
//!
//! Zones and restrictions live in separate maps with their own locks. A
//! zone gate orders `confine` (shared) against `delete_zone` (exclusive) so
//! no record can be created pointing at a zone that is being deleted. Each
//! collection has a flush mutex and takes its snapshot under it, so the last
//! write to disk always carries the newest state.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, error, info, warn};

use crate::{
    clock::{Clock, SystemClock},
    config::Settings,
    events::{LifecycleEvent, LifecycleObserver, ReleaseCause},
    persistence::{JsonFileGateway, Persistence},
    record::{NewRestriction, RestrictionRecord, SubjectId},
    scheduler::{self, ExpirationScheduler, ReleaseSink, SchedulerState},
    sentence::{Sentence, SentenceChange},
    store::RestrictionStore,
    world::{OpenWorld, World},
    zone::{Location, Zone, ZoneName, ZoneRegistry},
    Error, Result,
};

const DEFAULT_REASON: &str = "No reason";
const DEFAULT_ISSUER: &str = "Console";

/// A mutation that has been applied in memory, and whether it reached disk
#[derive(Debug)]
#[must_use = "check `saved` to learn whether the change was persisted"]
pub struct Applied<T> {
    pub value: T,
    pub saved: Result<()>,
}

impl<T> Applied<T> {
    const fn new(value: T, saved: Result<()>) -> Self {
        Self { value, saved }
    }

    pub const fn is_saved(&self) -> bool {
        self.saved.is_ok()
    }

    /// The value if the change was persisted, otherwise the save error.
    pub fn into_result(self) -> Result<T> {
        self.saved.map(|()| self.value)
    }
}

/// Input to [`RestrictionManager::confine`]
#[derive(Debug, Clone, PartialEq)]
pub struct ConfinementRequest {
    pub subject_id: SubjectId,
    pub subject_name: String,
    pub zone: String,
    pub sentence: Sentence,
    pub reason: String,
    pub issuer: String,
    /// Where the subject is now; restored on release
    pub current_location: Option<Location>,
}

impl ConfinementRequest {
    pub fn new(
        subject_id: SubjectId,
        subject_name: impl Into<String>,
        zone: impl Into<String>,
        sentence: Sentence,
    ) -> Self {
        Self {
            subject_id,
            subject_name: subject_name.into(),
            zone: zone.into(),
            sentence,
            reason: DEFAULT_REASON.to_string(),
            issuer: DEFAULT_ISSUER.to_string(),
            current_location: None,
        }
    }

    #[must_use]
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    #[must_use]
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn from_location(mut self, location: Location) -> Self {
        self.current_location = Some(location);
        self
    }
}

/// What a joining or respawning subject should experience
#[derive(Debug, Clone, PartialEq)]
pub enum Presence {
    /// Not restricted
    Free,
    /// Sentence ran out while away; restore them
    Released(RestrictionRecord),
    /// Still confined. `zone` is `None` when the zone is gone or unusable.
    Confined {
        record: RestrictionRecord,
        zone: Option<Location>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZoneDeletion {
    pub zone: Zone,
    pub released: Vec<RestrictionRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadSummary {
    pub zones: usize,
    pub restrictions: usize,
    /// Records whose sentence elapsed while the data was offline
    pub expired: usize,
    /// Records naming a zone that no longer exists
    pub dangling: usize,
}

pub struct ManagerBuilder {
    persistence: Arc<dyn Persistence>,
    world: Arc<dyn World>,
    clock: Arc<dyn Clock>,
    observers: Vec<Arc<dyn LifecycleObserver>>,
    release_sink: Option<Arc<dyn ReleaseSink>>,
    sweep_interval: std::time::Duration,
}

impl ManagerBuilder {
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self {
            persistence,
            world: Arc::new(OpenWorld),
            clock: Arc::new(SystemClock),
            observers: Vec::new(),
            release_sink: None,
            sweep_interval: Settings::default().sweep_interval(),
        }
    }

    /// JSON files under `settings.data_dir`, sweeping at the configured interval.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(Arc::new(JsonFileGateway::new(settings.data_dir.clone())))
            .sweep_interval(settings.sweep_interval())
    }

    #[must_use]
    pub fn world(mut self, world: Arc<dyn World>) -> Self {
        self.world = world;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    #[must_use]
    pub fn release_sink(mut self, sink: Arc<dyn ReleaseSink>) -> Self {
        self.release_sink = Some(sink);
        self
    }

    #[must_use]
    pub const fn sweep_interval(mut self, interval: std::time::Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn build(self) -> RestrictionManager {
        RestrictionManager {
            zones: ZoneRegistry::new(),
            store: Arc::new(RestrictionStore::new()),
            persistence: self.persistence,
            world: self.world,
            clock: self.clock,
            observers: self.observers,
            release_sink: self.release_sink,
            scheduler: tokio::sync::Mutex::new(ExpirationScheduler::new(self.sweep_interval)),
            zone_gate: RwLock::new(()),
            zone_flush: Mutex::new(()),
            restriction_flush: Mutex::new(()),
        }
    }
}

pub struct RestrictionManager {
    zones: ZoneRegistry,
    store: Arc<RestrictionStore>,
    persistence: Arc<dyn Persistence>,
    world: Arc<dyn World>,
    clock: Arc<dyn Clock>,
    observers: Vec<Arc<dyn LifecycleObserver>>,
    release_sink: Option<Arc<dyn ReleaseSink>>,
    scheduler: tokio::sync::Mutex<ExpirationScheduler>,
    zone_gate: RwLock<()>,
    zone_flush: Mutex<()>,
    restriction_flush: Mutex<()>,
}

impl std::fmt::Debug for RestrictionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestrictionManager")
            .field("zones", &self.zones.len())
            .field("restrictions", &self.store.len())
            .field("persistence", &self.persistence)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

/// Zone lookups treat a name that fails validation as one that does not exist.
fn lookup_name(name: &str) -> Result<ZoneName> {
    ZoneName::new(name).map_err(|_| Error::ZoneNotFound(name.to_string()))
}

impl RestrictionManager {
    pub fn builder(persistence: Arc<dyn Persistence>) -> ManagerBuilder {
        ManagerBuilder::new(persistence)
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    fn notify(&self, event: &LifecycleEvent) {
        for observer in &self.observers {
            observer.notify(event);
        }
    }

    fn flush_zones(&self) -> Result<()> {
        let _flush = self.zone_flush.lock().unwrap_or_else(PoisonError::into_inner);
        let zones = self.zones.dump();
        self.persistence
            .save_zones(&zones)
            .inspect_err(|e| error!(error = %e, "Failed to save zones"))
    }

    fn flush_restrictions(&self) -> Result<()> {
        let _flush = self
            .restriction_flush
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let records = self.store.dump();
        self.persistence
            .save_restrictions(&records)
            .inspect_err(|e| error!(error = %e, "Failed to save restrictions"))
    }

    /// Replace in-memory state with what the gateway holds.
    ///
    /// Both collections are read before either is replaced, so a failed read
    /// leaves the current state untouched. Records that expired while offline
    /// are kept for the next sweep or join check.
    pub fn load(&self) -> Result<LoadSummary> {
        let zones = self.persistence.load_zones()?;
        let records = self.persistence.load_restrictions()?;
        let now = self.clock.now();

        let _gate = self.zone_gate.write().unwrap_or_else(PoisonError::into_inner);
        self.zones.load(zones);
        self.store.load(records);

        let records = self.store.list_all();
        let dangling = records
            .iter()
            .filter(|record| !self.zones.contains(&record.zone))
            .inspect(|record| {
                warn!(subject = %record.subject_id, zone = %record.zone, "Restriction references a missing zone");
            })
            .count();
        let summary = LoadSummary {
            zones: self.zones.len(),
            restrictions: records.len(),
            expired: records.iter().filter(|record| record.is_expired(now)).count(),
            dangling,
        };

        info!(
            zones = summary.zones,
            restrictions = summary.restrictions,
            expired = summary.expired,
            "Loaded confinement data"
        );
        Ok(summary)
    }

    /// Fail with `InvalidLocation` unless the world exists and the region loads.
    pub fn validate_location(&self, location: &Location) -> Result<()> {
        location.ensure_finite()?;
        if !self.world.world_exists(&location.world) {
            return Err(Error::InvalidLocation(format!(
                "world '{}' does not exist",
                location.world
            )));
        }
        if !self
            .world
            .ensure_region_loaded(&location.world, location.x, location.z)
        {
            return Err(Error::InvalidLocation(format!(
                "region around {location} cannot be loaded"
            )));
        }
        Ok(())
    }

    /// Where a released subject should go: the prior location if it is still
    /// usable, otherwise the spawn of the world they are in now.
    pub fn restore_location(
        &self,
        record: &RestrictionRecord,
        current_world: &str,
    ) -> Result<Location> {
        if let Some(prior) = &record.prior_location {
            match self.validate_location(prior) {
                Ok(()) => return Ok(prior.clone()),
                Err(e) => {
                    warn!(subject = %record.subject_id, error = %e, "Prior location unusable, falling back to spawn");
                }
            }
        }
        self.world.spawn_location(current_world).ok_or_else(|| {
            Error::InvalidLocation(format!("no spawn location for world '{current_world}'"))
        })
    }

    pub fn create_zone(&self, name: &str, location: Location) -> Result<Applied<Zone>> {
        let name = ZoneName::new(name)?;
        self.validate_location(&location)?;

        let zone = Zone::new(name, location);
        self.zones.create(zone.clone())?;
        self.notify(&LifecycleEvent::ZoneCreated { zone: zone.clone() });

        Ok(Applied::new(zone, self.flush_zones()))
    }

    /// Release everyone in the zone, then remove it.
    pub fn delete_zone(&self, name: &str) -> Result<Applied<ZoneDeletion>> {
        let name = lookup_name(name)?;
        let _gate = self.zone_gate.write().unwrap_or_else(PoisonError::into_inner);
        if !self.zones.contains(&name) {
            return Err(Error::ZoneNotFound(name.to_string()));
        }

        let released = self.store.release_in_zone(&name);
        let restrictions_saved = if released.is_empty() {
            Ok(())
        } else {
            self.flush_restrictions()
        };
        let zone = self.zones.delete(&name)?;
        let zones_saved = self.flush_zones();

        for record in &released {
            self.notify(&LifecycleEvent::Released {
                record: record.clone(),
                cause: ReleaseCause::ZoneDeleted,
            });
        }
        self.notify(&LifecycleEvent::ZoneDeleted {
            zone: name,
            released: released.iter().map(|record| record.subject_id).collect(),
        });

        Ok(Applied::new(
            ZoneDeletion { zone, released },
            restrictions_saved.and(zones_saved),
        ))
    }

    pub fn zone(&self, name: &str) -> Option<Zone> {
        ZoneName::new(name).ok().and_then(|name| self.zones.get(&name))
    }

    pub fn zones(&self) -> Vec<Zone> {
        self.zones.list()
    }

    /// Confine a subject and return the zone location to move them to.
    pub fn confine(&self, request: ConfinementRequest) -> Result<Applied<Location>> {
        let gate = self.zone_gate.read().unwrap_or_else(PoisonError::into_inner);

        if self.store.is_restricted(&request.subject_id) {
            return Err(Error::AlreadyRestricted(request.subject_name));
        }
        let zone_name = lookup_name(&request.zone)?;
        let zone = self
            .zones
            .get(&zone_name)
            .ok_or_else(|| Error::ZoneNotFound(zone_name.to_string()))?;
        self.validate_location(&zone.location)?;
        if let Some(prior) = &request.current_location {
            prior.ensure_finite()?;
        }

        let record = self.store.assign(
            NewRestriction {
                subject_id: request.subject_id,
                subject_name: request.subject_name,
                zone: zone.name,
                sentence: request.sentence,
                reason: request.reason,
                issuer: request.issuer,
                prior_location: request.current_location,
            },
            self.clock.now(),
        )?;
        drop(gate);

        debug!(subject = %record.subject_id, zone = %record.zone, "Inserted restriction");
        self.notify(&LifecycleEvent::Confined { record });

        Ok(Applied::new(zone.location, self.flush_restrictions()))
    }

    fn finish_release(
        &self,
        record: Option<RestrictionRecord>,
        cause: ReleaseCause,
    ) -> Applied<Option<RestrictionRecord>> {
        match record {
            Some(record) => {
                self.notify(&LifecycleEvent::Released {
                    record: record.clone(),
                    cause,
                });
                Applied::new(Some(record), self.flush_restrictions())
            }
            None => Applied::new(None, Ok(())),
        }
    }

    /// Release by id. An unknown subject yields `None`.
    pub fn release(&self, subject: &SubjectId) -> Applied<Option<RestrictionRecord>> {
        let record = self.store.release(subject);
        self.finish_release(record, ReleaseCause::Command)
    }

    /// Release by display name, ignoring case.
    pub fn release_by_name(&self, name: &str) -> Applied<Option<RestrictionRecord>> {
        let record = self.store.release_by_name(name);
        self.finish_release(record, ReleaseCause::Command)
    }

    /// Release the subjects in a sweep batch that are still expired.
    ///
    /// Subjects released in the meantime, or whose sentence was extended, are
    /// skipped.
    pub fn release_expired(&self, batch: &[SubjectId]) -> Applied<Vec<RestrictionRecord>> {
        let now = self.clock.now();
        let released: Vec<RestrictionRecord> = batch
            .iter()
            .filter_map(|subject| self.store.release_if_expired(subject, now))
            .collect();
        if released.is_empty() {
            return Applied::new(released, Ok(()));
        }

        for record in &released {
            self.notify(&LifecycleEvent::Released {
                record: record.clone(),
                cause: ReleaseCause::Expired,
            });
        }
        Applied::new(released, self.flush_restrictions())
    }

    /// One synchronous sweep: find and release every expired record.
    pub fn sweep(&self) -> Applied<Vec<RestrictionRecord>> {
        let expired = scheduler::sweep(&self.store, self.clock.now());
        self.release_expired(&expired)
    }

    pub fn get(&self, subject: &SubjectId) -> Option<RestrictionRecord> {
        self.store.get(subject)
    }

    pub fn find_by_name(&self, name: &str) -> Option<RestrictionRecord> {
        self.store.find_by_name(name)
    }

    pub fn is_restricted(&self, subject: &SubjectId) -> bool {
        self.store.is_restricted(subject)
    }

    /// Time left for a subject, `None` if not restricted.
    pub fn remaining(&self, subject: &SubjectId) -> Option<Sentence> {
        self.store
            .get(subject)
            .map(|record| record.remaining(self.clock.now()))
    }

    pub fn restrictions(&self) -> Vec<RestrictionRecord> {
        self.store.list_all()
    }

    pub fn change_sentence(
        &self,
        subject: &SubjectId,
        change: SentenceChange,
    ) -> Result<Applied<RestrictionRecord>> {
        let record = self.store.mutate(subject, change, self.clock.now())?;
        self.notify(&LifecycleEvent::SentenceChanged {
            record: record.clone(),
            op: change,
        });
        Ok(Applied::new(record, self.flush_restrictions()))
    }

    fn presence(&self, subject: &SubjectId) -> Applied<Presence> {
        let Some(record) = self.store.get(subject) else {
            return Applied::new(Presence::Free, Ok(()));
        };

        if record.is_expired(self.clock.now()) {
            let released = self.release_expired(&[*subject]);
            let presence = released
                .value
                .into_iter()
                .next()
                .map_or(Presence::Free, Presence::Released);
            return Applied::new(presence, released.saved);
        }

        let zone = match self.zones.get(&record.zone) {
            Some(zone) => match self.validate_location(&zone.location) {
                Ok(()) => Some(zone.location),
                Err(e) => {
                    warn!(subject = %subject, zone = %record.zone, error = %e, "Zone location unusable");
                    None
                }
            },
            None => {
                warn!(subject = %subject, zone = %record.zone, "Confined to a zone that no longer exists");
                None
            }
        };
        Applied::new(Presence::Confined { record, zone }, Ok(()))
    }

    /// Check a subject entering the environment.
    pub fn on_join(&self, subject: &SubjectId) -> Applied<Presence> {
        self.presence(subject)
    }

    /// Check a subject respawning; confined subjects go back to their zone.
    pub fn on_respawn(&self, subject: &SubjectId) -> Applied<Presence> {
        self.presence(subject)
    }

    /// Flush when a confined subject leaves.
    pub fn on_quit(&self, subject: &SubjectId) -> Result<()> {
        if self.store.is_restricted(subject) {
            self.flush_restrictions()
        } else {
            Ok(())
        }
    }

    /// Refresh a stale display name. The value is whether anything changed.
    pub fn rename_subject(&self, subject: &SubjectId, name: &str) -> Applied<bool> {
        if self.store.rename(subject, name) {
            Applied::new(true, self.flush_restrictions())
        } else {
            Applied::new(false, Ok(()))
        }
    }

    /// Write both collections, reporting the first failure.
    pub fn save_all(&self) -> Result<()> {
        let zones = self.flush_zones();
        let restrictions = self.flush_restrictions();
        zones.and(restrictions)
    }

    /// Start the background sweep. Needs a release sink and a tokio runtime.
    pub async fn start(&self) -> Result<()> {
        let mut scheduler = self.scheduler.lock().await;
        self.start_locked(&mut scheduler)
    }

    fn start_locked(&self, scheduler: &mut ExpirationScheduler) -> Result<()> {
        let sink = self
            .release_sink
            .clone()
            .ok_or_else(|| Error::Scheduler("no release sink configured".to_string()))?;
        scheduler.start(Arc::clone(&self.store), Arc::clone(&self.clock), sink)
    }

    pub async fn stop(&self) {
        self.scheduler.lock().await.stop().await;
    }

    pub async fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.lock().await.state()
    }

    /// Stop the sweep, reload both collections, start the sweep again.
    ///
    /// A sweep that was running is restarted even when loading fails; the
    /// previous in-memory state is kept in that case.
    pub async fn reload(&self) -> Result<LoadSummary> {
        let mut scheduler = self.scheduler.lock().await;
        let was_running = scheduler.state() == SchedulerState::Running;
        scheduler.stop().await;

        let loaded = self.load();
        if let Err(e) = &loaded {
            error!(error = %e, "Reload failed, keeping current state");
        }
        if was_running {
            self.start_locked(&mut scheduler)?;
        }
        info!(sweep = %scheduler.state(), "Reloaded");
        loaded
    }

    /// Stop the sweep and write everything out.
    pub async fn shutdown(&self) -> Result<()> {
        self.scheduler.lock().await.stop().await;
        let saved = self.save_all();
        info!(
            zones = self.zones.len(),
            restrictions = self.store.len(),
            "Shut down"
        );
        saved
    }
}
