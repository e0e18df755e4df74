//! Active restriction store
//!
//! Subject id to [`RestrictionRecord`]. Every operation takes the lock once,
//! so a single subject's check-and-write is atomic and aggregate reads see
//! whole mutations only. Snapshots are structural-sharing clones of an
//! `im::HashMap`, taken in O(1) under a read lock.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{
    record::{NewRestriction, RestrictionRecord, SubjectId},
    sentence::SentenceChange,
    zone::ZoneName,
    Error, Result,
};

#[derive(Debug, Default)]
pub struct RestrictionStore {
    records: RwLock<im::HashMap<SubjectId, RestrictionRecord>>,
}

impl RestrictionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, im::HashMap<SubjectId, RestrictionRecord>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, im::HashMap<SubjectId, RestrictionRecord>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a record starting at `now` unless the subject already has one.
    pub fn assign(&self, new: NewRestriction, now: i64) -> Result<RestrictionRecord> {
        let mut records = self.write();
        if let Some(existing) = records.get(&new.subject_id) {
            return Err(Error::AlreadyRestricted(existing.subject_name.clone()));
        }
        let record = new.into_record(now);
        records.insert(record.subject_id, record.clone());
        Ok(record)
    }

    /// Remove and return the subject's record. Absent is not an error.
    pub fn release(&self, subject: &SubjectId) -> Option<RestrictionRecord> {
        self.write().remove(subject)
    }

    /// Remove by display name, compared case-insensitively.
    pub fn release_by_name(&self, name: &str) -> Option<RestrictionRecord> {
        let wanted = name.trim().to_lowercase();
        let mut records = self.write();
        let subject = records
            .values()
            .find(|record| record.subject_name.to_lowercase() == wanted)
            .map(|record| record.subject_id)?;
        records.remove(&subject)
    }

    /// Remove the record only if it is still expired at `now`.
    pub fn release_if_expired(&self, subject: &SubjectId, now: i64) -> Option<RestrictionRecord> {
        let mut records = self.write();
        if records.get(subject)?.is_expired(now) {
            records.remove(subject)
        } else {
            None
        }
    }

    /// Remove every record confined to `zone`.
    pub fn release_in_zone(&self, zone: &ZoneName) -> Vec<RestrictionRecord> {
        let mut records = self.write();
        let mut subjects: Vec<SubjectId> = records
            .values()
            .filter(|record| &record.zone == zone)
            .map(|record| record.subject_id)
            .collect();
        subjects.sort();
        subjects
            .iter()
            .filter_map(|subject| records.remove(subject))
            .collect()
    }

    pub fn get(&self, subject: &SubjectId) -> Option<RestrictionRecord> {
        self.read().get(subject).cloned()
    }

    /// Case-insensitive lookup by display name.
    pub fn find_by_name(&self, name: &str) -> Option<RestrictionRecord> {
        let wanted = name.trim().to_lowercase();
        self.read()
            .values()
            .find(|record| record.subject_name.to_lowercase() == wanted)
            .cloned()
    }

    pub fn is_restricted(&self, subject: &SubjectId) -> bool {
        self.read().contains_key(subject)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point-in-time copy of every record, ordered by subject id.
    pub fn list_all(&self) -> Vec<RestrictionRecord> {
        let snapshot = self.read().clone();
        let mut records: Vec<RestrictionRecord> =
            snapshot.into_iter().map(|(_, record)| record).collect();
        records.sort_by(|a, b| a.subject_id.cmp(&b.subject_id));
        records
    }

    /// Subjects whose bounded sentence has run out at `now`.
    pub fn expired(&self, now: i64) -> Vec<SubjectId> {
        let snapshot = self.read().clone();
        let mut expired: Vec<SubjectId> = snapshot
            .values()
            .filter(|record| record.is_expired(now))
            .map(|record| record.subject_id)
            .collect();
        expired.sort();
        expired
    }

    /// Apply a sentence change. `Set` restarts the clock at `now`.
    pub fn mutate(
        &self,
        subject: &SubjectId,
        change: SentenceChange,
        now: i64,
    ) -> Result<RestrictionRecord> {
        let mut records = self.write();
        let record = records
            .get_mut(subject)
            .ok_or_else(|| Error::NotRestricted(subject.to_string()))?;
        record.sentence = change.apply(record.sentence);
        if change.restarts_clock() {
            record.start_time = now;
        }
        Ok(record.clone())
    }

    /// Refresh the stored display name. Returns true if it changed.
    pub fn rename(&self, subject: &SubjectId, name: &str) -> bool {
        let mut records = self.write();
        match records.get_mut(subject) {
            Some(record) if record.subject_name != name => {
                record.subject_name = name.to_string();
                true
            }
            _ => false,
        }
    }

    /// Replace the whole store. Later duplicates of a subject are dropped.
    pub fn load(&self, records: Vec<RestrictionRecord>) {
        let fresh = records
            .into_iter()
            .fold(im::HashMap::new(), |mut acc, record| {
                if !acc.contains_key(&record.subject_id) {
                    acc.insert(record.subject_id, record);
                }
                acc
            });
        *self.write() = fresh;
    }

    pub fn dump(&self) -> Vec<RestrictionRecord> {
        self.list_all()
    }
}
