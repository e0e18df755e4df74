//! Durable storage for zones and restrictions
//!
//! Each collection is one JSON document, `{"version": 1, "entries": [...]}`,
//! replaced wholesale on save. Writes go to a sibling temporary file which is
//! then renamed over the target while an exclusive `fs2` lock on
//! `.warden.lock` is held, so a crash mid-write leaves the previous document
//! intact.

use std::{
    collections::HashSet,
    fmt,
    fs::File,
    hash::Hash,
    io::Write,
    path::{Path, PathBuf},
};

use fs2::FileExt;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::{record::RestrictionRecord, zone::Zone, Error, Result};

pub const ZONES_FILE: &str = "zones.json";
pub const RESTRICTIONS_FILE: &str = "restrictions.json";
const LOCK_FILE: &str = ".warden.lock";
const FORMAT_VERSION: u32 = 1;

/// Load and full-replace save of both collections
pub trait Persistence: Send + Sync + fmt::Debug {
    fn load_zones(&self) -> Result<Vec<Zone>>;
    fn save_zones(&self, zones: &[Zone]) -> Result<()>;
    fn load_restrictions(&self) -> Result<Vec<RestrictionRecord>>;
    fn save_restrictions(&self, records: &[RestrictionRecord]) -> Result<()>;
}

#[derive(Serialize)]
struct DocumentRef<'a, T> {
    version: u32,
    entries: &'a [T],
}

#[derive(Deserialize)]
struct RawDocument {
    #[serde(default)]
    version: Option<u32>,
    #[serde(default)]
    entries: Vec<serde_json::Value>,
}

/// JSON documents in a data directory
#[derive(Debug, Clone)]
pub struct JsonFileGateway {
    dir: PathBuf,
}

impl JsonFileGateway {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock(&self) -> Result<File> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            Error::Persistence(format!(
                "Failed to create data directory {}: {e}",
                self.dir.display()
            ))
        })?;

        let lock_file = File::options()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.dir.join(LOCK_FILE))
            .map_err(|e| Error::Persistence(format!("Failed to create lock file: {e}")))?;

        lock_file
            .lock_exclusive()
            .map_err(|e| Error::Persistence(format!("Failed to acquire data lock: {e}")))?;

        Ok(lock_file)
    }

    fn save<T: Serialize>(&self, file_name: &str, entries: &[T]) -> Result<()> {
        let document = DocumentRef {
            version: FORMAT_VERSION,
            entries,
        };
        let json = serde_json::to_vec_pretty(&document)
            .map_err(|e| Error::Persistence(format!("Failed to encode {file_name}: {e}")))?;

        // released when dropped
        let _lock = self.lock()?;
        let target = self.dir.join(file_name);

        let mut staged = NamedTempFile::new_in(&self.dir)
            .map_err(|e| Error::Persistence(format!("Failed to stage {file_name}: {e}")))?;
        staged
            .write_all(&json)
            .and_then(|()| staged.as_file().sync_all())
            .map_err(|e| Error::Persistence(format!("Failed to write {file_name}: {e}")))?;
        staged
            .persist(&target)
            .map_err(|e| Error::Persistence(format!("Failed to replace {file_name}: {}", e.error)))?;

        debug!(file = %target.display(), entries = entries.len(), "Saved collection");
        Ok(())
    }

    fn load<T, K, F>(&self, file_name: &str, key: F) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        K: Eq + Hash + fmt::Display,
        F: Fn(&T) -> K,
    {
        let path = self.dir.join(file_name);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::Persistence(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )))
            }
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let document: RawDocument = serde_json::from_str(&content).map_err(|e| {
            Error::Persistence(format!("Failed to parse {}: {e}", path.display()))
        })?;
        if let Some(version) = document.version.filter(|v| *v != FORMAT_VERSION) {
            warn!(file = %path.display(), version, "Unknown collection version, reading anyway");
        }

        let mut seen = HashSet::new();
        let entries = document
            .entries
            .into_iter()
            .enumerate()
            .filter_map(|(index, raw)| match serde_json::from_value::<T>(raw) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(file = %file_name, index, error = %e, "Skipping malformed entry");
                    None
                }
            })
            .filter(|entry| {
                let id = key(entry);
                let fresh = !seen.contains(&id);
                if fresh {
                    seen.insert(id);
                } else {
                    warn!(file = %file_name, key = %id, "Skipping duplicate entry");
                }
                fresh
            })
            .collect();

        Ok(entries)
    }
}

impl Persistence for JsonFileGateway {
    fn load_zones(&self) -> Result<Vec<Zone>> {
        self.load(ZONES_FILE, |zone: &Zone| zone.name.clone())
    }

    fn save_zones(&self, zones: &[Zone]) -> Result<()> {
        self.save(ZONES_FILE, zones)
    }

    fn load_restrictions(&self) -> Result<Vec<RestrictionRecord>> {
        self.load(RESTRICTIONS_FILE, |record: &RestrictionRecord| record.subject_id)
    }

    fn save_restrictions(&self, records: &[RestrictionRecord]) -> Result<()> {
        self.save(RESTRICTIONS_FILE, records)
    }
}
