//! Confinement zones and the registry that owns them

use std::{
    fmt,
    sync::{PoisonError, RwLock},
};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const MAX_NAME_LEN: usize = 64;

/// A point in a world with orientation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
}

impl Location {
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
            yaw: 0.0,
            pitch: 0.0,
        }
    }

    #[must_use]
    pub const fn with_orientation(mut self, yaw: f32, pitch: f32) -> Self {
        self.yaw = yaw;
        self.pitch = pitch;
        self
    }

    /// Rejects NaN and infinite components, which JSON cannot represent.
    pub fn ensure_finite(&self) -> Result<()> {
        let finite = [self.x, self.y, self.z].iter().all(|v| v.is_finite())
            && self.yaw.is_finite()
            && self.pitch.is_finite();
        if finite {
            Ok(())
        } else {
            Err(Error::InvalidLocation(format!(
                "non-finite coordinate in {self}"
            )))
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:.1}, {:.1}, {:.1})",
            self.world, self.x, self.y, self.z
        )
    }
}

/// Case-folded zone name
///
/// Two names that differ only by letter case are the same zone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ZoneName(String);

impl ZoneName {
    /// Validate and case-fold a zone name.
    pub fn new(name: &str) -> Result<Self> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidName("zone name cannot be empty".to_string()));
        }
        if trimmed.chars().count() > MAX_NAME_LEN {
            return Err(Error::InvalidName(format!(
                "zone name must be at most {MAX_NAME_LEN} characters: {trimmed}"
            )));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(Error::InvalidName(format!(
                "zone name cannot contain whitespace: {trimmed}"
            )));
        }
        Ok(Self(trimmed.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ZoneName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ZoneName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<ZoneName> for String {
    fn from(name: ZoneName) -> Self {
        name.0
    }
}

impl std::str::FromStr for ZoneName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Named confinement target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub name: ZoneName,
    #[serde(flatten)]
    pub location: Location,
}

impl Zone {
    pub const fn new(name: ZoneName, location: Location) -> Self {
        Self { name, location }
    }

    pub fn set_location(&mut self, location: Location) {
        self.location = location;
    }
}

/// Zone name to zone mapping
///
/// Reads clone an `im::HashMap` snapshot out from under a short read lock, so
/// listing never holds the lock while callers iterate.
#[derive(Debug, Default)]
pub struct ZoneRegistry {
    zones: RwLock<im::HashMap<ZoneName, Zone>>,
}

impl ZoneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a zone unless one with the same folded name exists.
    pub fn create(&self, zone: Zone) -> Result<()> {
        let mut zones = self.zones.write().unwrap_or_else(PoisonError::into_inner);
        if zones.contains_key(&zone.name) {
            return Err(Error::ZoneExists(zone.name.to_string()));
        }
        zones.insert(zone.name.clone(), zone);
        Ok(())
    }

    pub fn delete(&self, name: &ZoneName) -> Result<Zone> {
        self.zones
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .ok_or_else(|| Error::ZoneNotFound(name.to_string()))
    }

    pub fn get(&self, name: &ZoneName) -> Option<Zone> {
        self.zones
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &ZoneName) -> bool {
        self.zones
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.zones.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point-in-time copy of every zone, ordered by name.
    pub fn list(&self) -> Vec<Zone> {
        let snapshot = self.zones.read().unwrap_or_else(PoisonError::into_inner).clone();
        let mut zones: Vec<Zone> = snapshot.into_iter().map(|(_, zone)| zone).collect();
        zones.sort_by(|a, b| a.name.cmp(&b.name));
        zones
    }

    /// Replace the whole registry. Later duplicates of a name are dropped.
    pub fn load(&self, zones: Vec<Zone>) {
        let fresh = zones.into_iter().fold(im::HashMap::new(), |mut acc, zone| {
            if !acc.contains_key(&zone.name) {
                acc.insert(zone.name.clone(), zone);
            }
            acc
        });
        *self.zones.write().unwrap_or_else(PoisonError::into_inner) = fresh;
    }

    pub fn dump(&self) -> Vec<Zone> {
        self.list()
    }
}
