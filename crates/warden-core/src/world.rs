//! Host environment queries used for location validation

use std::fmt;

use crate::zone::Location;

/// Read-only view of the host's worlds
///
/// The core only asks questions; moving a subject is the caller's job.
pub trait World: Send + Sync + fmt::Debug {
    fn world_exists(&self, world: &str) -> bool;

    /// Load the region around `(x, z)` or make it loadable. False if it cannot be.
    fn ensure_region_loaded(&self, world: &str, x: f64, z: f64) -> bool;

    fn spawn_location(&self, world: &str) -> Option<Location>;
}

/// Every world exists, every region loads, spawn is the origin
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenWorld;

impl World for OpenWorld {
    fn world_exists(&self, _world: &str) -> bool {
        true
    }

    fn ensure_region_loaded(&self, _world: &str, _x: f64, _z: f64) -> bool {
        true
    }

    fn spawn_location(&self, world: &str) -> Option<Location> {
        Some(Location::new(world, 0.0, 0.0, 0.0))
    }
}
