use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard},
};

use log::warn;
use serde::Serialize;

/// Default number of [Fix]es retained
pub const DEFAULT_CAPACITY: usize = 300;

/// Longest accepted coordinate text
const MAX_COORD_LEN: usize = 15;

/// One decoded position, in decimal degrees
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fix {
    pub latitude: String,
    pub longitude: String,
}

impl std::fmt::Display for Fix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.latitude, self.longitude)
    }
}

impl Fix {
    /// Builds a [Fix] from its textual coordinates, truncated to
    /// their bounded length.
    pub fn new(latitude: &str, longitude: &str) -> Self {
        Self {
            latitude: bounded(latitude),
            longitude: bounded(longitude),
        }
    }

    /// Builds a [Fix] from decimal degrees, using five decimals.
    pub fn from_degrees(latitude: f64, longitude: f64) -> Self {
        Self::new(&format!("{:.5}", latitude), &format!("{:.5}", longitude))
    }
}

fn bounded(coord: &str) -> String {
    coord.chars().take(MAX_COORD_LEN).collect()
}

#[derive(Debug)]
struct Ring {
    fixes: VecDeque<Fix>,
    latest: Option<Fix>,
}

/// Bounded, overwrite-oldest history of recent [Fix]es.
///
/// Mutation is serialized by a lock of its own, which is never held
/// across modem I/O.
#[derive(Debug)]
pub struct PositionStore {
    capacity: usize,
    ring: Mutex<Ring>,
}

impl Default for PositionStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl PositionStore {
    /// Builds a new [PositionStore]. A null capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            ring: Mutex::new(Ring {
                fixes: VecDeque::with_capacity(capacity),
                latest: None,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().fixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        // a panicking holder cannot leave the ring half-mutated
        self.ring.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stores a new [Fix], evicting the oldest one when full.
    /// Returns the evicted [Fix], if any.
    pub fn push(&self, fix: Fix) -> Option<Fix> {
        let mut ring = self.lock();

        let evicted = if ring.fixes.len() == self.capacity {
            ring.fixes.pop_front()
        } else {
            None
        };

        if let Some(oldest) = &evicted {
            warn!("position history is full, dropped {}", oldest);
        }

        ring.latest = Some(fix.clone());
        ring.fixes.push_back(fix);
        evicted
    }

    /// Removes up to `n` entries, earliest first.
    pub fn pop_recent(&self, n: usize) -> Vec<Fix> {
        let mut ring = self.lock();
        let n = n.min(ring.fixes.len());
        ring.fixes.drain(..n).collect()
    }

    /// Returns the most recently pushed [Fix], if any was ever pushed.
    /// Draining the history does not affect this.
    pub fn latest(&self) -> Option<Fix> {
        self.lock().latest.clone()
    }
}
