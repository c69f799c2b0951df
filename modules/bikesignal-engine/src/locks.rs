//! In-process keyed locks.
//!
//! Report creation locks the geohash cell of the report plus its eight
//! neighbours, so two reports close enough to match each other never run
//! the match→create sequence at the same time. Recomputation locks the
//! cluster id. Keys are always acquired in sorted order.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use bikesignal_common::{GeoPoint, SignalResult};

/// Held locks; released on drop.
#[must_use = "locks are released as soon as the guard is dropped"]
pub struct LockSet<K> {
    keys: Vec<K>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl<K> LockSet<K> {
    pub fn keys(&self) -> &[K] {
        &self.keys
    }
}

pub struct KeyedLocks<K> {
    slots: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Ord + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every key in `keys`, sorted and deduplicated first so that
    /// overlapping acquisitions cannot deadlock.
    pub async fn acquire(&self, keys: impl IntoIterator<Item = K>) -> LockSet<K> {
        let mut keys: Vec<K> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let slots: Vec<Arc<AsyncMutex<()>>> = {
            let mut map = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            // Drop idle slots: only the map itself holds them.
            map.retain(|_, slot| Arc::strong_count(slot) > 1);
            keys.iter()
                .map(|key| map.entry(key.clone()).or_default().clone())
                .collect()
        };

        let mut guards = Vec::with_capacity(slots.len());
        for slot in slots {
            guards.push(slot.lock_owned().await);
        }
        LockSet {
            keys,
            _guards: guards,
        }
    }

    /// Number of slots currently tracked.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The geohash cell containing `point` plus its eight neighbours.
pub fn cell_neighbourhood(point: GeoPoint, precision: usize) -> SignalResult<Vec<String>> {
    let cell = geohash::encode(
        geohash::Coord {
            x: point.lng,
            y: point.lat,
        },
        precision,
    )
    .with_context(|| format!("geohash encode failed for ({}, {})", point.lat, point.lng))?;
    let n = geohash::neighbors(&cell)
        .with_context(|| format!("geohash neighbours failed for {cell}"))?;

    Ok(vec![cell, n.n, n.ne, n.e, n.se, n.s, n.sw, n.w, n.nw])
}
