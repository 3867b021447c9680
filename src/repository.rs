//! Observation repository.
//!
//! The checks read their input from a time-indexed repository of local and
//! remote records. This module defines the [`ObservationRepository`] trait that
//! the checks depend on, the [`TimeEntry`] snapshot it returns, and
//! [`MemoryRepository`], a simple in-memory implementation with a bounded
//! history window.

use crate::time::TimeKey;
use crate::types::{GnssObservables, MeasuredRange, NodeId, PositionVelocity};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// Records held for one node at one time.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeRecord {
    observables: Option<GnssObservables>,
    range: Option<MeasuredRange>,
    position_velocity: Option<PositionVelocity>,
}

impl NodeRecord {
    /// Returns the record of type `T`, if present.
    pub fn data<T: EntryData>(&self) -> Option<&T> {
        T::get(self)
    }

    /// Stores a record of type `T`, replacing any previous one.
    pub fn set<T: EntryData>(&mut self, data: T) {
        data.set(self)
    }
}

/// Data kinds that can be stored in a [`NodeRecord`].
pub trait EntryData: Sized {
    /// Borrows the stored value of this kind.
    fn get(record: &NodeRecord) -> Option<&Self>;
    /// Stores `self` in the record.
    fn set(self, record: &mut NodeRecord);
}

macro_rules! impl_entry_data {
    ($t: ty, $field: ident) => {
        impl EntryData for $t {
            fn get(record: &NodeRecord) -> Option<&Self> {
                record.$field.as_ref()
            }

            fn set(self, record: &mut NodeRecord) {
                record.$field = Some(self);
            }
        }
    };
}

impl_entry_data!(GnssObservables, observables);
impl_entry_data!(MeasuredRange, range);
impl_entry_data!(PositionVelocity, position_velocity);

/// Repository entry for one time of week.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimeEntry {
    /// Key of this entry.
    pub time_of_week: TimeKey,
    /// Local node data.
    pub local: NodeRecord,
    /// Peer node data, ordered by node identifier.
    pub remote: BTreeMap<NodeId, NodeRecord>,
}

/// Time-indexed observation store.
///
/// Implementations must return a fully formed snapshot: a lookup racing with
/// a writer sees the entry either before or after the write, never a partial
/// one.
pub trait ObservationRepository: Send + Sync {
    /// Returns a snapshot of the entry stored under `key`.
    fn entry(&self, key: TimeKey) -> Option<TimeEntry>;
}

/// Default history window of [`MemoryRepository`], in seconds.
pub const DEFAULT_HISTORY_SECONDS: TimeKey = 10;

/// In-memory observation repository.
///
/// Entries are evicted once they are older than the history window, measured
/// from the newest key stored.
#[derive(Debug)]
pub struct MemoryRepository {
    entries: Mutex<BTreeMap<TimeKey, TimeEntry>>,
    history_seconds: TimeKey,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SECONDS)
    }
}

impl MemoryRepository {
    /// Creates an empty repository keeping `history_seconds` of data.
    pub fn new(history_seconds: TimeKey) -> MemoryRepository {
        MemoryRepository {
            entries: Mutex::new(BTreeMap::new()),
            history_seconds,
        }
    }

    /// Stores local data under `key`.
    pub fn add_local<T: EntryData>(&self, key: TimeKey, data: T) {
        log::trace!("storing local data for key {}", key);
        self.update(key, |entry| entry.local.set(data));
    }

    /// Stores data from peer `node` under `key`.
    pub fn add_remote<T: EntryData>(&self, key: TimeKey, node: &str, data: T) {
        log::trace!("storing remote data from {} for key {}", node, key);
        self.update(key, |entry| {
            entry.remote.entry(node.to_owned()).or_default().set(data)
        });
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn update(&self, key: TimeKey, f: impl FnOnce(&mut TimeEntry)) {
        let mut entries = self.lock();
        let entry = entries.entry(key).or_insert_with(|| TimeEntry {
            time_of_week: key,
            ..Default::default()
        });
        f(entry);
        if let Some(&newest) = entries.keys().next_back() {
            let oldest_kept = newest - self.history_seconds;
            let kept = entries.split_off(&oldest_kept);
            let evicted = core::mem::replace(&mut *entries, kept);
            if !evicted.is_empty() {
                log::trace!(
                    "evicted {} entries older than key {}",
                    evicted.len(),
                    oldest_kept
                );
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<TimeKey, TimeEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ObservationRepository for MemoryRepository {
    fn entry(&self, key: TimeKey) -> Option<TimeEntry> {
        self.lock().get(&key).cloned()
    }
}
