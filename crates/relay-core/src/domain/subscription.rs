//! SubscriptionIndex: which observer connections watch which devices.
//!
//! The relation is many-to-many, so it is stored twice: device → observers
//! for fan-out (the hot path, one lookup per frame) and observer → devices so
//! an observer's disconnect can be cleaned up without scanning every device.
//!
//! An observer can also watch *every* device (the broadcast fan-out mode).
//! Those observers sit in a separate set that [`SubscriptionIndex::watchers_of`]
//! merges into every answer, so routing asks the same question either way.

use std::collections::{HashMap, HashSet};

use super::ids::{ConnectionId, DeviceId};

#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    by_device: HashMap<DeviceId, HashSet<ConnectionId>>,
    by_observer: HashMap<ConnectionId, HashSet<DeviceId>>,
    everything: HashSet<ConnectionId>,
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a watch.  Returns `false` if it already existed.
    pub fn watch(&mut self, observer: ConnectionId, device_id: DeviceId) -> bool {
        let added = self
            .by_observer
            .entry(observer)
            .or_default()
            .insert(device_id.clone());
        if added {
            self.by_device.entry(device_id).or_default().insert(observer);
        }
        added
    }

    /// Removes a single watch.  Returns `false` if it did not exist.
    pub fn unwatch(&mut self, observer: ConnectionId, device_id: &DeviceId) -> bool {
        let removed = match self.by_observer.get_mut(&observer) {
            Some(devices) => {
                let removed = devices.remove(device_id);
                if devices.is_empty() {
                    self.by_observer.remove(&observer);
                }
                removed
            }
            None => false,
        };
        if removed {
            self.drop_watcher(device_id, observer);
        }
        removed
    }

    /// Makes `observer` a watcher of every device, present and future.
    /// Returns `false` if it already was.
    pub fn watch_everything(&mut self, observer: ConnectionId) -> bool {
        self.everything.insert(observer)
    }

    /// Removes every watch held by `observer`, including a watch on
    /// everything, and returns the devices it was watching by name.  Calling
    /// it again is a no-op.
    pub fn unwatch_all(&mut self, observer: ConnectionId) -> Vec<DeviceId> {
        self.everything.remove(&observer);
        let mut devices: Vec<DeviceId> = self
            .by_observer
            .remove(&observer)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        devices.sort();
        for device_id in &devices {
            self.drop_watcher(device_id, observer);
        }
        devices
    }

    /// Returns the observers watching `device_id`; empty if nobody is.
    /// Each observer appears once even if it watches both by name and
    /// everything.
    pub fn watchers_of(&self, device_id: &DeviceId) -> Vec<ConnectionId> {
        let named = self.by_device.get(device_id);
        if self.everything.is_empty() {
            return named
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default();
        }
        let mut watchers: HashSet<ConnectionId> = self.everything.clone();
        if let Some(set) = named {
            watchers.extend(set.iter().copied());
        }
        watchers.into_iter().collect()
    }

    pub fn is_watched(&self, device_id: &DeviceId) -> bool {
        self.by_device.contains_key(device_id)
    }

    /// Every device with at least one watcher by name.
    ///
    /// Watching everything does not count: it would keep every Offline
    /// session alive forever.
    pub fn watched_devices(&self) -> HashSet<DeviceId> {
        self.by_device.keys().cloned().collect()
    }

    /// Number of (observer, device) pairs plus watch-everything observers.
    pub fn len(&self) -> usize {
        self.by_observer.values().map(HashSet::len).sum::<usize>() + self.everything.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_observer.is_empty() && self.everything.is_empty()
    }

    fn drop_watcher(&mut self, device_id: &DeviceId, observer: ConnectionId) {
        if let Some(watchers) = self.by_device.get_mut(device_id) {
            watchers.remove(&observer);
            if watchers.is_empty() {
                self.by_device.remove(device_id);
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
