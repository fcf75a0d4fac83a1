use crate::subscription::Subscription;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// Initial slot-array capacity for a fresh key.
const DEFAULT_SLOTS: usize = 2;
/// A full array grows to `len * GROWTH_MULTIPLIER + GROWTH_BUFFER` slots.
const GROWTH_MULTIPLIER: usize = 2;
const GROWTH_BUFFER: usize = 20;

type Slot = RwLock<Option<Arc<Subscription>>>;

/// Fixed-length array of subscriber slots for one index key.
///
/// Readers traverse the slots without any array-wide lock; that makes the
/// fan-out hot path cheap against rare register/unregister traffic. Writers
/// scan optimistically, then re-check under the array's monitor before
/// mutating a slot. Arrays never shrink: removal nulls a slot, and a full
/// array is replaced wholesale by a larger copy (see `Index::insert`).
/// A publisher that grabbed the array before such a replacement keeps
/// iterating the superseded one and will not see subscribers placed only in
/// the extension; registrants may miss broadcasts in flight during their own
/// registration.
pub(crate) struct SlotArray {
    slots: Vec<Slot>,
    monitor: Mutex<()>,
}

impl SlotArray {
    /// Fresh array of `DEFAULT_SLOTS` with `subscription` in slot 0.
    fn with_first(subscription: &Arc<Subscription>) -> Self {
        let array = Self::empty(DEFAULT_SLOTS);
        *array.slots[0].write() = Some(Arc::clone(subscription));
        array
    }

    fn empty(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| RwLock::new(None)).collect(),
            monitor: Mutex::new(()),
        }
    }

    /// Claim the first empty slot for `subscription`. Returns false when the
    /// array has no hole left.
    fn claim(&self, subscription: &Arc<Subscription>) -> bool {
        // optimistic scan keeps full arrays off the monitor
        if !self.slots.iter().any(|slot| slot.read().is_none()) {
            return false;
        }
        let _monitor = self.monitor.lock();
        for slot in &self.slots {
            let mut slot = slot.write();
            if slot.is_none() {
                *slot = Some(Arc::clone(subscription));
                return true;
            }
        }
        false
    }

    /// Null the slot holding exactly `subscription`. Missing references are
    /// not an error.
    fn clear(&self, subscription: &Arc<Subscription>) {
        let _monitor = self.monitor.lock();
        for slot in &self.slots {
            let mut slot = slot.write();
            if slot
                .as_ref()
                .is_some_and(|held| Arc::ptr_eq(held, subscription))
            {
                *slot = None;
                return;
            }
        }
    }

    /// Larger copy of this array with `subscription` in the first slot past
    /// the copied region. Tombstone holes keep their positions.
    fn grown_with(&self, subscription: &Arc<Subscription>) -> Self {
        let array = Self::empty(self.slots.len() * GROWTH_MULTIPLIER + GROWTH_BUFFER);
        for (i, slot) in self.slots.iter().enumerate() {
            *array.slots[i].write() = slot.read().clone();
        }
        *array.slots[self.slots.len()].write() = Some(Arc::clone(subscription));
        array
    }

    /// Snapshot of the live subscriptions, in slot order.
    pub(crate) fn live(&self) -> Vec<Arc<Subscription>> {
        self.slots
            .iter()
            .filter_map(|slot| slot.read().clone())
            .collect()
    }

    pub(crate) fn live_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.read().is_some()).count()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

/// One concurrent map from key to subscriber slot array.
pub(crate) struct Index {
    map: DashMap<String, Arc<SlotArray>>,
}

impl Index {
    fn new() -> Self {
        Self { map: DashMap::new() }
    }

    /// Place `subscription` under `key`. Empty keys are skipped.
    ///
    /// Fresh keys get a default-sized array, installed only if the key was
    /// still absent. Existing arrays are claimed slot-by-slot; a full array
    /// is regrown and swapped in only while the map entry still holds the
    /// array the growth started from, retrying against the current array
    /// otherwise. Readers never observe a partially populated replacement:
    /// the grown array is complete before it is installed.
    pub(crate) fn insert(&self, key: &str, subscription: &Arc<Subscription>) {
        if key.is_empty() {
            return;
        }
        loop {
            let observed = match self.map.entry(key.to_string()) {
                Entry::Vacant(entry) => {
                    entry.insert(Arc::new(SlotArray::with_first(subscription)));
                    return;
                }
                Entry::Occupied(entry) => Arc::clone(entry.get()),
            };

            if observed.claim(subscription) {
                return;
            }

            let grown = Arc::new(observed.grown_with(subscription));
            match self.map.entry(key.to_string()) {
                Entry::Occupied(mut entry) if Arc::ptr_eq(entry.get(), &observed) => {
                    entry.insert(grown);
                    return;
                }
                // another writer swapped the array first
                _ => continue,
            }
        }
    }

    /// Remove `subscription` from the array under `key`. Empty or unknown
    /// keys and missing references are not an error. The key's entry stays
    /// even when its last slot empties.
    pub(crate) fn remove(&self, key: &str, subscription: &Arc<Subscription>) {
        if key.is_empty() {
            return;
        }
        if let Some(array) = self.get(key) {
            array.clear(subscription);
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<Arc<SlotArray>> {
        self.map.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn live(&self) -> Vec<Arc<Subscription>> {
        self.map
            .iter()
            .flat_map(|entry| entry.value().live())
            .collect()
    }
}

/// The five-way subscription registry: one index per addressing dimension.
/// A subscription is registered in every index its identity has a non-empty
/// key for, and removed from all of them on unregistration; the caller holds
/// the subscription's registration monitor around both transitions.
pub(crate) struct Registry {
    pub(crate) by_sub_id: Index,
    pub(crate) by_channel: Index,
    pub(crate) by_user_id: Index,
    pub(crate) by_user_name: Index,
    pub(crate) by_session: Index,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            by_sub_id: Index::new(),
            by_channel: Index::new(),
            by_user_id: Index::new(),
            by_user_name: Index::new(),
            by_session: Index::new(),
        }
    }

    pub(crate) fn insert_all(&self, subscription: &Arc<Subscription>) {
        self.by_sub_id.insert(subscription.id(), subscription);
        self.by_channel.insert(subscription.channel(), subscription);
        self.by_user_id.insert(subscription.user_id(), subscription);
        self.by_user_name.insert(subscription.user_name(), subscription);
        self.by_session.insert(subscription.session_id(), subscription);
    }

    pub(crate) fn remove_all(&self, subscription: &Arc<Subscription>) {
        self.by_sub_id.remove(subscription.id(), subscription);
        self.by_channel.remove(subscription.channel(), subscription);
        self.by_user_id.remove(subscription.user_id(), subscription);
        self.by_user_name.remove(subscription.user_name(), subscription);
        self.by_session.remove(subscription.session_id(), subscription);
    }

    /// Administrative lookup by subscription id.
    pub(crate) fn get(&self, id: &str) -> Option<Arc<Subscription>> {
        self.by_sub_id
            .get(id)
            .and_then(|array| array.live().into_iter().next())
    }

    /// Every live subscription, one entry per subscription.
    pub(crate) fn all(&self) -> Vec<Arc<Subscription>> {
        self.by_sub_id.live()
    }

    /// Metadata of every live subscription, optionally filtered by channel
    /// equality.
    pub(crate) fn snapshot(&self, channel: Option<&str>) -> Vec<HashMap<String, String>> {
        self.all()
            .into_iter()
            .filter(|subscription| channel.is_none_or(|c| subscription.channel() == c))
            .map(|subscription| subscription.meta())
            .collect()
    }
}
