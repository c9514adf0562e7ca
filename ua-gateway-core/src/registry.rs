use dashmap::DashMap;
use std::{
    hash::Hash,
    ops::{Deref, DerefMut},
    sync::Arc,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

type Slot<V> = Arc<Mutex<Option<V>>>;

/// Sharded map of individually locked slots.
///
/// Work on one key is serialized by the slot mutex while other keys proceed
/// independently. A slot may be unlinked from the map while a waiter is
/// queued on it; waiters re-check after locking and retry on a fresh slot.
pub(crate) struct KeyedSlots<K, V> {
    slots: DashMap<K, Slot<V>>,
}

/// Exclusive access to one slot. Dropping it without [`KeyedSlots::release`]
/// keeps the (possibly empty) slot linked.
pub(crate) struct SlotGuard<V> {
    slot: Slot<V>,
    guard: OwnedMutexGuard<Option<V>>,
}

impl<V> Deref for SlotGuard<V> {
    type Target = Option<V>;
    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<V> DerefMut for SlotGuard<V> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl<K, V> Default for KeyedSlots<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }
}

impl<K, V> KeyedSlots<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Lock the slot for `key`, linking an empty one when absent.
    pub(crate) async fn lock(&self, key: &K) -> SlotGuard<V> {
        loop {
            let slot = Arc::clone(self.slots.entry(key.clone()).or_default().value());
            if let Some(guard) = self.lock_current(key, slot).await {
                return guard;
            }
        }
    }

    /// Lock the slot for `key` only if one is linked and occupied.
    pub(crate) async fn lock_existing(&self, key: &K) -> Option<SlotGuard<V>> {
        loop {
            let slot = self.slots.get(key).map(|s| Arc::clone(s.value()))?;
            if let Some(guard) = self.lock_current(key, slot).await {
                return guard.is_some().then_some(guard);
            }
        }
    }

    /// Release a guard, unlinking the slot when it was left empty.
    pub(crate) fn release(&self, key: &K, guard: SlotGuard<V>) {
        if guard.is_none() {
            self.slots.remove_if(key, |_, s| Arc::ptr_eq(s, &guard.slot));
        }
        drop(guard);
    }

    pub(crate) fn keys(&self) -> Vec<K> {
        self.slots.iter().map(|e| e.key().clone()).collect()
    }

    async fn lock_current(&self, key: &K, slot: Slot<V>) -> Option<SlotGuard<V>> {
        let guard = Arc::clone(&slot).lock_owned().await;
        let current = self
            .slots
            .get(key)
            .is_some_and(|s| Arc::ptr_eq(s.value(), &slot));
        current.then_some(SlotGuard { slot, guard })
    }
}
