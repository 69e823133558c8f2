use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

/// Slot count at which idle slots are first swept.
const MIN_PRUNE_AT: usize = 1024;

/// One async mutex per key, created on first use. Holders of different keys
/// never contend; holders of the same key are served in FIFO order.
///
/// Once the map reaches `prune_at` slots, every slot nobody holds or waits on
/// is dropped and the threshold moves to twice what survived. A dropped slot
/// comes back as `T::default()`, so `T` must only cache state it can rebuild.
pub struct KeyedLocks<T> {
    slots: Mutex<Slots<T>>,
}

struct Slots<T> {
    map: HashMap<Uuid, Arc<Mutex<T>>>,
    prune_at: usize,
    floor: usize,
}

impl<T: Default> KeyedLocks<T> {
    pub fn new() -> Self {
        Self::with_prune_threshold(MIN_PRUNE_AT)
    }

    fn with_prune_threshold(prune_at: usize) -> Self {
        Self {
            slots: Mutex::new(Slots {
                map: HashMap::new(),
                prune_at,
                floor: prune_at,
            }),
        }
    }

    pub async fn lock(&self, key: Uuid) -> OwnedMutexGuard<T> {
        let slot = {
            let mut slots = self.slots.lock().await;
            if slots.map.len() >= slots.prune_at {
                slots.prune();
            }
            slots.map.entry(key).or_default().clone()
        };
        slot.lock_owned().await
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.slots.lock().await.map.len()
    }
}

impl<T> Slots<T> {
    fn prune(&mut self) {
        let before = self.map.len();
        // The map's own reference is the only one left on an idle slot.
        self.map.retain(|_, slot| Arc::strong_count(slot) > 1);
        self.prune_at = (self.map.len() * 2).max(self.floor);
        debug!("Pruned {} idle lock slots, {} in use", before - self.map.len(), self.map.len());
    }
}

impl<T: Default> Default for KeyedLocks<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::<u32>::new());
        let key = Uuid::new_v4();

        let mut guard = locks.lock(key).await;
        *guard += 1;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let mut guard = locks.lock(key).await;
                *guard += 1;
                *guard
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());
        drop(guard);
        assert_eq!(contender.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn idle_slots_are_pruned_and_held_ones_survive() {
        let locks = Arc::new(KeyedLocks::<u32>::with_prune_threshold(4));
        let held_key = Uuid::new_v4();
        let mut held = locks.lock(held_key).await;
        *held = 7;

        for _ in 0..3 {
            drop(locks.lock(Uuid::new_v4()).await);
        }
        assert_eq!(locks.len().await, 4);

        // The next new key triggers a sweep: only the held slot remains.
        let _fresh = locks.lock(Uuid::new_v4()).await;
        assert_eq!(locks.len().await, 2);

        // The surviving slot is the same mutex, still exclusive.
        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move { *locks.lock(held_key).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());
        drop(held);
        assert_eq!(contender.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLocks::<()>::new();
        let _held = locks.lock(Uuid::new_v4()).await;

        let other = tokio::time::timeout(Duration::from_millis(100), locks.lock(Uuid::new_v4())).await;
        assert!(other.is_ok());
    }
}
