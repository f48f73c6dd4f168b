// Tunnel registry
// (c) 2024 Ross Younger

use std::{
    collections::{hash_map::Entry, HashMap},
    sync::{PoisonError, RwLock},
};

use tokio::sync::mpsc;
use tracing::trace;

use super::{Delivery, RelayError, TransferId};

/// The sending half of a rendezvous handoff channel, as stored in the [`Registry`].
///
/// Cloning a slot does not create a second rendezvous: every clone feeds the same single
/// waiting sender, which accepts exactly one [`Delivery`] and then closes the channel.
#[derive(Clone)]
pub struct Slot(mpsc::Sender<Delivery>);

impl Slot {
    pub(crate) fn new(tx: mpsc::Sender<Delivery>) -> Self {
        Self(tx)
    }

    /// Hands a delivery to the waiting sender.
    ///
    /// Fails with [`RelayError::NotFound`] if the sender has already accepted another
    /// delivery or has gone away.
    pub async fn deliver(&self, delivery: Delivery) -> Result<(), RelayError> {
        self.0.send(delivery).await.map_err(|_| RelayError::NotFound)
    }

    /// Is anybody still waiting on the other end?
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.0.is_closed()
    }
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot").field("live", &self.is_live()).finish()
    }
}

/// Concurrent map of identifier to rendezvous slot.
///
/// Lookups take a shared lock; registration and removal take it exclusively.
/// The lock is never held across an await point.
#[derive(Debug, Default)]
pub struct Registry {
    slots: RwLock<HashMap<TransferId, Slot>>,
}

impl Registry {
    /// Constructor
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a slot under an identifier.
    ///
    /// An identifier that already names a live slot is a collision; the existing slot is
    /// left alone. A stale entry (whose sender has gone) is replaced.
    pub fn register(&self, id: TransferId, slot: Slot) -> Result<(), RelayError> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        match slots.entry(id) {
            Entry::Occupied(mut e) => {
                if e.get().is_live() {
                    return Err(RelayError::Collision(e.key().clone()));
                }
                trace!("replacing stale slot {}", e.key());
                let _ = e.insert(slot);
            }
            Entry::Vacant(e) => {
                let _ = e.insert(slot);
            }
        }
        Ok(())
    }

    /// Looks up an identifier. Never waits for a future registration.
    #[must_use]
    pub fn resolve(&self, id: &TransferId) -> Option<Slot> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Removes an identifier. Idempotent; returns whether anything was removed.
    pub fn remove(&self, id: &TransferId) -> bool {
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }

    /// Number of registered slots
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Are there no registered slots?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test {
    use super::{Registry, Slot};
    use crate::tunnel::{Delivery, RelayError, TransferId};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn slot() -> (Slot, mpsc::Receiver<Delivery>) {
        let (tx, rx) = mpsc::channel(1);
        (Slot::new(tx), rx)
    }

    #[test]
    fn register_resolve_remove() {
        let reg = Registry::new();
        let id = TransferId::from("testID");
        let (s, _rx) = slot();
        reg.register(id.clone(), s).unwrap();
        assert!(reg.resolve(&id).is_some());
        assert_eq!(reg.len(), 1);

        assert!(reg.remove(&id));
        assert!(reg.resolve(&id).is_none());
        assert!(reg.resolve(&id).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn remove_is_idempotent() {
        let reg = Registry::new();
        let id = TransferId::from("never-registered");
        assert!(!reg.remove(&id));
        assert!(!reg.remove(&id));

        let (s, _rx) = slot();
        reg.register(id.clone(), s).unwrap();
        assert!(reg.remove(&id));
        assert!(!reg.remove(&id));
    }

    #[test]
    fn live_collision_is_refused() {
        let reg = Registry::new();
        let id = TransferId::from("dup");
        let (first, _rx1) = slot();
        let (second, _rx2) = slot();
        reg.register(id.clone(), first).unwrap();
        let err = reg.register(id.clone(), second).unwrap_err();
        assert!(matches!(err, RelayError::Collision(ref i) if *i == id));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn stale_entry_is_replaced() {
        let reg = Registry::new();
        let id = TransferId::from("stale");
        let (first, rx1) = slot();
        reg.register(id.clone(), first).unwrap();
        drop(rx1);
        let (second, _rx2) = slot();
        reg.register(id.clone(), second).unwrap();
        assert!(reg.resolve(&id).unwrap().is_live());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_access() {
        let reg = Arc::new(Registry::new());
        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..100 {
            let reg = reg.clone();
            let _ = tasks.spawn(async move {
                let id = TransferId::from(i.to_string());
                let (s, _rx) = slot();
                reg.register(id.clone(), s).unwrap();
                assert!(reg.resolve(&id).is_some());
                assert!(reg.remove(&id));
                assert!(reg.resolve(&id).is_none());
            });
        }
        while let Some(r) = tasks.join_next().await {
            r.unwrap();
        }
        assert!(reg.is_empty());
    }
}
