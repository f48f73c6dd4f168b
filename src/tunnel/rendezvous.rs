// Rendezvous protocol, sender side
// (c) 2024 Ross Younger

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{Delivery, Registry, RelayError, Slot, TransferId};

/// How many fresh identifiers to try before giving up on a collision
const MAX_ID_ATTEMPTS: usize = 3;

/// One sender's claim on the registry, waiting for a receiver.
///
/// Dropping this (including by cancelling [`Rendezvous::wait`]) removes the slot, so a
/// receiver can never rendezvous with a sender that has already left.
#[derive(Debug)]
pub struct Rendezvous {
    id: TransferId,
    handoff: mpsc::Receiver<Delivery>,
    registry: Arc<Registry>,
}

impl Rendezvous {
    /// Registers a slot under a freshly generated identifier.
    pub fn open(registry: &Arc<Registry>) -> Result<Self, RelayError> {
        let mut attempt = 1;
        loop {
            match Self::open_with_id(registry, TransferId::generate()) {
                Err(RelayError::Collision(id)) if attempt < MAX_ID_ATTEMPTS => {
                    debug!("identifier collision on {id}, retrying");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Registers a slot under a given identifier
    pub fn open_with_id(registry: &Arc<Registry>, id: TransferId) -> Result<Self, RelayError> {
        // Capacity 1 means a receiver's send completes without the sender being parked on
        // recv at that instant; the sender still accepts exactly one delivery.
        let (tx, rx) = mpsc::channel(1);
        registry.register(id.clone(), Slot::new(tx))?;
        trace!("registered {id}");
        Ok(Self {
            id,
            handoff: rx,
            registry: registry.clone(),
        })
    }

    /// Identifier accessor
    #[must_use]
    pub fn id(&self) -> &TransferId {
        &self.id
    }

    /// Waits, with no timeout, for a receiver to hand over a [`Delivery`].
    ///
    /// The slot is consumed: it is removed from the registry and any further delivery
    /// (from a receiver that lost the race) is dropped, which that receiver observes as
    /// not-found.
    pub async fn wait(mut self) -> Option<Delivery> {
        let delivery = self.handoff.recv().await;
        self.handoff.close();
        delivery
    }
}

impl Drop for Rendezvous {
    fn drop(&mut self) {
        if self.registry.remove(&self.id) {
            trace!("removed {}", self.id);
        }
    }
}
