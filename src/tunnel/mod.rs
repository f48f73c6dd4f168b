//! Rendezvous between one sender and one receiver, keyed by an opaque identifier
// (c) 2024 Ross Younger
//!
//! A sender opens a [`Rendezvous`], which registers a [`Slot`] in the shared [`Registry`]
//! and then waits. A receiver resolves the identifier, builds a [`Delivery`] (its output
//! sink plus a [`CompletionSignal`]) and hands it through the slot. The sender streams into
//! the sink and fires the signal exactly once.
//!
//! ```text
//!  sender                 registry                 receiver
//!    | open  ---------------> [id -> slot]
//!    | wait ...                  | <----------- resolve(id)
//!    |                           |               Delivery::new()
//!    | <========== slot.deliver(delivery) =========|
//!    | (slot removed)                            pickup.metadata() ...
//!    | sink.declare / sink.write  ==============>  body
//!    | done.complete  ===========================> outcome
//! ```

mod delivery;
mod error;
mod id;
mod registry;
mod rendezvous;

pub use delivery::{
    CompletionSignal, Delivery, FileMetadata, Outcome, Pickup, ResponseSink, BODY_QUEUE_DEPTH,
};
pub use error::RelayError;
pub use id::TransferId;
pub use registry::{Registry, Slot};
pub use rendezvous::Rendezvous;
