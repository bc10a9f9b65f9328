//! Authoritative runtime state for the coordinator.
//!
//! One coarse lock over the full state, typed mutators, and a debounced
//! write-through persister that never runs under the lock.

pub mod persist;
pub mod store;

pub use persist::spawn_persister;
pub use store::{StateStore, StoreSnapshot};
