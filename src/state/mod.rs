//! Durable node state.
//!
//! Deliberately thin: per the engine's non-goals, election term and leader
//! identity are never persisted, so this module tracks only the highest
//! GSN this node has locally observed.

mod tracker;

pub use tracker::StateTracker;
