//! Inbound coalescing: per-conversation fragment buffers, the claim lease
//! that makes draining at-most-once per claim, and the timer/sweep manager.

pub mod manager;
pub mod store;

pub use manager::{BufferManager, DrainHandler};
pub use store::{BufferStore, ClaimedFragments, ExpiredBuffer};
