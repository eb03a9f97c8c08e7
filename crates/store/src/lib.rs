//! Durable persistence for scheduled actions.

mod store;

pub use store::ActionStore;
