//! Shared domain types for HearthAgent.
//!
//! Everything the worker crates have in common lives here: the error type,
//! the configuration tree, the scheduled-action data model, and the
//! provider-agnostic LLM message types.

pub mod action;
pub mod config;
pub mod error;
pub mod message;
