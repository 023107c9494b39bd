//! Common types shared across parley crates.
//!
//! This crate holds the conversation primitives that both the context engine
//! and the HTTP surface speak, plus the single error type allowed to cross the
//! engine boundary.

pub mod error;
pub mod message;

pub use error::{ParleyError, Result};
pub use message::{ConversationTurn, MessageRole};
