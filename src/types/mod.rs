//! Core type definitions shared across the gateway.

pub mod message;

pub use message::{Message, MessageRole};
