//! # Live Session Core
//!
//! Implements the live-session mechanism: an in-memory registry of sessions,
//! per-session turn buffers, and the processor that drains a buffer into a
//! single model call.
//!
//! ## Key Components:
//! - **SessionState**: conversation history plus pending text/audio buffers
//! - **SessionRegistry**: concurrency-safe id → session map with limits and
//!   idle eviction
//! - **TurnProcessor**: drains buffered fragments into one `user` turn, calls
//!   the model with the full history, appends the reply
//!
//! ## Control flow:
//! start session → registry entry created → client buffers zero or more
//! text/audio fragments → client signals "process turn" → processor drains the
//! buffer, calls the model, returns the reply → repeat → end session →
//! registry entry destroyed.

pub mod processor;
pub mod registry;
pub mod state;

pub use processor::{TurnProcessor, TurnResult};
pub use registry::SessionRegistry;
pub use state::{AudioChunk, SessionState};
