//! Livefeed - live camera streaming over HLS
//!
//! This library crate exposes the streaming core for the binary and for
//! integration testing.

pub mod config;
pub mod events;
pub mod server;
pub mod source;
pub mod streaming;
