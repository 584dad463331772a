//! Flizo Copilot Service Library
//!
//! Exposes service components for integration testing.

pub mod api;
pub mod config;
pub mod history;
pub mod playback;
pub mod poller;
pub mod state;
