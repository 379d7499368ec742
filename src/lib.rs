//! Liveforged - live stream to HLS transcoding orchestrator
//!
//! This library crate exposes the core functionality for integration testing.

pub mod config;
pub mod lifecycle;
pub mod registry;
pub mod server;
pub mod storage;
pub mod supervisor;
pub mod tools;
