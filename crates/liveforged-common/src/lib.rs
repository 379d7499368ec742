//! Liveforged-Common: Shared types and utilities.
//!
//! This crate provides the leaf types used across liveforged:
//!
//! - **Stream identifiers**: [`StreamId`], validated once so it is always safe
//!   to join onto a filesystem path
//! - **Path Utilities**: Classify HLS output files by extension
//! - **Error Handling**: The orchestrator error taxonomy and result alias
//!
//! # Examples
//!
//! ```
//! use liveforged_common::{Error, StreamId};
//! use liveforged_common::paths::is_manifest_file;
//! use std::path::Path;
//!
//! let id: StreamId = "cam1".parse().unwrap();
//! assert_eq!(id.as_str(), "cam1");
//!
//! assert!(matches!(StreamId::parse("../etc"), Err(Error::Validation(_))));
//! assert!(is_manifest_file(Path::new("index.m3u8")));
//! ```

pub mod error;
pub mod ids;
pub mod paths;

pub use error::{Error, Result};
pub use ids::StreamId;
