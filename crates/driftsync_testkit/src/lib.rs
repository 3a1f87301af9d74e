//! # Driftsync Testkit
//!
//! Test utilities for driftsync.
//!
//! This crate provides:
//! - Fixture models (`Project`, `Todo`, `Comment`) with server and client
//!   identifier strategies and cascading relations
//! - [`TestHarness`], a context over a memory or file store with mock remotes
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use driftsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn saves_sync() {
//!     let h = TestHarness::new();
//!     let project = h.projects.save(project("inbox")).await.unwrap();
//!     h.sync().await;
//!     assert_eq!(h.project_remote.records().len(), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
