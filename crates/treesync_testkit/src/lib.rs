//! # treesync testkit
//!
//! Test utilities for treesync.
//!
//! This crate provides:
//! - Engine fixtures and a recording event sink
//! - Property-based test generators using proptest
//! - An in-memory server that answers the engine's messages
//!
//! ## Usage
//!
//! ```rust,ignore
//! use treesync_testkit::prelude::*;
//!
//! #[test]
//! fn write_settles() {
//!     let engine = connected_engine(EngineConfig::default());
//!     let mut server = FakeServer::default();
//!     engine.set(path("/a"), Node::from(1)).unwrap();
//!     pump(&engine, &mut server).unwrap();
//!     assert_eq!(engine.pending_write_count(), 0);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod server;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::server::*;
}

pub use fixtures::*;
pub use generators::*;
pub use server::*;
