//! Core types and storage for the LabControl service.
//!
//! This crate holds everything the server needs that is independent of the
//! wire surface: the configuration schema, the error taxonomy, the typed
//! entity records (boards, resources, requests, users), the filesystem-backed
//! object store, the wildcard query engine, and command-template resolution.
//!
//! The server crate (`lc-server`) layers reservation, command execution,
//! capture sessions and the HTTP dispatcher on top of these primitives.

pub mod config;
pub mod error;
pub mod model;
pub mod query;
pub mod stamp;
pub mod store;
pub mod template;

pub use config::Settings;
pub use error::{LcError, LcResult};
