//! EPOCH crowd-hashing client
//!
//! Keeps a live connection to a DERO GetWork server and turns hash attempt
//! requests from any number of callers into bounded-concurrency batches:
//! - Streams job templates from the daemon and always hashes against the latest
//! - Caps concurrent attempt and submission tasks at the worker limit
//! - Submits every miniblock that meets its difficulty over the same connection
//! - Tracks session totals shared by all callers
//! - Exposes the engine as JSON-RPC methods

pub mod address;
pub mod admission;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod job;
pub mod pow;
pub mod rpc;
pub mod session;
pub mod transport;
pub mod types;
pub mod utils;

pub use config::{Config, EngineConfig};
pub use engine::{Engine, EngineBuilder};
pub use error::{Error, Result};
pub use types::*;

/// Application information
pub const APP_NAME: &str = "epoch-client";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
