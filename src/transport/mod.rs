//! Duplex transports to the GetWork server
//!
//! A connection is split into a reader half owned by the read loop and a
//! writer half shared by submitters behind a lock.

use crate::types::{JobTemplate, SubmitParams};
use crate::Result;
use async_trait::async_trait;
use url::Url;

pub mod memory;
pub mod websocket;

pub use memory::MemoryUpstream;
pub use websocket::WebSocketConnector;

/// Inbound half: yields job templates until the stream ends
#[async_trait]
pub trait JobStream: Send {
    /// Next template, an error on a bad read, or `None` once the stream closes
    async fn next_job(&mut self) -> Option<Result<JobTemplate>>;
}

/// Outbound half: writes submissions
#[async_trait]
pub trait SubmitSink: Send {
    async fn submit(&mut self, params: &SubmitParams) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Dials the GetWork server
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<(Box<dyn JobStream>, Box<dyn SubmitSink>)>;
}
