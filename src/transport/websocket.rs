//! Secure WebSocket transport
//!
//! GetWork servers push one JSON template per message and accept one JSON
//! submission per message.

use super::{Connector, JobStream, SubmitSink};
use crate::types::{JobTemplate, SubmitParams};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::Url;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dials `wss://` GetWork endpoints
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector {
    insecure: bool,
}

impl WebSocketConnector {
    /// `insecure` accepts self-signed and mismatched certificates
    pub fn new(insecure: bool) -> Self {
        Self { insecure }
    }

    fn tls(&self) -> Result<native_tls::TlsConnector> {
        native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(self.insecure)
            .danger_accept_invalid_hostnames(self.insecure)
            .build()
            .map_err(|e| Error::connection(format!("TLS setup failed: {}", e)))
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<(Box<dyn JobStream>, Box<dyn SubmitSink>)> {
        let connector = tokio_tungstenite::Connector::NativeTls(self.tls()?);

        let (socket, response) = tokio_tungstenite::connect_async_tls_with_config(
            url.as_str(),
            None,
            false,
            Some(connector),
        )
        .await
        .map_err(|e| Error::connection(format!("could not connect to {}: {}", url, e)))?;

        debug!(status = %response.status(), "WebSocket handshake complete");

        let (sink, stream) = socket.split();
        Ok((
            Box::new(WebSocketJobStream { stream }),
            Box::new(WebSocketSubmitSink { sink }),
        ))
    }
}

struct WebSocketJobStream {
    stream: SplitStream<Socket>,
}

#[async_trait]
impl JobStream for WebSocketJobStream {
    async fn next_job(&mut self) -> Option<Result<JobTemplate>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(Error::from(e))),
            };

            match message {
                Message::Text(text) => {
                    return Some(serde_json::from_str(text.as_str()).map_err(Error::from));
                }
                Message::Binary(bytes) => {
                    return Some(serde_json::from_slice(&bytes).map_err(Error::from));
                }
                Message::Close(frame) => {
                    debug!(?frame, "GetWork server closed the stream");
                    return None;
                }
                other => trace!(?other, "ignoring control frame"),
            }
        }
    }
}

struct WebSocketSubmitSink {
    sink: SplitSink<Socket, Message>,
}

#[async_trait]
impl SubmitSink for WebSocketSubmitSink {
    async fn submit(&mut self, params: &SubmitParams) -> Result<()> {
        let payload = serde_json::to_string(params)?;
        self.sink
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| Error::submission(format!("write failed: {}", e)))
    }

    async fn close(&mut self) -> Result<()> {
        self.sink.close().await.map_err(Error::from)
    }
}
