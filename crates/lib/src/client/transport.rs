//! Transport seam: opens one bidirectional text link to an endpoint.
//!
//! `WebSocketTransport` is the production implementation (tokio-tungstenite). Tests plug in
//! in-memory links through the same trait.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::{future, Sink, SinkExt, StreamExt};
use std::fmt;
use std::pin::Pin;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// Close code reported when the link fails or drops without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Close code reported when a close frame carries no status.
pub const CLOSE_NO_STATUS: u16 = 1005;
pub const CLOSE_NORMAL: u16 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("link closed")]
    Closed,
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

impl CloseInfo {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn abnormal() -> Self {
        Self::new(CLOSE_ABNORMAL, "")
    }

    pub fn is_normal(&self) -> bool {
        self.code == CLOSE_NORMAL
    }
}

impl fmt::Display for CloseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.reason)
        }
    }
}

impl From<Option<CloseFrame<'_>>> for CloseInfo {
    fn from(frame: Option<CloseFrame<'_>>) -> Self {
        match frame {
            Some(frame) => CloseInfo::new(u16::from(frame.code), frame.reason.into_owned()),
            None => CloseInfo::new(CLOSE_NO_STATUS, ""),
        }
    }
}

/// Something that arrived on a link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Text(String),
    Close(CloseInfo),
}

/// Write half of a link: accepts text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
/// Read half of a link. Ends (`None`) when the peer goes away.
pub type FrameStream = BoxStream<'static, Result<LinkEvent, TransportError>>;

/// Opens links to a saged endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether this transport can be used in the current runtime.
    fn is_available(&self) -> bool {
        true
    }

    /// Open one link. Errors here surface to the session as an abnormal close.
    async fn open(&self, uri: &str) -> Result<(FrameSink, FrameStream), TransportError>;
}

/// WebSocket transport (ws:// and wss://).
#[derive(Debug, Default, Clone)]
pub struct WebSocketTransport;

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, uri: &str) -> Result<(FrameSink, FrameStream), TransportError> {
        let (ws, _) = tokio_tungstenite::connect_async(uri).await?;
        let (write, read) = ws.split();

        let sink = write.with(|text: String| {
            future::ready(Ok::<_, TransportError>(Message::Text(text)))
        });
        let stream = read
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(Ok(LinkEvent::Text(text))),
                    Ok(Message::Close(frame)) => Some(Ok(LinkEvent::Close(frame.into()))),
                    // ping/pong are answered by tungstenite; saged never sends binary
                    Ok(_) => None,
                    Err(e) => Some(Err(TransportError::from(e))),
                })
            })
            .boxed();

        Ok((Box::pin(sink), stream))
    }
}
