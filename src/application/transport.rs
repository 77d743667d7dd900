// Transport trait for live channel links
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid channel url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("closed by peer with code {code}: {reason}")]
    Closed { code: u16, reason: String },
    #[error("transport I/O failed: {0}")]
    Io(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// One established connection. Text written to `outbound` is transmitted;
/// `inbound` yields received messages and ends (or yields an error) when the
/// connection is gone.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<Result<String, TransportError>>,
}

/// The transport-side ends of a [`Link`].
#[derive(Debug)]
pub struct LinkEnd {
    pub outbound: mpsc::Receiver<String>,
    pub inbound: mpsc::Sender<Result<String, TransportError>>,
}

impl Link {
    pub fn pair(capacity: usize) -> (Link, LinkEnd) {
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        (
            Link {
                outbound: outbound_tx,
                inbound: inbound_rx,
            },
            LinkEnd {
                outbound: outbound_rx,
                inbound: inbound_tx,
            },
        )
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a link to a live channel endpoint, negotiating whichever
    /// underlying transport the endpoint supports.
    async fn connect(&self, url: &str) -> Result<Link, TransportError>;
}
