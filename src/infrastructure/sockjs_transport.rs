// SockJS client transport - websocket with xhr-polling fallback
use crate::application::transport::{Link, LinkEnd, Transport, TransportError};
use crate::infrastructure::sockjs::{self, Frame};
use anyhow::Context;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

const LINK_CAPACITY: usize = 64;

#[derive(Debug, Deserialize)]
struct ServerInfo {
    #[serde(default = "default_websocket")]
    websocket: bool,
}

fn default_websocket() -> bool {
    true
}

#[derive(Debug, Clone)]
pub struct SockJsTransport {
    client: reqwest::Client,
    connect_timeout: Duration,
}

impl SockJsTransport {
    pub fn new(connect_timeout: Duration) -> anyhow::Result<Self> {
        // No overall request timeout: xhr polls are held open by the server.
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .context("Failed to build SockJS HTTP client")?;
        Ok(Self {
            client,
            connect_timeout,
        })
    }

    async fn fetch_info(&self, prefix: &Url) -> Result<ServerInfo, TransportError> {
        let url = sockjs::child_url(prefix, "info")?;
        let request = self.client.get(url.clone()).send();
        let response = tokio::time::timeout(self.connect_timeout, request)
            .await
            .map_err(|_| TransportError::Handshake(format!("{url} timed out")))?
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::Handshake(format!(
                "{url} returned {}",
                response.status()
            )));
        }
        response
            .json::<ServerInfo>()
            .await
            .map_err(|e| TransportError::Handshake(format!("bad info response: {e}")))
    }

    async fn connect_websocket(&self, session: &Url) -> Result<Link, TransportError> {
        let mut url = sockjs::child_url(session, "websocket")?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme).map_err(|()| TransportError::InvalidUrl {
            url: url.to_string(),
            reason: format!("cannot switch scheme to {scheme}"),
        })?;

        let (stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| TransportError::Handshake(format!("{url} timed out")))?
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        let (mut write, mut read) = stream.split();

        let first = tokio::time::timeout(self.connect_timeout, read.next())
            .await
            .map_err(|_| TransportError::Handshake(format!("{url} sent no open frame")))?;
        match first {
            Some(Ok(Message::Text(text))) => expect_open(&text)?,
            other => {
                return Err(TransportError::Handshake(format!(
                    "expected open frame, got {other:?}"
                )));
            }
        }

        let (link, end) = Link::pair(LINK_CAPACITY);
        let LinkEnd {
            mut outbound,
            inbound,
        } = end;

        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = inbound.closed() => break,
                    message = read.next() => message,
                };
                let keep_going = match message {
                    Some(Ok(Message::Text(text))) => forward_frame(&text, &inbound).await,
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.to_string()))
                            .unwrap_or((1000, String::new()));
                        let _ = inbound.send(Err(TransportError::Closed { code, reason })).await;
                        false
                    }
                    Some(Ok(_)) => true,
                    Some(Err(e)) => {
                        let _ = inbound.send(Err(TransportError::Io(e.to_string()))).await;
                        false
                    }
                    None => false,
                };
                if !keep_going {
                    break;
                }
            }
            tracing::debug!("websocket reader finished");
        });

        tokio::spawn(async move {
            while let Some(first) = outbound.recv().await {
                let batch = drain_batch(first, &mut outbound);
                if let Err(e) = write.send(Message::Text(sockjs::encode_messages(&batch))).await {
                    tracing::warn!(error = %e, "websocket send failed");
                    break;
                }
            }
            let _ = write.close().await;
        });

        Ok(link)
    }

    async fn connect_xhr(&self, session: &Url) -> Result<Link, TransportError> {
        let poll_url = sockjs::child_url(session, "xhr")?;
        let send_url = sockjs::child_url(session, "xhr_send")?;

        let open_poll = post_text(&self.client, &poll_url, None);
        let opening = tokio::time::timeout(self.connect_timeout, open_poll)
            .await
            .map_err(|_| TransportError::Handshake(format!("{poll_url} timed out")))?
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        expect_open(&opening)?;

        let (link, end) = Link::pair(LINK_CAPACITY);
        let LinkEnd {
            mut outbound,
            inbound,
        } = end;

        let client = self.client.clone();
        tokio::spawn(async move {
            loop {
                let response = tokio::select! {
                    _ = inbound.closed() => break,
                    response = post_text(&client, &poll_url, None) => response,
                };
                let keep_going = match response {
                    Ok(body) => forward_frames(&body, &inbound).await,
                    Err(e) => {
                        let _ = inbound.send(Err(e)).await;
                        false
                    }
                };
                if !keep_going {
                    break;
                }
            }
            tracing::debug!("xhr poller finished");
        });

        let client = self.client.clone();
        tokio::spawn(async move {
            while let Some(first) = outbound.recv().await {
                let batch = drain_batch(first, &mut outbound);
                let body = sockjs::encode_messages(&batch);
                if let Err(e) = post_text(&client, &send_url, Some(body)).await {
                    tracing::warn!(error = %e, "xhr send failed");
                    break;
                }
            }
        });

        Ok(link)
    }
}

#[async_trait]
impl Transport for SockJsTransport {
    async fn connect(&self, url: &str) -> Result<Link, TransportError> {
        let prefix = Url::parse(url).map_err(|e| TransportError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let info = self.fetch_info(&prefix).await?;

        if info.websocket {
            match self.connect_websocket(&sockjs::session_url(&prefix)?).await {
                Ok(link) => {
                    tracing::debug!(%url, "connected over websocket");
                    return Ok(link);
                }
                Err(e) => {
                    tracing::warn!(
                        %url,
                        error = %e,
                        "websocket unavailable; falling back to xhr polling"
                    );
                }
            }
        }

        let link = self.connect_xhr(&sockjs::session_url(&prefix)?).await?;
        tracing::debug!(%url, "connected over xhr polling");
        Ok(link)
    }
}

fn expect_open(raw: &str) -> Result<(), TransportError> {
    match sockjs::decode_frame(raw)? {
        Frame::Open => Ok(()),
        other => Err(TransportError::Handshake(format!(
            "expected open frame, got {other:?}"
        ))),
    }
}

// Returns false once the link is finished.
async fn forward_frame(raw: &str, inbound: &mpsc::Sender<Result<String, TransportError>>) -> bool {
    match sockjs::decode_frame(raw) {
        Ok(Frame::Open | Frame::Heartbeat) => true,
        Ok(Frame::Messages(messages)) => {
            for message in messages {
                if inbound.send(Ok(message)).await.is_err() {
                    return false;
                }
            }
            true
        }
        Ok(Frame::Close { code, reason }) => {
            let _ = inbound.send(Err(TransportError::Closed { code, reason })).await;
            false
        }
        Err(e) => {
            let _ = inbound.send(Err(e)).await;
            false
        }
    }
}

async fn forward_frames(
    body: &str,
    inbound: &mpsc::Sender<Result<String, TransportError>>,
) -> bool {
    for line in body.lines().filter(|line| !line.is_empty()) {
        if !forward_frame(line, inbound).await {
            return false;
        }
    }
    true
}

fn drain_batch(first: String, outbound: &mut mpsc::Receiver<String>) -> Vec<String> {
    let mut batch = vec![first];
    while let Ok(next) = outbound.try_recv() {
        batch.push(next);
    }
    batch
}

async fn post_text(
    client: &reqwest::Client,
    url: &Url,
    body: Option<String>,
) -> Result<String, TransportError> {
    let mut request = client.post(url.clone());
    if let Some(body) = body {
        request = request.header("Content-Type", "text/plain").body(body);
    }
    let response = request
        .send()
        .await
        .map_err(|e| TransportError::Io(e.to_string()))?;
    if !response.status().is_success() {
        return Err(TransportError::Io(format!("{url} returned {}", response.status())));
    }
    response
        .text()
        .await
        .map_err(|e| TransportError::Io(e.to_string()))
}
