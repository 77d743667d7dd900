// SockJS framing
//
// Frames: `o` open, `h` heartbeat, `a[...]` message batch, `m"..."` single
// message, `c[code,"reason"]` close.
use crate::application::transport::TransportError;
use rand::Rng;
use rand::distr::Alphanumeric;
use serde_json::Value;
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Open,
    Heartbeat,
    Messages(Vec<String>),
    Close { code: u16, reason: String },
}

pub fn decode_frame(raw: &str) -> Result<Frame, TransportError> {
    let raw = raw.trim_end_matches('\n');
    let Some(kind) = raw.chars().next() else {
        return Err(TransportError::Protocol("empty frame".to_string()));
    };
    let body = &raw[kind.len_utf8()..];

    match kind {
        'o' => Ok(Frame::Open),
        'h' => Ok(Frame::Heartbeat),
        'a' => {
            let values: Vec<Value> = serde_json::from_str(body)
                .map_err(|e| TransportError::Protocol(format!("bad message frame: {e}")))?;
            Ok(Frame::Messages(values.into_iter().map(message_text).collect()))
        }
        'm' => {
            let value: Value = serde_json::from_str(body)
                .map_err(|e| TransportError::Protocol(format!("bad message frame: {e}")))?;
            Ok(Frame::Messages(vec![message_text(value)]))
        }
        'c' => {
            let (code, reason): (u16, String) = serde_json::from_str(body)
                .map_err(|e| TransportError::Protocol(format!("bad close frame: {e}")))?;
            Ok(Frame::Close { code, reason })
        }
        other => Err(TransportError::Protocol(format!("unknown frame type {other:?}"))),
    }
}

// Servers may put JSON objects straight into the frame or send them as
// JSON-encoded strings; either way the channel gets the JSON text.
fn message_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

pub fn encode_messages(messages: &[String]) -> String {
    Value::from(messages.to_vec()).to_string()
}

/// `{prefix}/{server}/{session}` with a random server id and session id.
pub fn session_url(prefix: &Url) -> Result<Url, TransportError> {
    let mut rng = rand::rng();
    let server = rng.random_range(0..1000);
    let session: String = (&mut rng)
        .sample_iter(Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    let url = format!("{}/{server:03}/{session}", prefix.as_str().trim_end_matches('/'));
    Url::parse(&url).map_err(|e| TransportError::InvalidUrl {
        url,
        reason: e.to_string(),
    })
}

pub fn child_url(base: &Url, segment: &str) -> Result<Url, TransportError> {
    let url = format!("{}/{segment}", base.as_str().trim_end_matches('/'));
    Url::parse(&url).map_err(|e| TransportError::InvalidUrl {
        url,
        reason: e.to_string(),
    })
}
