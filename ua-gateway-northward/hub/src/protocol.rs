//! SignalR hub protocol, JSON encoding.
//!
//! Every message is a JSON object terminated by the record separator
//! `0x1E`; one websocket frame may carry several records.

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use ua_gateway_error::{GatewayError, GatewayResult};
use url::Url;

pub(crate) const RECORD_SEPARATOR: char = '\u{1e}';

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub(crate) enum MessageType {
    Invocation = 1,
    StreamItem = 2,
    Completion = 3,
    StreamInvocation = 4,
    CancelInvocation = 5,
    Ping = 6,
    Close = 7,
}

#[derive(Serialize)]
struct HandshakeRequest<'a> {
    protocol: &'a str,
    version: u8,
}

#[derive(Serialize)]
struct Invocation<'a> {
    #[serde(rename = "type")]
    kind: MessageType,
    target: &'a str,
    arguments: [&'a str; 2],
}

#[derive(Serialize)]
struct Ping {
    #[serde(rename = "type")]
    kind: MessageType,
}

/// Any record received from the hub. The handshake response carries no
/// type, only an optional error.
#[derive(Debug, Deserialize, PartialEq)]
pub(crate) struct Record {
    #[serde(rename = "type")]
    pub kind: Option<MessageType>,
    #[serde(default)]
    pub error: Option<String>,
}

fn frame<T: Serialize>(message: &T) -> GatewayResult<String> {
    let mut text = serde_json::to_string(message)?;
    text.push(RECORD_SEPARATOR);
    Ok(text)
}

pub(crate) fn handshake() -> GatewayResult<String> {
    frame(&HandshakeRequest {
        protocol: "json",
        version: 1,
    })
}

/// Non-blocking invocation of `method(topic, message)`.
pub(crate) fn invocation(method: &str, topic: &str, message: &str) -> GatewayResult<String> {
    frame(&Invocation {
        kind: MessageType::Invocation,
        target: method,
        arguments: [topic, message],
    })
}

pub(crate) fn ping() -> GatewayResult<String> {
    frame(&Ping {
        kind: MessageType::Ping,
    })
}

/// Split a frame into records. Records of unknown type are skipped.
pub(crate) fn parse_records(text: &str) -> Vec<Record> {
    text.split(RECORD_SEPARATOR)
        .filter(|r| !r.trim().is_empty())
        .filter_map(|r| serde_json::from_str(r).ok())
        .collect()
}

/// Websocket URL of a hub endpoint: `http` maps to `ws`, `https` to `wss`.
pub(crate) fn websocket_url(endpoint: &str) -> GatewayResult<Url> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| GatewayError::InvalidArgument(format!("hub endpoint {endpoint}: {e}")))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(GatewayError::UnsupportedBrokerScheme(format!(
                "hub endpoint scheme {other}"
            )))
        }
    };
    url.set_scheme(scheme).map_err(|_| {
        GatewayError::InvalidArgument(format!("hub endpoint {endpoint} cannot use {scheme}"))
    })?;
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames() -> anyhow::Result<()> {
        assert_eq!(handshake()?, "{\"protocol\":\"json\",\"version\":1}\u{1e}");
        assert_eq!(
            invocation("Publish", "plant/a", "{\"v\":1}")?,
            "{\"type\":1,\"target\":\"Publish\",\"arguments\":[\"plant/a\",\"{\\\"v\\\":1}\"]}\u{1e}"
        );
        assert_eq!(ping()?, "{\"type\":6}\u{1e}");
        Ok(())
    }

    #[test]
    fn test_parse_records() {
        let records = parse_records("{}\u{1e}{\"type\":6}\u{1e}{\"type\":7,\"error\":\"bye\"}\u{1e}{\"type\":99}\u{1e}");
        assert_eq!(
            records,
            vec![
                Record {
                    kind: None,
                    error: None
                },
                Record {
                    kind: Some(MessageType::Ping),
                    error: None
                },
                Record {
                    kind: Some(MessageType::Close),
                    error: Some("bye".into())
                },
            ]
        );
    }

    #[test]
    fn test_websocket_url() -> anyhow::Result<()> {
        assert_eq!(
            websocket_url("http://hub.local:5000/data")?.as_str(),
            "ws://hub.local:5000/data"
        );
        assert_eq!(websocket_url("https://hub.local/data")?.scheme(), "wss");
        assert_eq!(websocket_url("ws://hub.local/data")?.scheme(), "ws");
        assert!(websocket_url("ftp://hub.local").is_err());
        Ok(())
    }
}
