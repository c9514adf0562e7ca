use async_trait::async_trait;
use bytes::Bytes;
use std::{fmt, str::FromStr, sync::Arc};
use ua_gateway_error::{GatewayError, GatewayResult};

pub const DEFAULT_MQTT_PORT: u16 = 1883;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrokerScheme {
    Mqtt,
    /// SignalR-style JSON hub over websocket.
    Hub,
}

/// Parsed broker URL. Publishers are pooled by [`BrokerUrl::key`].
///
/// Accepted forms: `mqtt:<host>[:<port>]` (optionally `mqtt://`), and
/// `signalr:<http|https|ws|wss URL>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BrokerUrl {
    raw: String,
    scheme: BrokerScheme,
    address: String,
}

impl BrokerUrl {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[inline]
    pub fn scheme(&self) -> BrokerScheme {
        self.scheme
    }

    /// Host and port of an MQTT broker.
    pub fn mqtt_host_port(&self) -> GatewayResult<(String, u16)> {
        if self.scheme != BrokerScheme::Mqtt {
            return Err(GatewayError::InvalidArgument(format!(
                "{} is not an mqtt broker",
                self.raw
            )));
        }
        let address = self.address.trim_end_matches('/');
        // bracketed IPv6 literal
        if let Some(rest) = address.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(|| self.invalid())?;
            let port = match tail.strip_prefix(':') {
                Some(p) => p.parse().map_err(|_| self.invalid())?,
                None if tail.is_empty() => DEFAULT_MQTT_PORT,
                None => return Err(self.invalid()),
            };
            return Ok((host.to_string(), port));
        }
        match address.rsplit_once(':') {
            Some((host, port)) => Ok((host.to_string(), port.parse().map_err(|_| self.invalid())?)),
            None => Ok((address.to_string(), DEFAULT_MQTT_PORT)),
        }
    }

    /// Identity of the broker behind the URL. Spellings that reach the same
    /// broker (`mqtt:host`, `mqtt://HOST:1883/`) share a key.
    pub fn key(&self) -> String {
        match self.scheme {
            BrokerScheme::Mqtt => match self.mqtt_host_port() {
                Ok((host, port)) if host.contains(':') => {
                    format!("mqtt:[{}]:{port}", host.to_ascii_lowercase())
                }
                Ok((host, port)) => format!("mqtt:{}:{port}", host.to_ascii_lowercase()),
                Err(_) => format!("mqtt:{}", self.address),
            },
            BrokerScheme::Hub => match self.address.split_once("://") {
                Some((scheme, rest)) => format!("signalr:{}://{rest}", scheme.to_ascii_lowercase()),
                None => format!("signalr:{}", self.address),
            },
        }
    }

    /// Websocket/HTTP endpoint of a hub.
    pub fn hub_endpoint(&self) -> GatewayResult<&str> {
        if self.scheme != BrokerScheme::Hub {
            return Err(GatewayError::InvalidArgument(format!(
                "{} is not a hub broker",
                self.raw
            )));
        }
        Ok(&self.address)
    }

    fn invalid(&self) -> GatewayError {
        GatewayError::InvalidArgument(format!("malformed broker url {}", self.raw))
    }
}

impl FromStr for BrokerUrl {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let (scheme, rest) = raw
            .split_once(':')
            .ok_or_else(|| GatewayError::UnsupportedBrokerScheme(raw.to_string()))?;
        let (scheme, address) = match scheme.to_ascii_lowercase().as_str() {
            "mqtt" => (
                BrokerScheme::Mqtt,
                rest.strip_prefix("//").unwrap_or(rest).to_string(),
            ),
            "signalr" => {
                let lower = rest.to_ascii_lowercase();
                if !["http://", "https://", "ws://", "wss://"]
                    .iter()
                    .any(|p| lower.starts_with(p))
                {
                    return Err(GatewayError::InvalidArgument(format!(
                        "hub broker url needs an http(s) or ws(s) address: {raw}"
                    )));
                }
                (BrokerScheme::Hub, rest.to_string())
            }
            _ => return Err(GatewayError::UnsupportedBrokerScheme(scheme.to_string())),
        };
        if address.is_empty() {
            return Err(GatewayError::InvalidArgument(format!(
                "broker url without address: {raw}"
            )));
        }
        Ok(Self {
            raw: raw.to_string(),
            scheme,
            address,
        })
    }
}

impl fmt::Display for BrokerUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A live connection to one broker, shared by every subscription targeting it.
#[async_trait]
pub trait Publisher: Send + Sync + fmt::Debug {
    fn broker(&self) -> &BrokerUrl;

    /// Enqueue a message without blocking. An error means the message was
    /// dropped (queue full or publisher closed); callers log and move on.
    fn try_publish(&self, topic: &str, payload: Bytes) -> GatewayResult<()>;

    /// Flush what can be flushed and release the connection.
    async fn close(&self);
}

/// Creates publishers for broker URLs. Construction performs no I/O; the
/// returned publisher connects in the background.
pub trait PublisherFactory: Send + Sync {
    fn create(&self, broker: &BrokerUrl) -> GatewayResult<Arc<dyn Publisher>>;
}
