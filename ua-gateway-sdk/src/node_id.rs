use base64::Engine as _;
use bytes::Bytes;
use std::{fmt, str::FromStr};
use ua_gateway_error::{GatewayError, GatewayResult};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Numeric(u32),
    String(String),
    Guid(Uuid),
    Opaque(Bytes),
}

/// Server-native node identifier.
///
/// Text form follows the OPC UA convention: `ns=<n>;i=<u32>`, `s=<string>`,
/// `g=<guid>`, `b=<base64>`, with the `ns=` prefix omitted for namespace 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub namespace: u16,
    pub identifier: Identifier,
}

impl NodeId {
    #[inline]
    pub const fn numeric(namespace: u16, id: u32) -> Self {
        Self {
            namespace,
            identifier: Identifier::Numeric(id),
        }
    }

    #[inline]
    pub fn string(namespace: u16, id: impl Into<String>) -> Self {
        Self {
            namespace,
            identifier: Identifier::String(id.into()),
        }
    }

    /// `Some(id)` when this is a namespace 0 numeric node.
    #[inline]
    pub fn as_ns0(&self) -> Option<u32> {
        match (self.namespace, &self.identifier) {
            (0, Identifier::Numeric(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        self.as_ns0() == Some(0)
    }

    /// Identifier part of the text form, without the namespace prefix.
    pub fn identifier_text(&self) -> String {
        match &self.identifier {
            Identifier::Numeric(v) => format!("i={v}"),
            Identifier::String(v) => format!("s={v}"),
            Identifier::Guid(v) => format!("g={}", v.hyphenated()),
            Identifier::Opaque(v) => {
                format!("b={}", base64::engine::general_purpose::STANDARD.encode(v))
            }
        }
    }
}

impl Default for NodeId {
    fn default() -> Self {
        NodeId::numeric(0, 0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace != 0 {
            write!(f, "ns={};", self.namespace)?;
        }
        f.write_str(&self.identifier_text())
    }
}

impl FromStr for NodeId {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || GatewayError::InvalidNodeId(s.to_string());
        let (namespace, rest) = match s.strip_prefix("ns=") {
            Some(tail) => {
                let (ns, rest) = tail.split_once(';').ok_or_else(invalid)?;
                (ns.parse::<u16>().map_err(|_| invalid())?, rest)
            }
            None => (0, s),
        };
        let (kind, value) = rest.split_once('=').ok_or_else(invalid)?;
        let identifier = match kind {
            "i" => Identifier::Numeric(value.parse().map_err(|_| invalid())?),
            "s" => Identifier::String(value.to_string()),
            "g" => Identifier::Guid(Uuid::parse_str(value).map_err(|_| invalid())?),
            "b" => Identifier::Opaque(Bytes::from(
                base64::engine::general_purpose::STANDARD
                    .decode(value)
                    .map_err(|_| invalid())?,
            )),
            _ => return Err(invalid()),
        };
        Ok(Self {
            namespace,
            identifier,
        })
    }
}

/// Node id as exposed to HTTP callers: `<namespaceIndex>-<identifier>`.
///
/// An all-digit identifier is numeric; anything else without whitespace is a
/// string identifier. Guid and opaque ids have no platform form and are
/// rendered as their string text, so they do not round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlatformNodeId(NodeId);

impl PlatformNodeId {
    pub fn parse(s: &str) -> GatewayResult<Self> {
        s.parse()
    }

    #[inline]
    pub fn node_id(&self) -> &NodeId {
        &self.0
    }

    #[inline]
    pub fn into_node_id(self) -> NodeId {
        self.0
    }
}

impl FromStr for PlatformNodeId {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || GatewayError::InvalidNodeId(s.to_string());
        let (ns, ident) = s.split_once('-').ok_or_else(invalid)?;
        if ns.is_empty() || !ns.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if ident.is_empty() || ident.chars().any(char::is_whitespace) {
            return Err(invalid());
        }
        let namespace = ns.parse::<u16>().map_err(|_| invalid())?;
        let identifier = if ident.bytes().all(|b| b.is_ascii_digit()) {
            Identifier::Numeric(ident.parse::<u32>().map_err(|_| invalid())?)
        } else {
            Identifier::String(ident.to_string())
        };
        Ok(Self(NodeId {
            namespace,
            identifier,
        }))
    }
}

impl fmt::Display for PlatformNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-", self.0.namespace)?;
        match &self.0.identifier {
            Identifier::Numeric(v) => write!(f, "{v}"),
            Identifier::String(v) => f.write_str(v),
            Identifier::Guid(v) => write!(f, "{}", v.hyphenated()),
            Identifier::Opaque(v) => f.write_str(&hex::encode(v)),
        }
    }
}

impl From<NodeId> for PlatformNodeId {
    fn from(node_id: NodeId) -> Self {
        Self(node_id)
    }
}

impl From<PlatformNodeId> for NodeId {
    fn from(id: PlatformNodeId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_numeric_and_string() {
        let id = PlatformNodeId::parse("2-1001").unwrap();
        assert_eq!(id.node_id(), &NodeId::numeric(2, 1001));
        assert_eq!(id.to_string(), "2-1001");

        let id = PlatformNodeId::parse("3-Boiler.Temperature").unwrap();
        assert_eq!(id.node_id(), &NodeId::string(3, "Boiler.Temperature"));
        assert_eq!(id.to_string(), "3-Boiler.Temperature");

        // only the first '-' separates namespace from identifier
        let id = PlatformNodeId::parse("1-a-b").unwrap();
        assert_eq!(id.node_id(), &NodeId::string(1, "a-b"));
    }

    #[test]
    fn test_platform_rejects_bad_grammar() {
        for bad in ["", "2", "-5", "x-5", "2-", "2-has space", "2-tab\tx", "70000-1", "1-4294967296"] {
            assert!(
                matches!(PlatformNodeId::parse(bad), Err(GatewayError::InvalidNodeId(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_native_text_form() {
        assert_eq!(NodeId::numeric(0, 2259).to_string(), "i=2259");
        assert_eq!(NodeId::string(2, "Pump").to_string(), "ns=2;s=Pump");

        let parsed: NodeId = "ns=4;s=a;b".parse().unwrap();
        assert_eq!(parsed, NodeId::string(4, "a;b"));

        let guid: NodeId = "ns=1;g=09087e75-8e5e-499b-954f-f2a9603db28a".parse().unwrap();
        assert!(matches!(guid.identifier, Identifier::Guid(_)));
        assert_eq!(guid.to_string(), "ns=1;g=09087e75-8e5e-499b-954f-f2a9603db28a");

        let opaque: NodeId = "b=AQID".parse().unwrap();
        assert_eq!(opaque.identifier, Identifier::Opaque(Bytes::from_static(&[1, 2, 3])));

        assert!("ns=x;i=1".parse::<NodeId>().is_err());
        assert!("q=1".parse::<NodeId>().is_err());
    }
}
