use crate::{node_id::NodeId, value::UaValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::fmt;

/// OPC UA built-in types (Part 6, table 1).
///
/// The discriminant is the wire identifier; it is also the `Type` field of a
/// nested Variant envelope on the JSON side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum BuiltInType {
    Boolean = 1,
    SByte = 2,
    Byte = 3,
    Int16 = 4,
    UInt16 = 5,
    Int32 = 6,
    UInt32 = 7,
    Int64 = 8,
    UInt64 = 9,
    Float = 10,
    Double = 11,
    String = 12,
    DateTime = 13,
    Guid = 14,
    ByteString = 15,
    XmlElement = 16,
    NodeId = 17,
    ExpandedNodeId = 18,
    StatusCode = 19,
    QualifiedName = 20,
    LocalizedText = 21,
    ExtensionObject = 22,
    DataValue = 23,
    Variant = 24,
    DiagnosticInfo = 25,
}

impl BuiltInType {
    pub fn from_id(id: u32) -> Option<Self> {
        use BuiltInType::*;
        Some(match id {
            1 => Boolean,
            2 => SByte,
            3 => Byte,
            4 => Int16,
            5 => UInt16,
            6 => Int32,
            7 => UInt32,
            8 => Int64,
            9 => UInt64,
            10 => Float,
            11 => Double,
            12 => String,
            13 => DateTime,
            14 => Guid,
            15 => ByteString,
            16 => XmlElement,
            17 => NodeId,
            18 => ExpandedNodeId,
            19 => StatusCode,
            20 => QualifiedName,
            21 => LocalizedText,
            22 => ExtensionObject,
            23 => DataValue,
            24 => Variant,
            25 => DiagnosticInfo,
            _ => return None,
        })
    }

    #[inline]
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        use BuiltInType::*;
        match self {
            Boolean => "Boolean",
            SByte => "SByte",
            Byte => "Byte",
            Int16 => "Int16",
            UInt16 => "UInt16",
            Int32 => "Int32",
            UInt32 => "UInt32",
            Int64 => "Int64",
            UInt64 => "UInt64",
            Float => "Float",
            Double => "Double",
            String => "String",
            DateTime => "DateTime",
            Guid => "Guid",
            ByteString => "ByteString",
            XmlElement => "XmlElement",
            NodeId => "NodeId",
            ExpandedNodeId => "ExpandedNodeId",
            StatusCode => "StatusCode",
            QualifiedName => "QualifiedName",
            LocalizedText => "LocalizedText",
            ExtensionObject => "ExtensionObject",
            DataValue => "DataValue",
            Variant => "Variant",
            DiagnosticInfo => "DiagnosticInfo",
        }
    }

    /// Integer types, signed and unsigned.
    #[inline]
    pub fn is_integer(self) -> bool {
        (BuiltInType::SByte.id()..=BuiltInType::UInt64.id()).contains(&self.id())
    }

    /// Types a deadband filter can be applied to.
    #[inline]
    pub fn is_numeric(self) -> bool {
        self.is_integer() || matches!(self, BuiltInType::Float | BuiltInType::Double)
    }
}

impl fmt::Display for BuiltInType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Declared value rank of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ValueRank {
    /// -1
    Scalar,
    /// 1
    OneDimension,
    /// n >= 2
    Dimensions(u32),
    /// -2
    #[default]
    Any,
    /// -3
    ScalarOrOneDimension,
    /// 0
    OneOrMoreDimensions,
}

impl ValueRank {
    pub fn from_i32(rank: i32) -> Self {
        match rank {
            -1 => ValueRank::Scalar,
            1 => ValueRank::OneDimension,
            -3 => ValueRank::ScalarOrOneDimension,
            0 => ValueRank::OneOrMoreDimensions,
            n if n >= 2 => ValueRank::Dimensions(n as u32),
            // -2 and anything the server should not send
            _ => ValueRank::Any,
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            ValueRank::Scalar => -1,
            ValueRank::OneDimension => 1,
            ValueRank::Dimensions(n) => n as i32,
            ValueRank::Any => -2,
            ValueRank::ScalarOrOneDimension => -3,
            ValueRank::OneOrMoreDimensions => 0,
        }
    }
}

/// OPC UA status code. Only the codes the gateway branches on are named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StatusCode(pub u32);

impl StatusCode {
    pub const GOOD: StatusCode = StatusCode(0);
    pub const BAD_UNEXPECTED_ERROR: StatusCode = StatusCode(0x8001_0000);
    pub const BAD_INTERNAL_ERROR: StatusCode = StatusCode(0x8002_0000);
    pub const BAD_COMMUNICATION_ERROR: StatusCode = StatusCode(0x8005_0000);
    pub const BAD_TIMEOUT: StatusCode = StatusCode(0x800A_0000);
    pub const BAD_SERVICE_UNSUPPORTED: StatusCode = StatusCode(0x800B_0000);
    pub const BAD_SESSION_ID_INVALID: StatusCode = StatusCode(0x8025_0000);
    pub const BAD_SESSION_CLOSED: StatusCode = StatusCode(0x8026_0000);
    pub const BAD_NODE_ID_INVALID: StatusCode = StatusCode(0x8033_0000);
    pub const BAD_NODE_ID_UNKNOWN: StatusCode = StatusCode(0x8034_0000);
    pub const BAD_ATTRIBUTE_ID_INVALID: StatusCode = StatusCode(0x8035_0000);
    pub const BAD_NOT_READABLE: StatusCode = StatusCode(0x803A_0000);
    pub const BAD_NOT_WRITABLE: StatusCode = StatusCode(0x803B_0000);
    pub const BAD_OUT_OF_RANGE: StatusCode = StatusCode(0x803C_0000);
    pub const BAD_NOT_SUPPORTED: StatusCode = StatusCode(0x803D_0000);
    pub const BAD_MONITORED_ITEM_FILTER_UNSUPPORTED: StatusCode = StatusCode(0x8044_0000);
    pub const BAD_FILTER_NOT_ALLOWED: StatusCode = StatusCode(0x8045_0000);
    pub const BAD_DEADBAND_FILTER_INVALID: StatusCode = StatusCode(0x808E_0000);
    pub const BAD_USER_ACCESS_DENIED: StatusCode = StatusCode(0x801F_0000);
    pub const BAD_TYPE_MISMATCH: StatusCode = StatusCode(0x8074_0000);
    pub const BAD_NO_DATA: StatusCode = StatusCode(0x809B_0000);
    pub const UNCERTAIN: StatusCode = StatusCode(0x4000_0000);

    #[inline]
    pub fn is_good(self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    #[inline]
    pub fn is_uncertain(self) -> bool {
        self.0 & 0xC000_0000 == 0x4000_0000
    }

    #[inline]
    pub fn is_bad(self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    /// Code with the info bits cleared, for comparison against the named constants.
    #[inline]
    pub fn sub_code(self) -> StatusCode {
        StatusCode(self.0 & 0xFFFF_0000)
    }

    pub fn name(self) -> Option<&'static str> {
        Some(match self.sub_code() {
            StatusCode::GOOD => "Good",
            StatusCode::UNCERTAIN => "Uncertain",
            StatusCode::BAD_UNEXPECTED_ERROR => "BadUnexpectedError",
            StatusCode::BAD_INTERNAL_ERROR => "BadInternalError",
            StatusCode::BAD_COMMUNICATION_ERROR => "BadCommunicationError",
            StatusCode::BAD_TIMEOUT => "BadTimeout",
            StatusCode::BAD_SERVICE_UNSUPPORTED => "BadServiceUnsupported",
            StatusCode::BAD_SESSION_ID_INVALID => "BadSessionIdInvalid",
            StatusCode::BAD_SESSION_CLOSED => "BadSessionClosed",
            StatusCode::BAD_NODE_ID_INVALID => "BadNodeIdInvalid",
            StatusCode::BAD_NODE_ID_UNKNOWN => "BadNodeIdUnknown",
            StatusCode::BAD_ATTRIBUTE_ID_INVALID => "BadAttributeIdInvalid",
            StatusCode::BAD_NOT_READABLE => "BadNotReadable",
            StatusCode::BAD_NOT_WRITABLE => "BadNotWritable",
            StatusCode::BAD_OUT_OF_RANGE => "BadOutOfRange",
            StatusCode::BAD_NOT_SUPPORTED => "BadNotSupported",
            StatusCode::BAD_MONITORED_ITEM_FILTER_UNSUPPORTED => {
                "BadMonitoredItemFilterUnsupported"
            }
            StatusCode::BAD_FILTER_NOT_ALLOWED => "BadFilterNotAllowed",
            StatusCode::BAD_DEADBAND_FILTER_INVALID => "BadDeadbandFilterInvalid",
            StatusCode::BAD_USER_ACCESS_DENIED => "BadUserAccessDenied",
            StatusCode::BAD_TYPE_MISMATCH => "BadTypeMismatch",
            StatusCode::BAD_NO_DATA => "BadNoData",
            _ => return None,
        })
    }

    /// Canonical `0xXXXXXXXX` form used in JSON payloads.
    pub fn to_hex(self) -> String {
        format!("0x{:08X}", self.0)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} ({})", self.to_hex()),
            None => f.write_str(&self.to_hex()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeClass {
    Unspecified,
    Object,
    Variable,
    Method,
    ObjectType,
    VariableType,
    ReferenceType,
    DataType,
    View,
}

impl NodeClass {
    pub fn from_i32(v: i32) -> Self {
        match v {
            1 => NodeClass::Object,
            2 => NodeClass::Variable,
            4 => NodeClass::Method,
            8 => NodeClass::ObjectType,
            16 => NodeClass::VariableType,
            32 => NodeClass::ReferenceType,
            64 => NodeClass::DataType,
            128 => NodeClass::View,
            _ => NodeClass::Unspecified,
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            NodeClass::Unspecified => 0,
            NodeClass::Object => 1,
            NodeClass::Variable => 2,
            NodeClass::Method => 4,
            NodeClass::ObjectType => 8,
            NodeClass::VariableType => 16,
            NodeClass::ReferenceType => 32,
            NodeClass::DataType => 64,
            NodeClass::View => 128,
        }
    }
}

/// Node attributes the gateway reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AttributeId {
    NodeId = 1,
    NodeClass = 2,
    BrowseName = 3,
    DisplayName = 4,
    Description = 5,
    Value = 13,
    DataType = 14,
    ValueRank = 15,
    ArrayDimensions = 16,
    AccessLevel = 17,
    UserAccessLevel = 18,
    MinimumSamplingInterval = 19,
}

impl AttributeId {
    #[inline]
    pub fn id(self) -> u32 {
        self as u32
    }
}

/// AccessLevel bit for CurrentWrite.
pub const ACCESS_LEVEL_CURRENT_WRITE: u8 = 0x02;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct QualifiedName {
    pub namespace_index: u16,
    pub name: String,
}

impl QualifiedName {
    pub fn new(namespace_index: u16, name: impl Into<String>) -> Self {
        Self {
            namespace_index,
            name: name.into(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace_index, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct LocalizedText {
    pub locale: String,
    pub text: String,
}

impl LocalizedText {
    pub fn new(locale: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            text: text.into(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new("", text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExpandedNodeId {
    pub node_id: NodeId,
    pub namespace_uri: Option<String>,
    pub server_index: u32,
}

impl From<NodeId> for ExpandedNodeId {
    fn from(node_id: NodeId) -> Self {
        Self {
            node_id,
            namespace_uri: None,
            server_index: 0,
        }
    }
}

impl fmt::Display for ExpandedNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.server_index != 0 {
            write!(f, "svr={};", self.server_index)?;
        }
        match &self.namespace_uri {
            // nsu form replaces the namespace index
            Some(uri) => write!(f, "nsu={uri};{}", self.node_id.identifier_text()),
            None => write!(f, "{}", self.node_id),
        }
    }
}

impl std::str::FromStr for ExpandedNodeId {
    type Err = ua_gateway_error::GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut rest = s;
        let mut server_index = 0;
        if let Some(tail) = rest.strip_prefix("svr=") {
            let (idx, tail) = tail.split_once(';').ok_or_else(|| {
                ua_gateway_error::GatewayError::InvalidNodeId(s.to_string())
            })?;
            server_index = idx
                .parse()
                .map_err(|_| ua_gateway_error::GatewayError::InvalidNodeId(s.to_string()))?;
            rest = tail;
        }
        if let Some(tail) = rest.strip_prefix("nsu=") {
            let (uri, id_part) = tail.split_once(';').ok_or_else(|| {
                ua_gateway_error::GatewayError::InvalidNodeId(s.to_string())
            })?;
            return Ok(Self {
                node_id: id_part.parse()?,
                namespace_uri: Some(uri.to_string()),
                server_index,
            });
        }
        Ok(Self {
            node_id: rest.parse()?,
            namespace_uri: None,
            server_index,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DiagnosticInfo {
    pub symbolic_id: Option<i32>,
    pub namespace_uri: Option<i32>,
    pub locale: Option<i32>,
    pub localized_text: Option<i32>,
    pub additional_info: Option<String>,
    pub inner_status_code: Option<StatusCode>,
    pub inner_diagnostic_info: Option<Box<DiagnosticInfo>>,
}

/// Body of an ExtensionObject.
///
/// `Structure` carries fields already decoded by the transport, in declared
/// order. `Binary` is the raw little-endian encoding that a type dictionary
/// can turn into a JSON object.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtensionBody {
    None,
    Binary(bytes::Bytes),
    Xml(String),
    Structure(Vec<(String, UaValue)>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionObject {
    /// Encoding id (or data type id when the body is already decoded).
    pub type_id: NodeId,
    pub body: ExtensionBody,
}

/// A value with its quality and timestamps, as returned by Read and data change
/// notifications.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataValue {
    pub value: Option<UaValue>,
    pub status: StatusCode,
    pub source_timestamp: Option<DateTime<Utc>>,
    pub server_timestamp: Option<DateTime<Utc>>,
}

impl DataValue {
    pub fn good(value: UaValue) -> Self {
        Self {
            value: Some(value),
            status: StatusCode::GOOD,
            ..Default::default()
        }
    }

    pub fn bad(status: StatusCode) -> Self {
        Self {
            value: None,
            status,
            ..Default::default()
        }
    }
}

/// Well-known namespace 0 node ids.
pub mod ids {
    pub const STRUCTURE: u32 = 22;
    pub const BASE_DATA_TYPE: u32 = 24;
    pub const ENUMERATION: u32 = 29;
    pub const REFERENCES: u32 = 31;
    pub const NON_HIERARCHICAL_REFERENCES: u32 = 32;
    pub const HIERARCHICAL_REFERENCES: u32 = 33;
    pub const HAS_CHILD: u32 = 34;
    pub const ORGANIZES: u32 = 35;
    pub const HAS_EVENT_SOURCE: u32 = 36;
    pub const HAS_MODELLING_RULE: u32 = 37;
    pub const HAS_ENCODING: u32 = 38;
    pub const HAS_DESCRIPTION: u32 = 39;
    pub const HAS_TYPE_DEFINITION: u32 = 40;
    pub const GENERATES_EVENT: u32 = 41;
    pub const AGGREGATES: u32 = 44;
    pub const HAS_SUBTYPE: u32 = 45;
    pub const HAS_PROPERTY: u32 = 46;
    pub const HAS_COMPONENT: u32 = 47;
    pub const HAS_NOTIFIER: u32 = 48;
    pub const HAS_ORDERED_COMPONENT: u32 = 49;
    pub const BASE_OBJECT_TYPE: u32 = 58;
    pub const FOLDER_TYPE: u32 = 61;
    pub const SERVER_STATUS_STATE: u32 = 2259;

    /// Browse names of the reference types a browse result is expected to carry.
    pub fn reference_type_name(id: u32) -> Option<&'static str> {
        Some(match id {
            REFERENCES => "References",
            NON_HIERARCHICAL_REFERENCES => "NonHierarchicalReferences",
            HIERARCHICAL_REFERENCES => "HierarchicalReferences",
            HAS_CHILD => "HasChild",
            ORGANIZES => "Organizes",
            HAS_EVENT_SOURCE => "HasEventSource",
            HAS_MODELLING_RULE => "HasModellingRule",
            HAS_ENCODING => "HasEncoding",
            HAS_DESCRIPTION => "HasDescription",
            HAS_TYPE_DEFINITION => "HasTypeDefinition",
            GENERATES_EVENT => "GeneratesEvent",
            AGGREGATES => "Aggregates",
            HAS_SUBTYPE => "HasSubtype",
            HAS_PROPERTY => "HasProperty",
            HAS_COMPONENT => "HasComponent",
            HAS_NOTIFIER => "HasNotifier",
            HAS_ORDERED_COMPONENT => "HasOrderedComponent",
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_ids_round_trip() {
        for id in 1..=25u32 {
            let t = BuiltInType::from_id(id).unwrap();
            assert_eq!(t.id() as u32, id);
        }
        assert!(BuiltInType::from_id(0).is_none());
        assert!(BuiltInType::from_id(26).is_none());
        assert!(BuiltInType::UInt64.is_integer());
        assert!(!BuiltInType::Float.is_integer());
        assert!(BuiltInType::Double.is_numeric());
        assert!(!BuiltInType::String.is_numeric());
    }

    #[test]
    fn test_value_rank_mapping() {
        assert_eq!(ValueRank::from_i32(-1), ValueRank::Scalar);
        assert_eq!(ValueRank::from_i32(2), ValueRank::Dimensions(2));
        assert_eq!(ValueRank::from_i32(0), ValueRank::OneOrMoreDimensions);
        assert_eq!(ValueRank::from_i32(-3).as_i32(), -3);
    }

    #[test]
    fn test_status_code_classes() {
        assert!(StatusCode::GOOD.is_good());
        assert!(StatusCode::BAD_NODE_ID_UNKNOWN.is_bad());
        assert!(StatusCode(0x4093_0000).is_uncertain());
        assert_eq!(StatusCode(0x8034_0400).sub_code(), StatusCode::BAD_NODE_ID_UNKNOWN);
        assert_eq!(StatusCode::BAD_NOT_WRITABLE.to_hex(), "0x803B0000");
    }

    #[test]
    fn test_expanded_node_id_text_forms() {
        let e: ExpandedNodeId = "svr=1;nsu=urn:demo;i=42".parse().unwrap();
        assert_eq!(e.server_index, 1);
        assert_eq!(e.namespace_uri.as_deref(), Some("urn:demo"));
        assert_eq!(e.node_id, NodeId::numeric(0, 42));
        assert_eq!(e.to_string(), "svr=1;nsu=urn:demo;i=42");

        let plain: ExpandedNodeId = "ns=2;s=Pump".parse().unwrap();
        assert_eq!(plain.to_string(), "ns=2;s=Pump");
    }
}
