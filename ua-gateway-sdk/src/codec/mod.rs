//! JSON codec for OPC UA values.
//!
//! Every encoded value is paired with a JSON Schema describing it. Array
//! bounds in the schema are exact: a 1-D array of length n gets
//! `minItems = maxItems = n`, a matrix nests one array schema per dimension.
//!
//! Decoding is strict. The JSON payload is checked against the declared
//! built-in type and value rank; no implicit coercion is ever applied.

mod decode;
mod encode;
pub mod schema;

use crate::{
    structure::TypeDictionary,
    types::{BuiltInType, ValueRank},
    value::UaValue,
};
use serde_json::Value;
use std::sync::Arc;
use ua_gateway_error::{GatewayError, GatewayResult};

pub const DEFAULT_MAX_NESTING_DEPTH: usize = 64;

/// Labels of an enumeration data type, resolved from `EnumStrings` or
/// `EnumValues`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnumDefinition {
    entries: Vec<(i64, String)>,
}

impl EnumDefinition {
    /// `EnumStrings`: the label index is the value.
    pub fn from_strings<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: labels
                .into_iter()
                .enumerate()
                .map(|(i, s)| (i as i64, s.into()))
                .collect(),
        }
    }

    /// `EnumValues`: explicit value/label pairs.
    pub fn from_values(entries: Vec<(i64, String)>) -> Self {
        Self { entries }
    }

    /// First label declared for `value`, or empty when none matches.
    pub fn label(&self, value: i64) -> &str {
        self.entries
            .iter()
            .find(|(v, _)| *v == value)
            .map(|(_, s)| s.as_str())
            .unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(i64, String)] {
        &self.entries
    }
}

/// Dictionary entry a binary ExtensionObject body is decoded with.
#[derive(Debug, Clone)]
pub struct StructureBinding {
    pub dictionary: Arc<TypeDictionary>,
    pub type_name: String,
}

/// Type information gathered from the node, used to label and materialize
/// values the wire form alone cannot describe.
#[derive(Debug, Clone, Default)]
pub struct ValueContext {
    pub enumeration: Option<Arc<EnumDefinition>>,
    pub structure: Option<StructureBinding>,
}

impl ValueContext {
    pub fn enumeration(def: Arc<EnumDefinition>) -> Self {
        Self {
            enumeration: Some(def),
            structure: None,
        }
    }

    pub fn structure(dictionary: Arc<TypeDictionary>, type_name: impl Into<String>) -> Self {
        Self {
            enumeration: None,
            structure: Some(StructureBinding {
                dictionary,
                type_name: type_name.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeKind {
    #[default]
    Plain,
    /// Subtype of Enumeration (i=29), carried as Int32.
    Enumeration,
    /// Subtype of Structure (i=22), carried as ExtensionObject.
    Structure,
}

/// Declared type of a variable, the decode target for writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredType {
    pub built_in: BuiltInType,
    pub value_rank: ValueRank,
    pub array_dimensions: Option<Vec<u32>>,
    pub kind: TypeKind,
}

impl DeclaredType {
    pub fn scalar(built_in: BuiltInType) -> Self {
        Self {
            built_in,
            value_rank: ValueRank::Scalar,
            array_dimensions: None,
            kind: TypeKind::Plain,
        }
    }

    pub fn with_rank(mut self, value_rank: ValueRank) -> Self {
        self.value_rank = value_rank;
        self
    }

    pub fn with_dimensions(mut self, dims: Vec<u32>) -> Self {
        self.array_dimensions = Some(dims);
        self
    }

    pub fn with_kind(mut self, kind: TypeKind) -> Self {
        self.kind = kind;
        self
    }
}

/// A value and the schema that describes it.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedValue {
    pub value: Value,
    pub schema: Value,
}

/// Bidirectional JSON codec, bounded by a nesting depth shared by the
/// Variant, ExtensionObject, DiagnosticInfo and structure paths.
#[derive(Debug, Clone, Copy)]
pub struct ValueCodec {
    max_depth: usize,
}

impl Default for ValueCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_NESTING_DEPTH)
    }
}

impl ValueCodec {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    #[inline]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Encode a value read from a server.
    pub fn encode(&self, value: &UaValue, ctx: &ValueContext) -> GatewayResult<EncodedValue> {
        let (value, schema) = encode::Encoder::new(self.max_depth, ctx).value(value, 0)?;
        Ok(EncodedValue { value, schema })
    }

    /// Decode a caller-supplied JSON payload against the node's declared type.
    pub fn decode(&self, json: &Value, declared: &DeclaredType) -> GatewayResult<UaValue> {
        decode::Decoder::new(self.max_depth).root(json, declared)
    }

    /// Encode a value met `depth` levels inside a structure body, without
    /// enumeration or structure bindings.
    pub(crate) fn encode_nested(
        max_depth: usize,
        value: &UaValue,
        depth: usize,
    ) -> GatewayResult<(Value, Value)> {
        encode::Encoder::new(max_depth, &ValueContext::default()).value(value, depth)
    }

    #[inline]
    pub(crate) fn check_depth(max_depth: usize, depth: usize) -> GatewayResult<()> {
        if depth >= max_depth {
            return Err(GatewayError::EncodingLimitExceeded { max_depth });
        }
        Ok(())
    }
}

/// Float encoding; non-finite values have no JSON number form.
pub(crate) fn float_json(f: f64) -> Value {
    if f.is_nan() {
        Value::from("NaN")
    } else if f == f64::INFINITY {
        Value::from("Infinity")
    } else if f == f64::NEG_INFINITY {
        Value::from("-Infinity")
    } else {
        Value::from(f)
    }
}

/// Short JSON kind name for error messages.
pub(crate) fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        node_id::NodeId,
        types::{
            DiagnosticInfo, ExpandedNodeId, ExtensionBody, ExtensionObject, LocalizedText,
            QualifiedName, StatusCode,
        },
        value::UaArray,
    };
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn round_trip(value: UaValue, declared: DeclaredType) {
        let codec = ValueCodec::default();
        let encoded = codec.encode(&value, &ValueContext::default()).unwrap();
        let decoded = codec.decode(&encoded.value, &declared).unwrap();
        assert_eq!(decoded, value, "json was {}", encoded.value);
    }

    fn samples() -> Vec<UaValue> {
        vec![
            UaValue::Boolean(true),
            UaValue::SByte(i8::MIN),
            UaValue::Byte(u8::MAX),
            UaValue::Int16(-300),
            UaValue::UInt16(60_000),
            UaValue::Int32(i32::MIN),
            UaValue::UInt32(u32::MAX),
            UaValue::Int64(i64::MIN),
            UaValue::UInt64(u64::MAX),
            UaValue::Float(1.5),
            UaValue::Double(-2.25e10),
            UaValue::Double(f64::INFINITY),
            UaValue::String("pump".into()),
            UaValue::DateTime(Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()),
            UaValue::Guid(uuid::Uuid::from_u128(0x0908_7e75_8e5e_499b_954f_f2a9_603d_b28a)),
            UaValue::ByteString(Bytes::from_static(&[0, 1, 0xFE])),
            UaValue::NodeId(NodeId::string(2, "Line1.Pump")),
            UaValue::ExpandedNodeId(ExpandedNodeId {
                node_id: NodeId::numeric(0, 85),
                namespace_uri: Some("urn:demo".into()),
                server_index: 2,
            }),
            UaValue::StatusCode(StatusCode::BAD_OUT_OF_RANGE),
            UaValue::QualifiedName(QualifiedName::new(1, "Speed")),
            UaValue::LocalizedText(LocalizedText::text("Speed")),
            UaValue::DiagnosticInfo(Box::new(DiagnosticInfo {
                symbolic_id: Some(3),
                additional_info: Some("detail".into()),
                inner_status_code: Some(StatusCode::BAD_TIMEOUT),
                inner_diagnostic_info: Some(Box::default()),
                ..Default::default()
            })),
            UaValue::ExtensionObject(ExtensionObject {
                type_id: NodeId::numeric(2, 5001),
                body: ExtensionBody::Binary(Bytes::from_static(&[1, 2, 3])),
            }),
            UaValue::ExtensionObject(ExtensionObject {
                type_id: NodeId::numeric(2, 5002),
                body: ExtensionBody::Structure(vec![
                    ("Low".into(), UaValue::Double(0.0)),
                    ("High".into(), UaValue::Double(100.0)),
                ]),
            }),
            UaValue::Variant(Box::new(UaValue::array(
                BuiltInType::UInt16,
                vec![UaValue::UInt16(1), UaValue::UInt16(2)],
            ))),
        ]
    }

    #[test]
    fn test_scalar_round_trip() {
        for v in samples() {
            let t = v.built_in_type().unwrap();
            round_trip(v, DeclaredType::scalar(t));
        }
    }

    #[test]
    fn test_array_round_trip() {
        for v in samples() {
            let t = v.built_in_type().unwrap();
            let array = UaValue::array(t, vec![v.clone(), v]);
            round_trip(array, DeclaredType::scalar(t).with_rank(ValueRank::OneDimension));
        }
    }

    #[test]
    fn test_matrix_round_trip_and_bounds() {
        let values = (0..24).map(UaValue::Int32).collect::<Vec<_>>();
        let m = UaArray::matrix(BuiltInType::Int32, values, vec![2, 3, 4]).unwrap();
        let value = UaValue::Array(Box::new(m));

        let encoded = ValueCodec::default()
            .encode(&value, &ValueContext::default())
            .unwrap();
        let mut schema = &encoded.schema;
        for extent in [2, 3, 4] {
            assert_eq!(schema["minItems"], json!(extent));
            assert_eq!(schema["maxItems"], json!(extent));
            schema = &schema["items"];
        }
        assert_eq!(schema["type"], json!("integer"));

        round_trip(
            value,
            DeclaredType::scalar(BuiltInType::Int32).with_rank(ValueRank::Dimensions(3)),
        );
    }

    #[test]
    fn test_empty_matrix_in_variant_round_trips() {
        let m = UaArray::matrix(BuiltInType::Int32, Vec::new(), vec![0, 3]).unwrap();
        let value = UaValue::Variant(Box::new(UaValue::Array(Box::new(m))));

        let encoded = ValueCodec::default()
            .encode(&value, &ValueContext::default())
            .unwrap();
        assert_eq!(
            encoded.value,
            json!({ "Type": 6, "Body": [], "Dimensions": [0, 3] })
        );
        round_trip(value, DeclaredType::scalar(BuiltInType::Variant));
    }

    #[test]
    fn test_nan_encodes_as_string() {
        let codec = ValueCodec::default();
        let encoded = codec
            .encode(&UaValue::Double(f64::NAN), &ValueContext::default())
            .unwrap();
        assert_eq!(encoded.value, json!("NaN"));
        let decoded = codec
            .decode(&encoded.value, &DeclaredType::scalar(BuiltInType::Double))
            .unwrap();
        assert!(matches!(decoded, UaValue::Double(f) if f.is_nan()));
    }

    #[test]
    fn test_enum_strings_label() {
        let def = Arc::new(EnumDefinition::from_strings(["Off", "On"]));
        let encoded = ValueCodec::default()
            .encode(&UaValue::Int32(1), &ValueContext::enumeration(def))
            .unwrap();
        assert_eq!(encoded.value, json!({ "EnumValue": 1, "EnumLabel": "On" }));
    }

    #[test]
    fn test_string_written_to_int32_fails() {
        let err = ValueCodec::default()
            .decode(&json!("42"), &DeclaredType::scalar(BuiltInType::Int32))
            .unwrap_err();
        assert!(matches!(err, GatewayError::ValueTypeMismatch { .. }));
    }
}
