use super::{json_kind, DeclaredType, TypeKind, ValueCodec};
use crate::{
    node_id::NodeId,
    types::{
        BuiltInType, DiagnosticInfo, ExpandedNodeId, ExtensionBody, ExtensionObject,
        LocalizedText, QualifiedName, StatusCode, ValueRank,
    },
    value::{UaArray, UaValue},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use ua_gateway_error::{GatewayError, GatewayResult};
use uuid::Uuid;

pub(super) struct Decoder {
    max_depth: usize,
}

impl Decoder {
    pub(super) fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub(super) fn root(&self, json: &Value, declared: &DeclaredType) -> GatewayResult<UaValue> {
        let path = "value";
        if declared.kind == TypeKind::Structure && !is_extension_envelope(json) {
            return Err(GatewayError::UnsupportedEncoding(
                "custom structures can only be written as an ExtensionObject envelope".into(),
            ));
        }
        let dims = match declared.value_rank {
            ValueRank::Scalar => 0,
            ValueRank::OneDimension => 1,
            ValueRank::Dimensions(n) => n as usize,
            ValueRank::ScalarOrOneDimension => usize::from(json.is_array()),
            ValueRank::Any => declared_rank(declared).unwrap_or_else(|| array_depth(json)),
            ValueRank::OneOrMoreDimensions => {
                if !json.is_array() {
                    return Err(GatewayError::mismatch(path, "array", json_kind(json)));
                }
                declared_rank(declared).unwrap_or_else(|| array_depth(json))
            }
        };
        if dims == 0 {
            return self.scalar(json, declared.built_in, declared.kind, path, 0);
        }
        let hint = declared.array_dimensions.as_deref();
        let value = self.array(json, declared.built_in, declared.kind, dims, hint, path, 0)?;
        if let (Some(expected), UaValue::Array(array)) = (&declared.array_dimensions, &value) {
            check_fixed_dimensions(expected, &array.extents(), path)?;
        }
        Ok(value)
    }

    /// `hint` supplies the extents of levels that an empty outer level
    /// leaves unobserved.
    #[allow(clippy::too_many_arguments)]
    fn array(
        &self,
        json: &Value,
        element: BuiltInType,
        kind: TypeKind,
        dims: usize,
        hint: Option<&[u32]>,
        path: &str,
        depth: usize,
    ) -> GatewayResult<UaValue> {
        let mut extents: Vec<Option<u32>> = vec![None; dims];
        let mut values = Vec::new();
        self.collect(json, element, kind, 0, &mut extents, &mut values, path, depth)?;
        let mut extents = extents.into_iter().map(|e| e.unwrap_or(0)).collect::<Vec<_>>();
        if let Some(hint) = hint.filter(|h| h.len() == dims) {
            if let Some(empty) = extents.iter().position(|e| *e == 0) {
                for (extent, declared) in extents.iter_mut().zip(hint).skip(empty + 1) {
                    *extent = *declared;
                }
            }
        }
        let array = if dims == 1 {
            UaArray::new(element, values)
        } else {
            UaArray::matrix(element, values, extents)?
        };
        Ok(UaValue::Array(Box::new(array)))
    }

    /// Walk `dims` levels of nested arrays, recording extents and rejecting
    /// rows whose length disagrees with the first row seen at that level.
    #[allow(clippy::too_many_arguments)]
    fn collect(
        &self,
        json: &Value,
        element: BuiltInType,
        kind: TypeKind,
        level: usize,
        extents: &mut [Option<u32>],
        out: &mut Vec<UaValue>,
        path: &str,
        depth: usize,
    ) -> GatewayResult<()> {
        let items = json
            .as_array()
            .ok_or_else(|| GatewayError::mismatch(path, "array", json_kind(json)))?;
        let len = items.len() as u32;
        match extents[level] {
            None => extents[level] = Some(len),
            Some(expected) if expected != len => {
                return Err(GatewayError::mismatch(
                    path,
                    format!("array of {expected} elements (rectangular matrix)"),
                    format!("array of {len} elements"),
                ));
            }
            Some(_) => {}
        }
        for (i, item) in items.iter().enumerate() {
            let item_path = format!("{path}[{i}]");
            if level + 1 < extents.len() {
                self.collect(item, element, kind, level + 1, extents, out, &item_path, depth)?;
            } else {
                out.push(self.scalar(item, element, kind, &item_path, depth)?);
            }
        }
        // an empty row leaves deeper extents unknown; later rows must agree
        if items.is_empty() {
            for extent in extents.iter_mut().skip(level + 1) {
                if extent.is_none() {
                    *extent = Some(0);
                }
            }
        }
        Ok(())
    }

    fn scalar(
        &self,
        json: &Value,
        t: BuiltInType,
        kind: TypeKind,
        path: &str,
        depth: usize,
    ) -> GatewayResult<UaValue> {
        if kind == TypeKind::Enumeration {
            return enumeration(json, path);
        }
        use BuiltInType as B;
        Ok(match t {
            B::Boolean => UaValue::Boolean(
                json.as_bool()
                    .ok_or_else(|| GatewayError::mismatch(path, "boolean", json_kind(json)))?,
            ),
            B::SByte => UaValue::SByte(signed(json, path, "SByte")?),
            B::Byte => UaValue::Byte(unsigned(json, path, "Byte")?),
            B::Int16 => UaValue::Int16(signed(json, path, "Int16")?),
            B::UInt16 => UaValue::UInt16(unsigned(json, path, "UInt16")?),
            B::Int32 => UaValue::Int32(signed(json, path, "Int32")?),
            B::UInt32 => UaValue::UInt32(unsigned(json, path, "UInt32")?),
            B::Int64 => UaValue::Int64(signed(json, path, "Int64")?),
            B::UInt64 => UaValue::UInt64(unsigned(json, path, "UInt64")?),
            B::Float => {
                let f = float(json, path)?;
                if f.is_finite() && f.abs() > f32::MAX as f64 {
                    return Err(GatewayError::out_of_range(path, "Float"));
                }
                UaValue::Float(f as f32)
            }
            B::Double => UaValue::Double(float(json, path)?),
            B::String => UaValue::String(string(json, path, "string")?.to_string()),
            B::DateTime => {
                let s = string(json, path, "RFC 3339 date-time string")?;
                let dt = DateTime::parse_from_rfc3339(s).map_err(|_| {
                    GatewayError::mismatch(path, "RFC 3339 date-time string", format!("'{s}'"))
                })?;
                UaValue::DateTime(dt.with_timezone(&Utc))
            }
            B::Guid => {
                let s = string(json, path, "GUID string")?;
                UaValue::Guid(Uuid::parse_str(s).map_err(|_| {
                    GatewayError::mismatch(path, "GUID string", format!("'{s}'"))
                })?)
            }
            B::ByteString => {
                let s = string(json, path, "hex string")?;
                UaValue::ByteString(Bytes::from(hex::decode(s).map_err(|_| {
                    GatewayError::mismatch(path, "hex string", format!("'{s}'"))
                })?))
            }
            B::XmlElement => {
                return Err(GatewayError::UnsupportedEncoding(format!(
                    "XmlElement at '{path}'"
                )))
            }
            B::DataValue => {
                return Err(GatewayError::UnsupportedEncoding(format!(
                    "DataValue at '{path}'"
                )))
            }
            B::NodeId => UaValue::NodeId(node_id(json, path)?),
            B::ExpandedNodeId => UaValue::ExpandedNodeId(expanded_node_id(json, path)?),
            B::StatusCode => UaValue::StatusCode(status_code(json, path)?),
            B::QualifiedName => UaValue::QualifiedName(qualified_name(json, path)?),
            B::LocalizedText => UaValue::LocalizedText(localized_text(json, path)?),
            B::DiagnosticInfo => {
                ValueCodec::check_depth(self.max_depth, depth)?;
                UaValue::DiagnosticInfo(Box::new(self.diagnostic_info(json, path, depth + 1)?))
            }
            B::ExtensionObject => {
                ValueCodec::check_depth(self.max_depth, depth)?;
                UaValue::ExtensionObject(self.extension_object(json, path, depth + 1)?)
            }
            B::Variant => {
                ValueCodec::check_depth(self.max_depth, depth)?;
                self.variant(json, path, depth + 1)?
            }
        })
    }

    fn variant(&self, json: &Value, path: &str, depth: usize) -> GatewayResult<UaValue> {
        Ok(UaValue::Variant(Box::new(self.variant_body(json, path, depth)?)))
    }

    /// Value carried by a `{Type, Body}` envelope.
    fn variant_body(&self, json: &Value, path: &str, depth: usize) -> GatewayResult<UaValue> {
        let obj = object(json, path, "Variant envelope {Type, Body}")?;
        let type_path = format!("{path}.Type");
        let type_id = field(obj, "Type", path)?
            .as_u64()
            .ok_or_else(|| GatewayError::mismatch(&type_path, "built-in type id", "non-integer"))?;
        let body = field(obj, "Body", path)?;
        let body_path = format!("{path}.Body");
        if type_id == 0 {
            if !body.is_null() {
                return Err(GatewayError::mismatch(&body_path, "null", json_kind(body)));
            }
            return Ok(UaValue::Empty);
        }
        let t = u32::try_from(type_id)
            .ok()
            .and_then(BuiltInType::from_id)
            .ok_or_else(|| GatewayError::out_of_range(&type_path, "built-in type id 0..=25"))?;
        let dimensions = match obj.get("Dimensions") {
            Some(d) => Some(variant_dimensions(d, &format!("{path}.Dimensions"))?),
            None => None,
        };
        match dimensions {
            Some(d) if d.len() > 1 => {
                let value =
                    self.array(body, t, TypeKind::Plain, d.len(), Some(&d), &body_path, depth)?;
                if let UaValue::Array(array) = &value {
                    check_fixed_dimensions(&d, &array.extents(), &body_path)?;
                }
                Ok(value)
            }
            _ => match array_depth(body) {
                0 => self.scalar(body, t, TypeKind::Plain, &body_path, depth),
                dims => self.array(body, t, TypeKind::Plain, dims, None, &body_path, depth),
            },
        }
    }

    fn extension_object(
        &self,
        json: &Value,
        path: &str,
        depth: usize,
    ) -> GatewayResult<ExtensionObject> {
        let obj = object(json, path, "ExtensionObject envelope {TypeId, Encoding, Body}")?;
        let type_id = node_id(field(obj, "TypeId", path)?, &format!("{path}.TypeId"))?;
        let encoding_path = format!("{path}.Encoding");
        let encoding = string(field(obj, "Encoding", path)?, &encoding_path, "encoding name")?;
        let body = field(obj, "Body", path)?;
        let body_path = format!("{path}.Body");
        let body = match encoding {
            "None" => {
                if !body.is_null() {
                    return Err(GatewayError::mismatch(&body_path, "null", json_kind(body)));
                }
                ExtensionBody::None
            }
            "Binary" => {
                let s = string(body, &body_path, "hex string")?;
                ExtensionBody::Binary(Bytes::from(hex::decode(s).map_err(|_| {
                    GatewayError::mismatch(&body_path, "hex string", format!("'{s}'"))
                })?))
            }
            "Xml" => {
                return Err(GatewayError::UnsupportedEncoding(format!(
                    "XML ExtensionObject body at '{body_path}'"
                )))
            }
            "Structure" => {
                let fields = object(body, &body_path, "object of Variant envelopes")?;
                let mut out = Vec::with_capacity(fields.len());
                for (name, value) in fields {
                    let field_path = format!("{body_path}.{name}");
                    ValueCodec::check_depth(self.max_depth, depth)?;
                    let inner = self.variant_body(value, &field_path, depth + 1)?;
                    out.push((name.clone(), inner));
                }
                ExtensionBody::Structure(out)
            }
            other => {
                return Err(GatewayError::mismatch(
                    &encoding_path,
                    "Binary, Xml, None or Structure",
                    format!("'{other}'"),
                ))
            }
        };
        Ok(ExtensionObject { type_id, body })
    }

    fn diagnostic_info(
        &self,
        json: &Value,
        path: &str,
        depth: usize,
    ) -> GatewayResult<DiagnosticInfo> {
        let obj = object(json, path, "DiagnosticInfo object")?;
        let opt_i32 = |key: &str| -> GatewayResult<Option<i32>> {
            let v = field(obj, key, path)?;
            if v.is_null() {
                return Ok(None);
            }
            signed::<i32>(v, &format!("{path}.{key}"), "Int32").map(Some)
        };
        let symbolic_id = opt_i32("SymbolicId")?;
        let namespace_uri = opt_i32("NamespaceUri")?;
        let locale = opt_i32("Locale")?;
        let localized_text = opt_i32("LocalizedText")?;

        let additional = field(obj, "AdditionalInfo", path)?;
        let additional_info = if additional.is_null() {
            None
        } else {
            Some(string(additional, &format!("{path}.AdditionalInfo"), "string")?.to_string())
        };

        let status = field(obj, "InnerStatusCode", path)?;
        let inner_status_code = if status.is_null() {
            None
        } else {
            Some(status_code(status, &format!("{path}.InnerStatusCode"))?)
        };

        let inner = field(obj, "InnerDiagnosticInfo", path)?;
        let inner_diagnostic_info = if inner.is_null() {
            None
        } else {
            ValueCodec::check_depth(self.max_depth, depth)?;
            Some(Box::new(self.diagnostic_info(
                inner,
                &format!("{path}.InnerDiagnosticInfo"),
                depth + 1,
            )?))
        };

        Ok(DiagnosticInfo {
            symbolic_id,
            namespace_uri,
            locale,
            localized_text,
            additional_info,
            inner_status_code,
            inner_diagnostic_info,
        })
    }
}

/// Rank fixed by the node's ArrayDimensions attribute.
fn declared_rank(declared: &DeclaredType) -> Option<usize> {
    declared
        .array_dimensions
        .as_ref()
        .map(Vec::len)
        .filter(|n| *n > 0)
}

fn variant_dimensions(json: &Value, path: &str) -> GatewayResult<Vec<u32>> {
    let items = json
        .as_array()
        .ok_or_else(|| GatewayError::mismatch(path, "array of extents", json_kind(json)))?;
    items
        .iter()
        .enumerate()
        .map(|(i, d)| unsigned::<u32>(d, &format!("{path}[{i}]"), "UInt32"))
        .collect()
}

/// Nesting depth of JSON arrays, following first elements. No scalar encodes
/// as a JSON array, so every array level is a dimension.
fn array_depth(json: &Value) -> usize {
    let mut depth = 0;
    let mut cursor = json;
    while let Value::Array(items) = cursor {
        depth += 1;
        match items.first() {
            Some(first) => cursor = first,
            None => break,
        }
    }
    depth
}

fn is_extension_envelope(json: &Value) -> bool {
    match json {
        Value::Object(obj) => obj.contains_key("TypeId") && obj.contains_key("Encoding"),
        Value::Array(items) => items.iter().all(is_extension_envelope),
        _ => false,
    }
}

fn check_fixed_dimensions(expected: &[u32], actual: &[u32], path: &str) -> GatewayResult<()> {
    if expected.len() != actual.len() {
        return Ok(());
    }
    for (i, (e, a)) in expected.iter().zip(actual).enumerate() {
        // 0 declares an unbounded dimension
        if *e != 0 && e != a {
            return Err(GatewayError::out_of_range(
                path,
                format!("ArrayDimensions[{i}] = {e}, got {a}"),
            ));
        }
    }
    Ok(())
}

fn object<'v>(json: &'v Value, path: &str, expected: &str) -> GatewayResult<&'v Map<String, Value>> {
    json.as_object()
        .ok_or_else(|| GatewayError::mismatch(path, expected, json_kind(json)))
}

fn field<'v>(obj: &'v Map<String, Value>, key: &str, path: &str) -> GatewayResult<&'v Value> {
    obj.get(key)
        .ok_or_else(|| GatewayError::mismatch(format!("{path}.{key}"), "required field", "missing"))
}

fn string<'v>(json: &'v Value, path: &str, expected: &str) -> GatewayResult<&'v str> {
    json.as_str()
        .ok_or_else(|| GatewayError::mismatch(path, expected, json_kind(json)))
}

fn signed<T: TryFrom<i64>>(json: &Value, path: &str, target: &str) -> GatewayResult<T> {
    match json {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                T::try_from(i).map_err(|_| GatewayError::out_of_range(path, target))
            } else if n.as_u64().is_some() {
                Err(GatewayError::out_of_range(path, target))
            } else {
                Err(GatewayError::mismatch(path, "integer", "number with fraction"))
            }
        }
        other => Err(GatewayError::mismatch(path, "integer", json_kind(other))),
    }
}

fn unsigned<T: TryFrom<u64>>(json: &Value, path: &str, target: &str) -> GatewayResult<T> {
    match json {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                T::try_from(u).map_err(|_| GatewayError::out_of_range(path, target))
            } else if n.as_i64().is_some() {
                Err(GatewayError::out_of_range(path, target))
            } else {
                Err(GatewayError::mismatch(path, "integer", "number with fraction"))
            }
        }
        other => Err(GatewayError::mismatch(path, "integer", json_kind(other))),
    }
}

fn float(json: &Value, path: &str) -> GatewayResult<f64> {
    match json {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| GatewayError::mismatch(path, "number", "unrepresentable number")),
        Value::String(s) => match s.as_str() {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            _ => Err(GatewayError::mismatch(path, "number", "string")),
        },
        other => Err(GatewayError::mismatch(path, "number", json_kind(other))),
    }
}

fn enumeration(json: &Value, path: &str) -> GatewayResult<UaValue> {
    let value = match json {
        Value::Object(obj) => {
            let v = field(obj, "EnumValue", path)?;
            signed::<i32>(v, &format!("{path}.EnumValue"), "Int32")?
        }
        other => signed::<i32>(other, path, "Int32")?,
    };
    Ok(UaValue::Int32(value))
}

fn node_id(json: &Value, path: &str) -> GatewayResult<NodeId> {
    let s = string(json, path, "NodeId string")?;
    s.parse()
        .map_err(|_| GatewayError::mismatch(path, "NodeId string", format!("'{s}'")))
}

fn expanded_node_id(json: &Value, path: &str) -> GatewayResult<ExpandedNodeId> {
    match json {
        Value::String(s) => s.parse().map_err(|_| {
            GatewayError::mismatch(path, "ExpandedNodeId string", format!("'{s}'"))
        }),
        Value::Object(obj) => {
            let node = node_id(field(obj, "NodeId", path)?, &format!("{path}.NodeId"))?;
            let uri = field(obj, "NamespaceUri", path)?;
            let namespace_uri = if uri.is_null() {
                None
            } else {
                Some(string(uri, &format!("{path}.NamespaceUri"), "string")?.to_string())
            };
            let server_index = unsigned::<u32>(
                field(obj, "ServerIndex", path)?,
                &format!("{path}.ServerIndex"),
                "UInt32",
            )?;
            Ok(ExpandedNodeId {
                node_id: node,
                namespace_uri,
                server_index,
            })
        }
        other => Err(GatewayError::mismatch(
            path,
            "ExpandedNodeId string or object",
            json_kind(other),
        )),
    }
}

fn status_code(json: &Value, path: &str) -> GatewayResult<StatusCode> {
    let parse_hex = |s: &str| {
        s.strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .and_then(|h| u32::from_str_radix(h, 16).ok())
            .map(StatusCode)
            .ok_or_else(|| GatewayError::mismatch(path, "0xXXXXXXXX status code", format!("'{s}'")))
    };
    match json {
        Value::String(s) => parse_hex(s),
        Value::Object(obj) => {
            let code = unsigned::<u32>(field(obj, "Code", path)?, &format!("{path}.Code"), "UInt32")?;
            Ok(StatusCode(code))
        }
        other => Err(GatewayError::mismatch(
            path,
            "StatusCode string or object",
            json_kind(other),
        )),
    }
}

fn qualified_name(json: &Value, path: &str) -> GatewayResult<QualifiedName> {
    match json {
        Value::String(s) => {
            let (ns, name) = s
                .split_once(':')
                .and_then(|(ns, name)| ns.parse::<u16>().ok().map(|ns| (ns, name)))
                .ok_or_else(|| {
                    GatewayError::mismatch(path, "'<ns>:<name>' qualified name", format!("'{s}'"))
                })?;
            Ok(QualifiedName::new(ns, name))
        }
        Value::Object(obj) => {
            let namespace_index = unsigned::<u16>(
                field(obj, "NamespaceIndex", path)?,
                &format!("{path}.NamespaceIndex"),
                "UInt16",
            )?;
            let name = string(field(obj, "Name", path)?, &format!("{path}.Name"), "string")?;
            Ok(QualifiedName::new(namespace_index, name))
        }
        other => Err(GatewayError::mismatch(
            path,
            "QualifiedName string or object",
            json_kind(other),
        )),
    }
}

fn localized_text(json: &Value, path: &str) -> GatewayResult<LocalizedText> {
    match json {
        Value::String(s) => Ok(LocalizedText::text(s.as_str())),
        Value::Object(obj) => {
            let locale = string(field(obj, "Locale", path)?, &format!("{path}.Locale"), "string")?;
            let text = string(field(obj, "Text", path)?, &format!("{path}.Text"), "string")?;
            Ok(LocalizedText::new(locale, text))
        }
        other => Err(GatewayError::mismatch(
            path,
            "LocalizedText string or object",
            json_kind(other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(json: Value, declared: DeclaredType) -> GatewayResult<UaValue> {
        Decoder::new(64).root(&json, &declared)
    }

    #[test]
    fn test_string_into_int32_is_mismatch() {
        let err = decode(json!("abc"), DeclaredType::scalar(BuiltInType::Int32)).unwrap_err();
        match err {
            GatewayError::ValueTypeMismatch { path, expected, found } => {
                assert_eq!(path, "value");
                assert_eq!(expected, "integer");
                assert_eq!(found, "string");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_integer_width_is_checked() {
        assert!(matches!(
            decode(json!(300), DeclaredType::scalar(BuiltInType::Byte)),
            Err(GatewayError::OutOfRange { .. })
        ));
        assert!(matches!(
            decode(json!(-1), DeclaredType::scalar(BuiltInType::UInt32)),
            Err(GatewayError::OutOfRange { .. })
        ));
        assert!(matches!(
            decode(json!(1.5), DeclaredType::scalar(BuiltInType::Int64)),
            Err(GatewayError::ValueTypeMismatch { .. })
        ));
        assert_eq!(
            decode(json!(u64::MAX), DeclaredType::scalar(BuiltInType::UInt64)).unwrap(),
            UaValue::UInt64(u64::MAX)
        );
    }

    #[test]
    fn test_boolean_never_coerced() {
        assert!(decode(json!(1), DeclaredType::scalar(BuiltInType::Boolean)).is_err());
        assert!(decode(json!("true"), DeclaredType::scalar(BuiltInType::Boolean)).is_err());
    }

    #[test]
    fn test_ragged_matrix_rejected() {
        let declared = DeclaredType::scalar(BuiltInType::Int32).with_rank(ValueRank::Dimensions(2));
        let err = decode(json!([[1, 2], [3]]), declared).unwrap_err();
        assert!(matches!(err, GatewayError::ValueTypeMismatch { ref path, .. } if path == "value[1]"));
    }

    #[test]
    fn test_empty_matrix_keeps_declared_rank() {
        let declared = DeclaredType::scalar(BuiltInType::Int32)
            .with_rank(ValueRank::OneOrMoreDimensions)
            .with_dimensions(vec![0, 3]);
        let UaValue::Array(array) = decode(json!([]), declared).unwrap() else {
            panic!("expected an array");
        };
        assert!(array.values.is_empty());
        assert_eq!(array.extents(), vec![0, 3]);

        let declared = DeclaredType::scalar(BuiltInType::Int32).with_rank(ValueRank::Dimensions(2));
        let UaValue::Array(array) = decode(json!([]), declared).unwrap() else {
            panic!("expected an array");
        };
        assert_eq!(array.extents().len(), 2);
    }

    #[test]
    fn test_variant_dimensions_restore_empty_matrix() {
        let declared = DeclaredType::scalar(BuiltInType::Variant);
        let value = decode(json!({ "Type": 6, "Body": [], "Dimensions": [0, 3] }), declared.clone())
            .unwrap();
        let UaValue::Variant(inner) = value else {
            panic!("expected a variant");
        };
        let UaValue::Array(array) = *inner else {
            panic!("expected an array");
        };
        assert_eq!(array.extents(), vec![0, 3]);

        let err = decode(
            json!({ "Type": 6, "Body": [[1, 2]], "Dimensions": [1, 3] }),
            declared,
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::OutOfRange { .. }), "{err}");
    }

    #[test]
    fn test_fixed_dimensions_enforced() {
        let declared = DeclaredType::scalar(BuiltInType::Int32)
            .with_rank(ValueRank::OneDimension)
            .with_dimensions(vec![3]);
        assert!(decode(json!([1, 2, 3]), declared.clone()).is_ok());
        assert!(matches!(
            decode(json!([1, 2]), declared),
            Err(GatewayError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_composite_object_requires_every_field() {
        let err = decode(
            json!({ "NamespaceIndex": 2 }),
            DeclaredType::scalar(BuiltInType::QualifiedName),
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::ValueTypeMismatch { ref path, .. } if path == "value.Name"));

        let err = decode(
            json!({ "NodeId": "ns=1;i=5", "NamespaceUri": null, "ServerIndex": "x" }),
            DeclaredType::scalar(BuiltInType::ExpandedNodeId),
        )
        .unwrap_err();
        assert!(
            matches!(err, GatewayError::ValueTypeMismatch { ref path, .. } if path == "value.ServerIndex")
        );

        let err = decode(
            json!({ "SymbolicId": 1 }),
            DeclaredType::scalar(BuiltInType::DiagnosticInfo),
        )
        .unwrap_err();
        assert!(
            matches!(err, GatewayError::ValueTypeMismatch { ref path, .. } if path == "value.NamespaceUri")
        );
    }

    #[test]
    fn test_composite_string_and_object_forms_agree() {
        let a = decode(json!("3:Pressure"), DeclaredType::scalar(BuiltInType::QualifiedName)).unwrap();
        let b = decode(
            json!({ "NamespaceIndex": 3, "Name": "Pressure" }),
            DeclaredType::scalar(BuiltInType::QualifiedName),
        )
        .unwrap();
        assert_eq!(a, b);

        let a = decode(json!("0x803B0000"), DeclaredType::scalar(BuiltInType::StatusCode)).unwrap();
        let b = decode(json!({ "Code": 0x803B_0000u32 }), DeclaredType::scalar(BuiltInType::StatusCode))
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a, UaValue::StatusCode(StatusCode::BAD_NOT_WRITABLE));
    }

    #[test]
    fn test_xml_is_unsupported() {
        assert!(matches!(
            decode(json!("<a/>"), DeclaredType::scalar(BuiltInType::XmlElement)),
            Err(GatewayError::UnsupportedEncoding(_))
        ));
    }

    #[test]
    fn test_variant_depth_limit() {
        let mut json = json!({ "Type": 6, "Body": 1 });
        for _ in 0..4 {
            json = json!({ "Type": 24, "Body": json });
        }
        let declared = DeclaredType::scalar(BuiltInType::Variant);
        assert!(Decoder::new(5).root(&json, &declared).is_ok());
        assert!(matches!(
            Decoder::new(4).root(&json, &declared),
            Err(GatewayError::EncodingLimitExceeded { max_depth: 4 })
        ));
    }

    #[test]
    fn test_enumeration_accepts_number_or_object() {
        let declared = DeclaredType::scalar(BuiltInType::Int32).with_kind(TypeKind::Enumeration);
        assert_eq!(decode(json!(1), declared.clone()).unwrap(), UaValue::Int32(1));
        assert_eq!(
            decode(json!({ "EnumValue": 0, "EnumLabel": "Off" }), declared.clone()).unwrap(),
            UaValue::Int32(0)
        );
        assert!(decode(json!({ "EnumLabel": "Off" }), declared).is_err());
    }
}
