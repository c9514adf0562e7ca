//! JSON Schema fragments for each built-in type.

use crate::types::BuiltInType;
use serde_json::{json, Value};

fn integer(min: Value, max: Value) -> Value {
    json!({ "type": "integer", "minimum": min, "maximum": max })
}

/// Schema of a single scalar of the given type.
pub fn scalar(t: BuiltInType) -> Value {
    use BuiltInType::*;
    match t {
        Boolean => json!({ "type": "boolean" }),
        SByte => integer(json!(i8::MIN), json!(i8::MAX)),
        Byte => integer(json!(u8::MIN), json!(u8::MAX)),
        Int16 => integer(json!(i16::MIN), json!(i16::MAX)),
        UInt16 => integer(json!(u16::MIN), json!(u16::MAX)),
        Int32 => integer(json!(i32::MIN), json!(i32::MAX)),
        UInt32 => integer(json!(u32::MIN), json!(u32::MAX)),
        Int64 => integer(json!(i64::MIN), json!(i64::MAX)),
        UInt64 => integer(json!(u64::MIN), json!(u64::MAX)),
        Float | Double => json!({
            "anyOf": [
                { "type": "number" },
                { "type": "string", "enum": ["NaN", "Infinity", "-Infinity"] }
            ]
        }),
        String | NodeId | ExpandedNodeId | QualifiedName | LocalizedText => {
            json!({ "type": "string" })
        }
        DateTime => json!({ "type": "string", "format": "date-time" }),
        Guid => json!({ "type": "string", "format": "uuid" }),
        ByteString => json!({ "type": "string", "contentEncoding": "base16" }),
        XmlElement => json!({ "type": "string", "contentMediaType": "application/xml" }),
        StatusCode => json!({ "type": "string", "pattern": "^0x[0-9A-F]{8}$" }),
        ExtensionObject => extension_object(),
        Variant => variant(None),
        DiagnosticInfo => diagnostic_info(),
        DataValue => json!({ "type": "object" }),
    }
}

/// Schema of a null value.
pub fn null() -> Value {
    json!({ "type": "null" })
}

/// `{EnumValue, EnumLabel}` object.
pub fn enumeration() -> Value {
    json!({
        "type": "object",
        "properties": {
            "EnumValue": scalar(BuiltInType::Int32),
            "EnumLabel": { "type": "string" }
        },
        "required": ["EnumValue", "EnumLabel"],
        "additionalProperties": false
    })
}

/// Variant envelope; `body` is the schema of the carried value when known.
pub fn variant(body: Option<Value>) -> Value {
    json!({
        "type": "object",
        "properties": {
            "Type": { "type": "integer", "minimum": 0, "maximum": 25 },
            "Body": body.unwrap_or_else(|| json!({})),
            "Dimensions": { "type": "array", "items": { "type": "integer", "minimum": 0 } }
        },
        "required": ["Type", "Body"],
        "additionalProperties": false
    })
}

pub fn extension_object() -> Value {
    json!({
        "type": "object",
        "properties": {
            "TypeId": { "type": "string" },
            "Encoding": { "type": "string", "enum": ["Binary", "Xml", "None", "Structure"] },
            "Body": {}
        },
        "required": ["TypeId", "Encoding", "Body"],
        "additionalProperties": false
    })
}

pub fn diagnostic_info() -> Value {
    let nullable_int = json!({ "type": ["integer", "null"] });
    json!({
        "type": "object",
        "properties": {
            "SymbolicId": nullable_int,
            "NamespaceUri": nullable_int,
            "Locale": nullable_int,
            "LocalizedText": nullable_int,
            "AdditionalInfo": { "type": ["string", "null"] },
            "InnerStatusCode": { "type": ["string", "null"] },
            "InnerDiagnosticInfo": { "type": ["object", "null"] }
        },
        "required": [
            "SymbolicId", "NamespaceUri", "Locale", "LocalizedText",
            "AdditionalInfo", "InnerStatusCode", "InnerDiagnosticInfo"
        ]
    })
}

/// Array schema with exact bounds.
pub fn array(items: Value, len: u32) -> Value {
    json!({
        "type": "array",
        "items": items,
        "minItems": len,
        "maxItems": len
    })
}

/// Nested array schema for a matrix, innermost dimension wrapped first.
pub fn matrix(items: Value, dimensions: &[u32]) -> Value {
    dimensions
        .iter()
        .rev()
        .fold(items, |inner, len| array(inner, *len))
}

/// Object schema with properties in declared order.
pub fn object(properties: serde_json::Map<String, Value>) -> Value {
    let required = properties.keys().cloned().collect::<Vec<_>>();
    json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_bounds_are_exact() {
        let s = scalar(BuiltInType::UInt64);
        assert_eq!(s["minimum"], json!(0));
        assert_eq!(s["maximum"], json!(u64::MAX));
        let s = scalar(BuiltInType::Int64);
        assert_eq!(s["minimum"], json!(i64::MIN));
        let s = scalar(BuiltInType::SByte);
        assert_eq!(s, json!({ "type": "integer", "minimum": -128, "maximum": 127 }));
    }

    #[test]
    fn test_matrix_nests_innermost_first() {
        let s = matrix(scalar(BuiltInType::Boolean), &[2, 3]);
        assert_eq!(s["minItems"], json!(2));
        assert_eq!(s["maxItems"], json!(2));
        assert_eq!(s["items"]["minItems"], json!(3));
        assert_eq!(s["items"]["maxItems"], json!(3));
        assert_eq!(s["items"]["items"], json!({ "type": "boolean" }));
    }
}
