use super::{float_json, schema, ValueCodec, ValueContext};
use crate::{
    types::{BuiltInType, DiagnosticInfo, ExtensionBody, ExtensionObject},
    value::{UaArray, UaValue},
};
use chrono::SecondsFormat;
use serde_json::{json, Map, Value};
use ua_gateway_error::{GatewayError, GatewayResult};

pub(super) struct Encoder<'a> {
    max_depth: usize,
    ctx: &'a ValueContext,
}

impl<'a> Encoder<'a> {
    pub(super) fn new(max_depth: usize, ctx: &'a ValueContext) -> Self {
        Self { max_depth, ctx }
    }

    pub(super) fn value(&self, v: &UaValue, depth: usize) -> GatewayResult<(Value, Value)> {
        Ok(match v {
            UaValue::Empty => (Value::Null, schema::null()),
            UaValue::Boolean(b) => (json!(b), schema::scalar(BuiltInType::Boolean)),
            UaValue::SByte(n) => (json!(n), schema::scalar(BuiltInType::SByte)),
            UaValue::Byte(n) => (json!(n), schema::scalar(BuiltInType::Byte)),
            UaValue::Int16(n) => (json!(n), schema::scalar(BuiltInType::Int16)),
            UaValue::UInt16(n) => (json!(n), schema::scalar(BuiltInType::UInt16)),
            UaValue::Int32(n) => match &self.ctx.enumeration {
                Some(def) => (
                    json!({ "EnumValue": n, "EnumLabel": def.label(*n as i64) }),
                    schema::enumeration(),
                ),
                None => (json!(n), schema::scalar(BuiltInType::Int32)),
            },
            UaValue::UInt32(n) => (json!(n), schema::scalar(BuiltInType::UInt32)),
            UaValue::Int64(n) => (json!(n), schema::scalar(BuiltInType::Int64)),
            UaValue::UInt64(n) => (json!(n), schema::scalar(BuiltInType::UInt64)),
            UaValue::Float(f) => (float_json(*f as f64), schema::scalar(BuiltInType::Float)),
            UaValue::Double(f) => (float_json(*f), schema::scalar(BuiltInType::Double)),
            UaValue::String(s) => (json!(s), schema::scalar(BuiltInType::String)),
            UaValue::DateTime(dt) => (
                json!(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
                schema::scalar(BuiltInType::DateTime),
            ),
            UaValue::Guid(g) => (
                json!(g.hyphenated().to_string()),
                schema::scalar(BuiltInType::Guid),
            ),
            UaValue::ByteString(b) => (json!(hex::encode(b)), schema::scalar(BuiltInType::ByteString)),
            UaValue::XmlElement(x) => (json!(x), schema::scalar(BuiltInType::XmlElement)),
            UaValue::NodeId(id) => (json!(id.to_string()), schema::scalar(BuiltInType::NodeId)),
            UaValue::ExpandedNodeId(id) => (
                json!(id.to_string()),
                schema::scalar(BuiltInType::ExpandedNodeId),
            ),
            UaValue::StatusCode(code) => (json!(code.to_hex()), schema::scalar(BuiltInType::StatusCode)),
            UaValue::QualifiedName(q) => (json!(q.to_string()), schema::scalar(BuiltInType::QualifiedName)),
            // locale is dropped on the JSON side
            UaValue::LocalizedText(t) => (json!(t.text), schema::scalar(BuiltInType::LocalizedText)),
            UaValue::ExtensionObject(eo) => {
                ValueCodec::check_depth(self.max_depth, depth)?;
                self.extension_object(eo, depth + 1)?
            }
            UaValue::Variant(inner) => {
                ValueCodec::check_depth(self.max_depth, depth)?;
                self.variant(inner, depth + 1)?
            }
            UaValue::DiagnosticInfo(info) => {
                ValueCodec::check_depth(self.max_depth, depth)?;
                (self.diagnostic_info(info, depth + 1)?, schema::diagnostic_info())
            }
            UaValue::Array(array) => self.array(array, depth)?,
        })
    }

    fn variant(&self, inner: &UaValue, depth: usize) -> GatewayResult<(Value, Value)> {
        let type_id = inner.built_in_type().map(|t| t.id()).unwrap_or(0);
        // enum labels and structure bindings belong to the outer node only
        let plain = ValueContext::default();
        let (body, body_schema) = Encoder::new(self.max_depth, &plain).value(inner, depth)?;
        let mut envelope = json!({ "Type": type_id, "Body": body });
        // nesting alone loses the inner extents of a matrix with an empty dimension
        if let UaValue::Array(array) = inner {
            let extents = array.extents();
            if extents.len() > 1 {
                envelope["Dimensions"] = json!(extents);
            }
        }
        Ok((envelope, schema::variant(Some(body_schema))))
    }

    fn extension_object(
        &self,
        eo: &ExtensionObject,
        depth: usize,
    ) -> GatewayResult<(Value, Value)> {
        if let (Some(binding), ExtensionBody::Binary(body)) = (&self.ctx.structure, &eo.body) {
            return binding
                .dictionary
                .build_object_at(&binding.type_name, body, self.max_depth, depth);
        }
        let type_id = json!(eo.type_id.to_string());
        let value = match &eo.body {
            ExtensionBody::None => json!({ "TypeId": type_id, "Encoding": "None", "Body": null }),
            ExtensionBody::Binary(b) => {
                json!({ "TypeId": type_id, "Encoding": "Binary", "Body": hex::encode(b) })
            }
            ExtensionBody::Xml(x) => json!({ "TypeId": type_id, "Encoding": "Xml", "Body": x }),
            ExtensionBody::Structure(fields) => {
                let plain = ValueContext::default();
                let nested = Encoder::new(self.max_depth, &plain);
                let mut body = Map::with_capacity(fields.len());
                for (name, field) in fields {
                    // fields carry their own type, like a Variant
                    ValueCodec::check_depth(self.max_depth, depth)?;
                    let (v, _) = nested.variant(field, depth + 1)?;
                    body.insert(name.clone(), v);
                }
                json!({ "TypeId": type_id, "Encoding": "Structure", "Body": body })
            }
        };
        Ok((value, schema::extension_object()))
    }

    fn diagnostic_info(&self, info: &DiagnosticInfo, depth: usize) -> GatewayResult<Value> {
        let inner = match &info.inner_diagnostic_info {
            Some(inner) => {
                ValueCodec::check_depth(self.max_depth, depth)?;
                self.diagnostic_info(inner, depth + 1)?
            }
            None => Value::Null,
        };
        Ok(json!({
            "SymbolicId": info.symbolic_id,
            "NamespaceUri": info.namespace_uri,
            "Locale": info.locale,
            "LocalizedText": info.localized_text,
            "AdditionalInfo": info.additional_info,
            "InnerStatusCode": info.inner_status_code.map(|c| c.to_hex()),
            "InnerDiagnosticInfo": inner,
        }))
    }

    fn array(&self, array: &UaArray, depth: usize) -> GatewayResult<(Value, Value)> {
        let extents = array.extents();
        let expected = extents.iter().map(|d| *d as usize).product::<usize>();
        if expected != array.values.len() {
            return Err(GatewayError::Internal(format!(
                "array dimensions {extents:?} do not match {} elements",
                array.values.len()
            )));
        }

        let mut values = Vec::with_capacity(array.values.len());
        let mut item_schemas: Vec<Value> = Vec::new();
        for element in &array.values {
            let (v, s) = self.value(element, depth)?;
            values.push(v);
            if !item_schemas.contains(&s) {
                item_schemas.push(s);
            }
        }
        let items = match item_schemas.len() {
            0 => self.empty_item_schema(array.element_type),
            1 => item_schemas.remove(0),
            _ => json!({ "anyOf": item_schemas }),
        };

        Ok((nest(values, &extents), schema::matrix(items, &extents)))
    }

    fn empty_item_schema(&self, element_type: BuiltInType) -> Value {
        if element_type == BuiltInType::Int32 && self.ctx.enumeration.is_some() {
            schema::enumeration()
        } else {
            schema::scalar(element_type)
        }
    }
}

/// Fold a flat row-major list into nested JSON arrays.
fn nest(values: Vec<Value>, extents: &[u32]) -> Value {
    if extents.len() <= 1 {
        return Value::Array(values);
    }
    let stride = extents[1..].iter().map(|d| *d as usize).product::<usize>();
    let outer = extents[0] as usize;
    if stride == 0 {
        return Value::Array((0..outer).map(|_| nest(Vec::new(), &extents[1..])).collect());
    }
    let mut rows = Vec::with_capacity(outer);
    let mut iter = values.into_iter();
    for _ in 0..outer {
        let chunk = iter.by_ref().take(stride).collect::<Vec<_>>();
        rows.push(nest(chunk, &extents[1..]));
    }
    Value::Array(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::EnumDefinition,
        node_id::NodeId,
        types::{LocalizedText, QualifiedName, StatusCode},
    };
    use std::sync::Arc;

    fn encode(v: &UaValue) -> (Value, Value) {
        Encoder::new(64, &ValueContext::default()).value(v, 0).unwrap()
    }

    #[test]
    fn test_scalars() {
        assert_eq!(encode(&UaValue::Boolean(true)).0, json!(true));
        let (v, s) = encode(&UaValue::Int16(-7));
        assert_eq!(v, json!(-7));
        assert_eq!(s["type"], json!("integer"));
        assert_eq!(s["minimum"], json!(-32768));
        assert_eq!(encode(&UaValue::Double(f64::NAN)).0, json!("NaN"));
        assert_eq!(encode(&UaValue::Float(f32::NEG_INFINITY)).0, json!("-Infinity"));
        assert_eq!(
            encode(&UaValue::StatusCode(StatusCode::BAD_TYPE_MISMATCH)).0,
            json!("0x80740000")
        );
        assert_eq!(
            encode(&UaValue::QualifiedName(QualifiedName::new(2, "Speed"))).0,
            json!("2:Speed")
        );
        assert_eq!(
            encode(&UaValue::LocalizedText(LocalizedText::new("en", "Speed"))).0,
            json!("Speed")
        );
        assert_eq!(
            encode(&UaValue::NodeId(NodeId::numeric(3, 17))).0,
            json!("ns=3;i=17")
        );
        assert_eq!(
            encode(&UaValue::ByteString(bytes::Bytes::from_static(&[0xDE, 0xAD]))).0,
            json!("dead")
        );
    }

    #[test]
    fn test_enum_labels_first_match() {
        let def = Arc::new(EnumDefinition::from_values(vec![
            (0, "Off".into()),
            (1, "On".into()),
            (1, "Enabled".into()),
        ]));
        let ctx = ValueContext::enumeration(def);
        let enc = Encoder::new(64, &ctx);
        assert_eq!(
            enc.value(&UaValue::Int32(1), 0).unwrap().0,
            json!({ "EnumValue": 1, "EnumLabel": "On" })
        );
        assert_eq!(
            enc.value(&UaValue::Int32(9), 0).unwrap().0,
            json!({ "EnumValue": 9, "EnumLabel": "" })
        );
    }

    #[test]
    fn test_matrix_nesting() {
        let values = (1..=6).map(UaValue::Byte).collect();
        let m = UaArray::matrix(BuiltInType::Byte, values, vec![2, 3]).unwrap();
        let (v, s) = encode(&UaValue::Array(Box::new(m)));
        assert_eq!(v, json!([[1, 2, 3], [4, 5, 6]]));
        assert_eq!(s["maxItems"], json!(2));
        assert_eq!(s["items"]["maxItems"], json!(3));
    }

    #[test]
    fn test_nested_variant_depth_guard() {
        let mut v = UaValue::Int32(1);
        for _ in 0..5 {
            v = UaValue::Variant(Box::new(v));
        }
        assert!(Encoder::new(5, &ValueContext::default()).value(&v, 0).is_ok());
        assert!(matches!(
            Encoder::new(4, &ValueContext::default()).value(&v, 0),
            Err(GatewayError::EncodingLimitExceeded { max_depth: 4 })
        ));
    }
}
