//! Conversions between `async-opcua` types and the gateway's own value model.
//!
//! Server to gateway is total: anything the gateway cannot represent degrades
//! to an empty value. Gateway to server fails on values that cannot be put on
//! the wire.

use bytes::Bytes;
use opcua::types as ua;
use tracing::debug;
use ua_gateway_error::{GatewayError, GatewayResult};
use ua_gateway_sdk::{
    BuiltInType, DataValue, DiagnosticInfo, ExpandedNodeId, ExtensionBody, ExtensionObject,
    Identifier, LocalizedText, NodeId, QualifiedName, StatusCode, UaArray, UaValue,
};
use uuid::Uuid;

pub(crate) fn to_ua_node_id(id: &NodeId) -> ua::NodeId {
    let identifier = match &id.identifier {
        Identifier::Numeric(v) => ua::Identifier::Numeric(*v),
        Identifier::String(v) => ua::Identifier::String(ua::UAString::from(v.as_str())),
        Identifier::Guid(v) => ua::Identifier::Guid(ua::Guid::from_bytes(*v.as_bytes())),
        Identifier::Opaque(v) => ua::Identifier::ByteString(ua::ByteString::from(v.to_vec())),
    };
    ua::NodeId {
        namespace: id.namespace,
        identifier,
    }
}

pub(crate) fn from_ua_node_id(id: &ua::NodeId) -> NodeId {
    let identifier = match &id.identifier {
        ua::Identifier::Numeric(v) => Identifier::Numeric(*v),
        ua::Identifier::String(v) => Identifier::String(text(v)),
        ua::Identifier::Guid(v) => Identifier::Guid(Uuid::from_bytes(*v.as_bytes())),
        ua::Identifier::ByteString(v) => Identifier::Opaque(Bytes::copy_from_slice(v.as_ref())),
    };
    NodeId {
        namespace: id.namespace,
        identifier,
    }
}

pub(crate) fn from_ua_expanded(id: &ua::ExpandedNodeId) -> ExpandedNodeId {
    let uri = text(&id.namespace_uri);
    ExpandedNodeId {
        node_id: from_ua_node_id(&id.node_id),
        namespace_uri: (!uri.is_empty()).then_some(uri),
        server_index: id.server_index,
    }
}

fn to_ua_expanded(id: &ExpandedNodeId) -> ua::ExpandedNodeId {
    ua::ExpandedNodeId {
        node_id: to_ua_node_id(&id.node_id),
        namespace_uri: id
            .namespace_uri
            .as_deref()
            .map(ua::UAString::from)
            .unwrap_or_else(ua::UAString::null),
        server_index: id.server_index,
    }
}

#[inline]
pub(crate) fn from_ua_status(code: ua::StatusCode) -> StatusCode {
    StatusCode(code.bits())
}

#[inline]
fn to_ua_status(code: StatusCode) -> ua::StatusCode {
    ua::StatusCode::from(code.0)
}

#[inline]
fn text(s: &ua::UAString) -> String {
    let s: &str = s.as_ref();
    s.to_string()
}

pub(crate) fn from_ua_qualified_name(q: &ua::QualifiedName) -> QualifiedName {
    QualifiedName::new(q.namespace_index, text(&q.name))
}

pub(crate) fn from_ua_localized_text(t: &ua::LocalizedText) -> LocalizedText {
    LocalizedText::new(text(&t.locale), text(&t.text))
}

fn scalar_type(t: ua::VariantScalarTypeId) -> BuiltInType {
    use ua::VariantScalarTypeId as V;
    match t {
        V::Boolean => BuiltInType::Boolean,
        V::SByte => BuiltInType::SByte,
        V::Byte => BuiltInType::Byte,
        V::Int16 => BuiltInType::Int16,
        V::UInt16 => BuiltInType::UInt16,
        V::Int32 => BuiltInType::Int32,
        V::UInt32 => BuiltInType::UInt32,
        V::Int64 => BuiltInType::Int64,
        V::UInt64 => BuiltInType::UInt64,
        V::Float => BuiltInType::Float,
        V::Double => BuiltInType::Double,
        V::String => BuiltInType::String,
        V::DateTime => BuiltInType::DateTime,
        V::Guid => BuiltInType::Guid,
        V::ByteString => BuiltInType::ByteString,
        V::XmlElement => BuiltInType::XmlElement,
        V::NodeId => BuiltInType::NodeId,
        V::ExpandedNodeId => BuiltInType::ExpandedNodeId,
        V::StatusCode => BuiltInType::StatusCode,
        V::QualifiedName => BuiltInType::QualifiedName,
        V::LocalizedText => BuiltInType::LocalizedText,
        V::ExtensionObject => BuiltInType::ExtensionObject,
        V::DataValue => BuiltInType::DataValue,
        V::Variant => BuiltInType::Variant,
        V::DiagnosticInfo => BuiltInType::DiagnosticInfo,
    }
}

fn ua_scalar_type(t: BuiltInType) -> ua::VariantScalarTypeId {
    use ua::VariantScalarTypeId as V;
    match t {
        BuiltInType::Boolean => V::Boolean,
        BuiltInType::SByte => V::SByte,
        BuiltInType::Byte => V::Byte,
        BuiltInType::Int16 => V::Int16,
        BuiltInType::UInt16 => V::UInt16,
        BuiltInType::Int32 => V::Int32,
        BuiltInType::UInt32 => V::UInt32,
        BuiltInType::Int64 => V::Int64,
        BuiltInType::UInt64 => V::UInt64,
        BuiltInType::Float => V::Float,
        BuiltInType::Double => V::Double,
        BuiltInType::String => V::String,
        BuiltInType::DateTime => V::DateTime,
        BuiltInType::Guid => V::Guid,
        BuiltInType::ByteString => V::ByteString,
        BuiltInType::XmlElement => V::XmlElement,
        BuiltInType::NodeId => V::NodeId,
        BuiltInType::ExpandedNodeId => V::ExpandedNodeId,
        BuiltInType::StatusCode => V::StatusCode,
        BuiltInType::QualifiedName => V::QualifiedName,
        BuiltInType::LocalizedText => V::LocalizedText,
        BuiltInType::ExtensionObject => V::ExtensionObject,
        BuiltInType::DataValue => V::DataValue,
        BuiltInType::Variant => V::Variant,
        BuiltInType::DiagnosticInfo => V::DiagnosticInfo,
    }
}

/// Known bodies are re-encoded to their binary form so the gateway handles
/// them the same way as bodies it decodes through a type dictionary.
fn from_extension_object(eo: &ua::ExtensionObject) -> ExtensionObject {
    let Some(body) = eo.body.as_ref() else {
        return ExtensionObject {
            type_id: NodeId::default(),
            body: ExtensionBody::None,
        };
    };
    let type_id = from_ua_node_id(&body.binary_type_id().node_id);
    let ctx = ua::ContextOwned::default();
    let mut buf = Vec::new();
    match body.encode_binary(&mut buf, &ctx.context()) {
        Ok(()) => ExtensionObject {
            type_id,
            body: ExtensionBody::Binary(Bytes::from(buf)),
        },
        Err(e) => {
            debug!(type_id = %type_id, error = %e, "ExtensionObject body not re-encodable");
            ExtensionObject {
                type_id,
                body: ExtensionBody::None,
            }
        }
    }
}

fn from_diagnostic_info(d: &ua::DiagnosticInfo) -> DiagnosticInfo {
    DiagnosticInfo {
        symbolic_id: d.symbolic_id,
        namespace_uri: d.namespace_uri,
        locale: d.locale,
        localized_text: d.localized_text,
        additional_info: d.additional_info.as_ref().map(text),
        inner_status_code: d.inner_status_code.map(from_ua_status),
        inner_diagnostic_info: d
            .inner_diagnostic_info
            .as_ref()
            .map(|inner| Box::new(from_diagnostic_info(inner))),
    }
}

fn to_diagnostic_info(d: &DiagnosticInfo) -> ua::DiagnosticInfo {
    ua::DiagnosticInfo {
        symbolic_id: d.symbolic_id,
        namespace_uri: d.namespace_uri,
        locale: d.locale,
        localized_text: d.localized_text,
        additional_info: d.additional_info.as_deref().map(ua::UAString::from),
        inner_status_code: d.inner_status_code.map(to_ua_status),
        inner_diagnostic_info: d
            .inner_diagnostic_info
            .as_ref()
            .map(|inner| Box::new(to_diagnostic_info(inner))),
    }
}

pub(crate) fn from_variant(v: &ua::Variant) -> UaValue {
    use ua::Variant as V;
    match v {
        V::Empty => UaValue::Empty,
        V::Boolean(b) => UaValue::Boolean(*b),
        V::SByte(n) => UaValue::SByte(*n),
        V::Byte(n) => UaValue::Byte(*n),
        V::Int16(n) => UaValue::Int16(*n),
        V::UInt16(n) => UaValue::UInt16(*n),
        V::Int32(n) => UaValue::Int32(*n),
        V::UInt32(n) => UaValue::UInt32(*n),
        V::Int64(n) => UaValue::Int64(*n),
        V::UInt64(n) => UaValue::UInt64(*n),
        V::Float(f) => UaValue::Float(*f),
        V::Double(f) => UaValue::Double(*f),
        V::String(s) => UaValue::String(text(s)),
        V::DateTime(dt) => UaValue::DateTime(dt.as_chrono()),
        V::Guid(g) => UaValue::Guid(Uuid::from_bytes(*g.as_bytes())),
        V::StatusCode(sc) => UaValue::StatusCode(from_ua_status(*sc)),
        V::ByteString(b) => UaValue::ByteString(Bytes::copy_from_slice(b.as_ref())),
        V::XmlElement(x) => UaValue::XmlElement(x.to_string()),
        V::QualifiedName(q) => UaValue::QualifiedName(from_ua_qualified_name(q)),
        V::LocalizedText(t) => UaValue::LocalizedText(from_ua_localized_text(t)),
        V::NodeId(id) => UaValue::NodeId(from_ua_node_id(id)),
        V::ExpandedNodeId(id) => UaValue::ExpandedNodeId(from_ua_expanded(id)),
        V::ExtensionObject(eo) => UaValue::ExtensionObject(from_extension_object(eo)),
        V::Variant(inner) => UaValue::Variant(Box::new(from_variant(inner))),
        // a DataValue nested in a Variant only carries its value forward
        V::DataValue(dv) => dv.value.as_ref().map(from_variant).unwrap_or(UaValue::Empty),
        V::DiagnosticInfo(d) => UaValue::DiagnosticInfo(Box::new(from_diagnostic_info(d))),
        V::Array(array) => UaValue::Array(Box::new(UaArray {
            element_type: scalar_type(array.value_type),
            values: array.values.iter().map(from_variant).collect(),
            dimensions: array.dimensions.clone().filter(|d| d.len() > 1),
        })),
    }
}

pub(crate) fn to_variant(v: &UaValue) -> GatewayResult<ua::Variant> {
    use ua::Variant as V;
    Ok(match v {
        UaValue::Empty => V::Empty,
        UaValue::Boolean(b) => V::Boolean(*b),
        UaValue::SByte(n) => V::SByte(*n),
        UaValue::Byte(n) => V::Byte(*n),
        UaValue::Int16(n) => V::Int16(*n),
        UaValue::UInt16(n) => V::UInt16(*n),
        UaValue::Int32(n) => V::Int32(*n),
        UaValue::UInt32(n) => V::UInt32(*n),
        UaValue::Int64(n) => V::Int64(*n),
        UaValue::UInt64(n) => V::UInt64(*n),
        UaValue::Float(f) => V::Float(*f),
        UaValue::Double(f) => V::Double(*f),
        UaValue::String(s) => V::String(ua::UAString::from(s.as_str())),
        UaValue::DateTime(dt) => V::DateTime(Box::new(ua::DateTime::from(*dt))),
        UaValue::Guid(g) => V::Guid(Box::new(ua::Guid::from_bytes(*g.as_bytes()))),
        UaValue::ByteString(b) => V::ByteString(ua::ByteString::from(b.to_vec())),
        UaValue::XmlElement(x) => V::XmlElement(ua::XmlElement::from(x.as_str())),
        UaValue::NodeId(id) => V::NodeId(Box::new(to_ua_node_id(id))),
        UaValue::ExpandedNodeId(id) => V::ExpandedNodeId(Box::new(to_ua_expanded(id))),
        UaValue::StatusCode(sc) => V::StatusCode(to_ua_status(*sc)),
        UaValue::QualifiedName(q) => V::QualifiedName(Box::new(ua::QualifiedName::new(
            q.namespace_index,
            q.name.as_str(),
        ))),
        UaValue::LocalizedText(t) => V::LocalizedText(Box::new(ua::LocalizedText::new(
            t.locale.as_str(),
            t.text.as_str(),
        ))),
        UaValue::ExtensionObject(eo) => match eo.body {
            ExtensionBody::None => V::ExtensionObject(ua::ExtensionObject::null()),
            _ => {
                return Err(GatewayError::UnsupportedEncoding(format!(
                    "writing ExtensionObject {} bodies",
                    eo.type_id
                )))
            }
        },
        UaValue::Variant(inner) => V::Variant(Box::new(to_variant(inner)?)),
        UaValue::DiagnosticInfo(d) => V::DiagnosticInfo(Box::new(to_diagnostic_info(d))),
        UaValue::Array(array) => {
            let values = array
                .values
                .iter()
                .map(to_variant)
                .collect::<GatewayResult<Vec<_>>>()?;
            let value_type = ua_scalar_type(array.element_type);
            let built = match &array.dimensions {
                Some(dims) => ua::Array::new_multi(value_type, values, dims.clone()),
                None => ua::Array::new(value_type, values),
            };
            V::Array(Box::new(built.map_err(|e| {
                GatewayError::Internal(format!("array of {}: {e:?}", array.element_type))
            })?))
        }
    })
}

pub(crate) fn from_data_value(dv: &ua::DataValue) -> DataValue {
    DataValue {
        value: match dv.value.as_ref() {
            None | Some(ua::Variant::Empty) => None,
            Some(v) => Some(from_variant(v)),
        },
        status: dv.status.map(from_ua_status).unwrap_or(StatusCode::GOOD),
        source_timestamp: dv.source_timestamp.as_ref().map(|t| t.as_chrono()),
        server_timestamp: dv.server_timestamp.as_ref().map(|t| t.as_chrono()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_node_ids() {
        let string = NodeId::string(2, "Line1.Speed");
        let ua_id = to_ua_node_id(&string);
        assert_eq!(ua_id.namespace, 2);
        assert_eq!(from_ua_node_id(&ua_id), string);

        let guid = NodeId {
            namespace: 3,
            identifier: Identifier::Guid(Uuid::from_u128(0x1234)),
        };
        assert_eq!(from_ua_node_id(&to_ua_node_id(&guid)), guid);
        assert_eq!(
            from_ua_node_id(&to_ua_node_id(&NodeId::numeric(0, 2259))),
            NodeId::numeric(0, 2259)
        );
    }

    #[test]
    fn test_scalars_from_server() {
        assert_eq!(
            from_variant(&ua::Variant::Double(12.5)),
            UaValue::Double(12.5)
        );
        assert_eq!(
            from_variant(&ua::Variant::String(ua::UAString::from("Auto"))),
            UaValue::String("Auto".into())
        );
        assert_eq!(
            from_variant(&ua::Variant::StatusCode(ua::StatusCode::from(0x8034_0000u32))),
            UaValue::StatusCode(StatusCode::BAD_NODE_ID_UNKNOWN)
        );
        let lt = from_variant(&ua::Variant::LocalizedText(Box::new(ua::LocalizedText::new(
            "en", "Manual",
        ))));
        assert_eq!(lt, UaValue::LocalizedText(LocalizedText::new("en", "Manual")));
    }

    #[test]
    fn test_matrix_keeps_dimensions() -> anyhow::Result<()> {
        let matrix = UaValue::Array(Box::new(UaArray::matrix(
            BuiltInType::Int32,
            (1..=6).map(UaValue::Int32).collect(),
            vec![2, 3],
        )?));
        let variant = to_variant(&matrix)?;
        let ua::Variant::Array(array) = &variant else {
            anyhow::bail!("expected array, got {variant:?}");
        };
        assert_eq!(array.dimensions.as_deref(), Some(&[2u32, 3][..]));
        assert_eq!(from_variant(&variant), matrix);
        Ok(())
    }

    #[test]
    fn test_nested_variant() -> anyhow::Result<()> {
        let nested = UaValue::Variant(Box::new(UaValue::UInt16(7)));
        let variant = to_variant(&nested)?;
        assert!(matches!(variant, ua::Variant::Variant(_)));
        assert_eq!(from_variant(&variant), nested);
        Ok(())
    }

    #[test]
    fn test_binary_extension_object_not_writable() {
        let value = UaValue::ExtensionObject(ExtensionObject {
            type_id: NodeId::numeric(2, 5001),
            body: ExtensionBody::Binary(Bytes::from_static(&[1, 0, 0, 0])),
        });
        let err = to_variant(&value).unwrap_err();
        assert!(matches!(err, GatewayError::UnsupportedEncoding(_)));
    }

    #[test]
    fn test_data_value() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
        let dv = ua::DataValue {
            value: Some(ua::Variant::Int32(7)),
            status: Some(ua::StatusCode::from(0x4000_0000u32)),
            source_timestamp: Some(ua::DateTime::from(ts)),
            ..Default::default()
        };
        let converted = from_data_value(&dv);
        assert_eq!(converted.value, Some(UaValue::Int32(7)));
        assert!(converted.status.is_uncertain());
        assert_eq!(converted.source_timestamp, Some(ts));
        assert_eq!(converted.server_timestamp, None);

        let empty = from_data_value(&ua::DataValue {
            value: Some(ua::Variant::Empty),
            ..Default::default()
        });
        assert_eq!(empty.value, None);
        assert_eq!(empty.status, StatusCode::GOOD);
    }
}
