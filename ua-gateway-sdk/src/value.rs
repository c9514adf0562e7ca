use crate::{
    node_id::NodeId,
    types::{
        BuiltInType, DiagnosticInfo, ExpandedNodeId, ExtensionObject, LocalizedText,
        QualifiedName, StatusCode,
    },
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use ua_gateway_error::{GatewayError, GatewayResult};
use uuid::Uuid;

/// A typed OPC UA value.
///
/// One variant per built-in type (DataValue excluded, it never appears as a
/// variable value), plus `Empty` for a null variant and `Array` for 1-D arrays
/// and matrices.
#[derive(Debug, Clone, PartialEq)]
pub enum UaValue {
    Empty,
    Boolean(bool),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    DateTime(DateTime<Utc>),
    Guid(Uuid),
    ByteString(Bytes),
    XmlElement(String),
    NodeId(NodeId),
    ExpandedNodeId(ExpandedNodeId),
    StatusCode(StatusCode),
    QualifiedName(QualifiedName),
    LocalizedText(LocalizedText),
    ExtensionObject(ExtensionObject),
    Variant(Box<UaValue>),
    DiagnosticInfo(Box<DiagnosticInfo>),
    Array(Box<UaArray>),
}

impl UaValue {
    /// Built-in type of a scalar, or the element type of an array.
    /// `None` for `Empty`.
    pub fn built_in_type(&self) -> Option<BuiltInType> {
        Some(match self {
            UaValue::Empty => return None,
            UaValue::Boolean(_) => BuiltInType::Boolean,
            UaValue::SByte(_) => BuiltInType::SByte,
            UaValue::Byte(_) => BuiltInType::Byte,
            UaValue::Int16(_) => BuiltInType::Int16,
            UaValue::UInt16(_) => BuiltInType::UInt16,
            UaValue::Int32(_) => BuiltInType::Int32,
            UaValue::UInt32(_) => BuiltInType::UInt32,
            UaValue::Int64(_) => BuiltInType::Int64,
            UaValue::UInt64(_) => BuiltInType::UInt64,
            UaValue::Float(_) => BuiltInType::Float,
            UaValue::Double(_) => BuiltInType::Double,
            UaValue::String(_) => BuiltInType::String,
            UaValue::DateTime(_) => BuiltInType::DateTime,
            UaValue::Guid(_) => BuiltInType::Guid,
            UaValue::ByteString(_) => BuiltInType::ByteString,
            UaValue::XmlElement(_) => BuiltInType::XmlElement,
            UaValue::NodeId(_) => BuiltInType::NodeId,
            UaValue::ExpandedNodeId(_) => BuiltInType::ExpandedNodeId,
            UaValue::StatusCode(_) => BuiltInType::StatusCode,
            UaValue::QualifiedName(_) => BuiltInType::QualifiedName,
            UaValue::LocalizedText(_) => BuiltInType::LocalizedText,
            UaValue::ExtensionObject(_) => BuiltInType::ExtensionObject,
            UaValue::Variant(_) => BuiltInType::Variant,
            UaValue::DiagnosticInfo(_) => BuiltInType::DiagnosticInfo,
            UaValue::Array(a) => a.element_type,
        })
    }

    #[inline]
    pub fn is_array(&self) -> bool {
        matches!(self, UaValue::Array(_))
    }

    /// Widen any integer variant to i64. Used for length fields, enum values
    /// and server state checks.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            UaValue::SByte(v) => Some(v as i64),
            UaValue::Byte(v) => Some(v as i64),
            UaValue::Int16(v) => Some(v as i64),
            UaValue::UInt16(v) => Some(v as i64),
            UaValue::Int32(v) => Some(v as i64),
            UaValue::UInt32(v) => Some(v as i64),
            UaValue::Int64(v) => Some(v),
            UaValue::UInt64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_node_id(&self) -> Option<&NodeId> {
        match self {
            UaValue::NodeId(id) => Some(id),
            UaValue::ExpandedNodeId(e) => Some(&e.node_id),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            UaValue::String(s) => Some(s),
            UaValue::LocalizedText(t) => Some(&t.text),
            _ => None,
        }
    }

    pub fn array(element_type: BuiltInType, values: Vec<UaValue>) -> Self {
        UaValue::Array(Box::new(UaArray::new(element_type, values)))
    }
}

impl From<bool> for UaValue {
    fn from(v: bool) -> Self {
        UaValue::Boolean(v)
    }
}

impl From<i32> for UaValue {
    fn from(v: i32) -> Self {
        UaValue::Int32(v)
    }
}

impl From<f64> for UaValue {
    fn from(v: f64) -> Self {
        UaValue::Double(v)
    }
}

impl From<&str> for UaValue {
    fn from(v: &str) -> Self {
        UaValue::String(v.to_string())
    }
}

impl From<String> for UaValue {
    fn from(v: String) -> Self {
        UaValue::String(v)
    }
}

/// Array payload with a single element type.
///
/// `values` is flat in row-major order. `dimensions` is `None` for a 1-D array
/// and holds every extent for a matrix; the product of the extents always
/// equals `values.len()`.
#[derive(Debug, Clone, PartialEq)]
pub struct UaArray {
    pub element_type: BuiltInType,
    pub values: Vec<UaValue>,
    pub dimensions: Option<Vec<u32>>,
}

impl UaArray {
    pub fn new(element_type: BuiltInType, values: Vec<UaValue>) -> Self {
        Self {
            element_type,
            values,
            dimensions: None,
        }
    }

    pub fn matrix(
        element_type: BuiltInType,
        values: Vec<UaValue>,
        dimensions: Vec<u32>,
    ) -> GatewayResult<Self> {
        let expected = dimensions
            .iter()
            .try_fold(1usize, |acc, d| acc.checked_mul(*d as usize));
        if expected != Some(values.len()) {
            return Err(GatewayError::Internal(format!(
                "array dimensions {dimensions:?} do not match {} elements",
                values.len()
            )));
        }
        Ok(Self {
            element_type,
            values,
            dimensions: Some(dimensions),
        })
    }

    /// Extents as seen by encoders: a 1-D array reports its length.
    pub fn extents(&self) -> Vec<u32> {
        match &self.dimensions {
            Some(d) if !d.is_empty() => d.clone(),
            _ => vec![self.values.len() as u32],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_requires_consistent_extents() {
        let values = (0..6).map(UaValue::Int32).collect::<Vec<_>>();
        let m = UaArray::matrix(BuiltInType::Int32, values.clone(), vec![2, 3]).unwrap();
        assert_eq!(m.extents(), vec![2, 3]);
        assert!(UaArray::matrix(BuiltInType::Int32, values, vec![4, 2]).is_err());
    }

    #[test]
    fn test_integer_widening() {
        assert_eq!(UaValue::Byte(200).as_i64(), Some(200));
        assert_eq!(UaValue::UInt64(u64::MAX).as_i64(), None);
        assert_eq!(UaValue::Double(1.0).as_i64(), None);
        assert_eq!(
            UaValue::array(BuiltInType::Boolean, vec![]).built_in_type(),
            Some(BuiltInType::Boolean)
        );
    }
}
