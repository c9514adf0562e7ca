use crate::{
    codec::ValueCodec,
    node_id::{Identifier, NodeId},
    types::{
        BuiltInType, DataValue, DiagnosticInfo, ExpandedNodeId, ExtensionBody, ExtensionObject,
        LocalizedText, QualifiedName, StatusCode,
    },
    value::{UaArray, UaValue},
};
use bytes::{Buf, Bytes};
use chrono::{DateTime, Utc};
use ua_gateway_error::{GatewayError, GatewayResult};
use uuid::Uuid;

/// Seconds between 1601-01-01 (OPC UA epoch) and 1970-01-01.
const EPOCH_DELTA_SECS: i64 = 11_644_473_600;

/// Little-endian reader over an ExtensionObject body.
///
/// Every read checks the remaining length first; running out of bytes is
/// `MalformedBinary`, never a panic.
pub struct BinaryCursor<'a> {
    buf: &'a [u8],
    len: usize,
}

impl<'a> BinaryCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            len: buf.len(),
        }
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.len - self.buf.len()
    }

    fn need(&self, n: usize, what: &str) -> GatewayResult<()> {
        if self.buf.remaining() < n {
            return Err(GatewayError::MalformedBinary(format!(
                "need {n} bytes for {what} at offset {}, {} left",
                self.position(),
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn read_bool(&mut self) -> GatewayResult<bool> {
        self.need(1, "Boolean")?;
        Ok(self.buf.get_u8() != 0)
    }

    pub fn read_i8(&mut self) -> GatewayResult<i8> {
        self.need(1, "SByte")?;
        Ok(self.buf.get_i8())
    }

    pub fn read_u8(&mut self) -> GatewayResult<u8> {
        self.need(1, "Byte")?;
        Ok(self.buf.get_u8())
    }

    pub fn read_i16(&mut self) -> GatewayResult<i16> {
        self.need(2, "Int16")?;
        Ok(self.buf.get_i16_le())
    }

    pub fn read_u16(&mut self) -> GatewayResult<u16> {
        self.need(2, "UInt16")?;
        Ok(self.buf.get_u16_le())
    }

    pub fn read_i32(&mut self) -> GatewayResult<i32> {
        self.need(4, "Int32")?;
        Ok(self.buf.get_i32_le())
    }

    pub fn read_u32(&mut self) -> GatewayResult<u32> {
        self.need(4, "UInt32")?;
        Ok(self.buf.get_u32_le())
    }

    pub fn read_i64(&mut self) -> GatewayResult<i64> {
        self.need(8, "Int64")?;
        Ok(self.buf.get_i64_le())
    }

    pub fn read_u64(&mut self) -> GatewayResult<u64> {
        self.need(8, "UInt64")?;
        Ok(self.buf.get_u64_le())
    }

    pub fn read_f32(&mut self) -> GatewayResult<f32> {
        self.need(4, "Float")?;
        Ok(self.buf.get_f32_le())
    }

    pub fn read_f64(&mut self) -> GatewayResult<f64> {
        self.need(8, "Double")?;
        Ok(self.buf.get_f64_le())
    }

    /// Length-prefixed bytes; a length of -1 is null.
    pub fn read_byte_string(&mut self) -> GatewayResult<Option<Bytes>> {
        let len = self.read_i32()?;
        if len == -1 {
            return Ok(None);
        }
        let len = usize::try_from(len).map_err(|_| {
            GatewayError::MalformedBinary(format!(
                "negative length {len} at offset {}",
                self.position()
            ))
        })?;
        self.need(len, "ByteString body")?;
        Ok(Some(self.buf.copy_to_bytes(len)))
    }

    pub fn read_string(&mut self) -> GatewayResult<Option<String>> {
        let at = self.position();
        match self.read_byte_string()? {
            None => Ok(None),
            Some(raw) => String::from_utf8(raw.to_vec()).map(Some).map_err(|_| {
                GatewayError::MalformedBinary(format!("invalid UTF-8 string at offset {at}"))
            }),
        }
    }

    /// 100ns ticks since 1601-01-01 UTC. Zero and out-of-range ticks map to
    /// `None`.
    pub fn read_date_time(&mut self) -> GatewayResult<Option<DateTime<Utc>>> {
        let ticks = self.read_i64()?;
        if ticks <= 0 {
            return Ok(None);
        }
        let secs = ticks / 10_000_000 - EPOCH_DELTA_SECS;
        let nanos = (ticks % 10_000_000) as u32 * 100;
        Ok(DateTime::from_timestamp(secs, nanos))
    }

    pub fn read_guid(&mut self) -> GatewayResult<Uuid> {
        self.need(16, "Guid")?;
        let d1 = self.buf.get_u32_le();
        let d2 = self.buf.get_u16_le();
        let d3 = self.buf.get_u16_le();
        let mut d4 = [0u8; 8];
        self.buf.copy_to_slice(&mut d4);
        Ok(Uuid::from_fields(d1, d2, d3, &d4))
    }

    pub fn read_status_code(&mut self) -> GatewayResult<StatusCode> {
        self.read_u32().map(StatusCode)
    }

    pub fn read_node_id(&mut self) -> GatewayResult<NodeId> {
        let at = self.position();
        let encoding = self.read_u8()?;
        // high bits flag ExpandedNodeId extras, which a plain NodeId never has
        self.node_id_body(encoding & 0x3F, at)
    }

    fn node_id_body(&mut self, encoding: u8, at: usize) -> GatewayResult<NodeId> {
        let (namespace, identifier) = match encoding {
            0x00 => (0, Identifier::Numeric(self.read_u8()? as u32)),
            0x01 => {
                let ns = self.read_u8()? as u16;
                (ns, Identifier::Numeric(self.read_u16()? as u32))
            }
            0x02 => {
                let ns = self.read_u16()?;
                (ns, Identifier::Numeric(self.read_u32()?))
            }
            0x03 => {
                let ns = self.read_u16()?;
                (ns, Identifier::String(self.read_string()?.unwrap_or_default()))
            }
            0x04 => {
                let ns = self.read_u16()?;
                (ns, Identifier::Guid(self.read_guid()?))
            }
            0x05 => {
                let ns = self.read_u16()?;
                (ns, Identifier::Opaque(self.read_byte_string()?.unwrap_or_default()))
            }
            other => {
                return Err(GatewayError::MalformedBinary(format!(
                    "unknown NodeId encoding 0x{other:02X} at offset {at}"
                )))
            }
        };
        Ok(NodeId {
            namespace,
            identifier,
        })
    }

    /// NodeId followed by the namespace URI (flag 0x80) and server index
    /// (flag 0x40) when present.
    pub fn read_expanded_node_id(&mut self) -> GatewayResult<ExpandedNodeId> {
        let at = self.position();
        let encoding = self.read_u8()?;
        let node_id = self.node_id_body(encoding & 0x3F, at)?;
        let namespace_uri = if encoding & 0x80 != 0 {
            self.read_string()?
        } else {
            None
        };
        let server_index = if encoding & 0x40 != 0 {
            self.read_u32()?
        } else {
            0
        };
        Ok(ExpandedNodeId {
            node_id,
            namespace_uri,
            server_index,
        })
    }

    pub fn read_qualified_name(&mut self) -> GatewayResult<QualifiedName> {
        let namespace_index = self.read_u16()?;
        let name = self.read_string()?.unwrap_or_default();
        Ok(QualifiedName {
            namespace_index,
            name,
        })
    }

    pub fn read_localized_text(&mut self) -> GatewayResult<LocalizedText> {
        let mask = self.read_u8()?;
        let locale = if mask & 0x01 != 0 {
            self.read_string()?.unwrap_or_default()
        } else {
            String::new()
        };
        let text = if mask & 0x02 != 0 {
            self.read_string()?.unwrap_or_default()
        } else {
            String::new()
        };
        Ok(LocalizedText { locale, text })
    }

    pub fn read_extension_object(&mut self) -> GatewayResult<ExtensionObject> {
        let type_id = self.read_node_id()?;
        let at = self.position();
        let body = match self.read_u8()? {
            0x00 => ExtensionBody::None,
            0x01 => ExtensionBody::Binary(self.read_byte_string()?.unwrap_or_default()),
            0x02 => ExtensionBody::Xml(self.read_string()?.unwrap_or_default()),
            other => {
                return Err(GatewayError::MalformedBinary(format!(
                    "unknown ExtensionObject encoding 0x{other:02X} at offset {at}"
                )))
            }
        };
        Ok(ExtensionObject { type_id, body })
    }

    /// Variant entered `depth` levels deep; nesting past `max_depth` is
    /// `EncodingLimitExceeded`.
    pub fn read_variant(&mut self, max_depth: usize, depth: usize) -> GatewayResult<UaValue> {
        ValueCodec::check_depth(max_depth, depth)?;
        let at = self.position();
        let mask = self.read_u8()?;
        let type_id = mask & 0x3F;
        if type_id == 0 {
            return Ok(UaValue::Empty);
        }
        let built_in = BuiltInType::from_id(type_id as u32).ok_or_else(|| {
            GatewayError::MalformedBinary(format!(
                "unknown Variant type {type_id} at offset {at}"
            ))
        })?;
        if mask & 0x80 == 0 {
            return self.variant_scalar(built_in, max_depth, depth + 1);
        }

        let len = self.read_i32()?;
        let len = usize::try_from(len).unwrap_or(0);
        // every element takes at least one byte
        self.need(len, "Variant array")?;
        let mut values = Vec::with_capacity(len);
        for _ in 0..len {
            values.push(self.variant_scalar(built_in, max_depth, depth + 1)?);
        }
        if mask & 0x40 == 0 {
            return Ok(UaValue::array(built_in, values));
        }
        let rank = usize::try_from(self.read_i32()?).unwrap_or(0);
        self.need(rank.saturating_mul(4), "Variant dimensions")?;
        let mut dimensions = Vec::with_capacity(rank);
        for _ in 0..rank {
            let extent = self.read_i32()?;
            dimensions.push(u32::try_from(extent).map_err(|_| {
                GatewayError::MalformedBinary(format!(
                    "negative Variant dimension {extent} at offset {at}"
                ))
            })?);
        }
        let array = UaArray::matrix(built_in, values, dimensions)
            .map_err(|e| GatewayError::MalformedBinary(format!("{e} at offset {at}")))?;
        Ok(UaValue::Array(Box::new(array)))
    }

    fn variant_scalar(
        &mut self,
        built_in: BuiltInType,
        max_depth: usize,
        depth: usize,
    ) -> GatewayResult<UaValue> {
        use BuiltInType as T;
        Ok(match built_in {
            T::Boolean => UaValue::Boolean(self.read_bool()?),
            T::SByte => UaValue::SByte(self.read_i8()?),
            T::Byte => UaValue::Byte(self.read_u8()?),
            T::Int16 => UaValue::Int16(self.read_i16()?),
            T::UInt16 => UaValue::UInt16(self.read_u16()?),
            T::Int32 => UaValue::Int32(self.read_i32()?),
            T::UInt32 => UaValue::UInt32(self.read_u32()?),
            T::Int64 => UaValue::Int64(self.read_i64()?),
            T::UInt64 => UaValue::UInt64(self.read_u64()?),
            T::Float => UaValue::Float(self.read_f32()?),
            T::Double => UaValue::Double(self.read_f64()?),
            T::String => UaValue::String(self.read_string()?.unwrap_or_default()),
            T::DateTime => self.read_date_time()?.map_or(UaValue::Empty, UaValue::DateTime),
            T::Guid => UaValue::Guid(self.read_guid()?),
            T::ByteString => UaValue::ByteString(self.read_byte_string()?.unwrap_or_default()),
            T::XmlElement => UaValue::XmlElement(self.read_string()?.unwrap_or_default()),
            T::NodeId => UaValue::NodeId(self.read_node_id()?),
            T::ExpandedNodeId => UaValue::ExpandedNodeId(self.read_expanded_node_id()?),
            T::StatusCode => UaValue::StatusCode(self.read_status_code()?),
            T::QualifiedName => UaValue::QualifiedName(self.read_qualified_name()?),
            T::LocalizedText => UaValue::LocalizedText(self.read_localized_text()?),
            T::ExtensionObject => UaValue::ExtensionObject(self.read_extension_object()?),
            // a DataValue inside a Variant stands for its value
            T::DataValue => self
                .read_data_value(max_depth, depth)?
                .value
                .unwrap_or(UaValue::Empty),
            T::Variant => UaValue::Variant(Box::new(self.read_variant(max_depth, depth)?)),
            T::DiagnosticInfo => {
                UaValue::DiagnosticInfo(Box::new(self.read_diagnostic_info(max_depth, depth)?))
            }
        })
    }

    pub fn read_data_value(&mut self, max_depth: usize, depth: usize) -> GatewayResult<DataValue> {
        let mask = self.read_u8()?;
        let value = if mask & 0x01 != 0 {
            Some(self.read_variant(max_depth, depth)?)
        } else {
            None
        };
        let status = if mask & 0x02 != 0 {
            self.read_status_code()?
        } else {
            StatusCode::GOOD
        };
        let source_timestamp = if mask & 0x04 != 0 {
            self.read_date_time()?
        } else {
            None
        };
        if mask & 0x10 != 0 {
            self.read_u16()?;
        }
        let server_timestamp = if mask & 0x08 != 0 {
            self.read_date_time()?
        } else {
            None
        };
        if mask & 0x20 != 0 {
            self.read_u16()?;
        }
        Ok(DataValue {
            value,
            status,
            source_timestamp,
            server_timestamp,
        })
    }

    pub fn read_diagnostic_info(
        &mut self,
        max_depth: usize,
        depth: usize,
    ) -> GatewayResult<DiagnosticInfo> {
        ValueCodec::check_depth(max_depth, depth)?;
        let mask = self.read_u8()?;
        let field = |bit: u8, this: &mut Self| -> GatewayResult<Option<i32>> {
            if mask & bit != 0 {
                this.read_i32().map(Some)
            } else {
                Ok(None)
            }
        };
        let symbolic_id = field(0x01, self)?;
        let namespace_uri = field(0x02, self)?;
        let locale = field(0x08, self)?;
        let localized_text = field(0x04, self)?;
        let additional_info = if mask & 0x10 != 0 {
            self.read_string()?
        } else {
            None
        };
        let inner_status_code = if mask & 0x20 != 0 {
            Some(self.read_status_code()?)
        } else {
            None
        };
        let inner_diagnostic_info = if mask & 0x40 != 0 {
            Some(Box::new(self.read_diagnostic_info(max_depth, depth + 1)?))
        } else {
            None
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
