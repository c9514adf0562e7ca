use super::{
    cursor::BinaryCursor,
    dictionary::{FieldDescription, FieldKind, StructuredType, TypeDictionary},
};
use crate::{
    codec::{float_json, schema, ValueCodec},
    types::{BuiltInType, DataValue},
    value::UaValue,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use ua_gateway_error::{GatewayError, GatewayResult};

type DecodeFn = fn(&mut BinaryCursor<'_>, Nesting) -> GatewayResult<Value>;

/// Depth of a field inside the value being decoded, for the self-describing
/// types that can nest.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Nesting {
    max_depth: usize,
    depth: usize,
}

impl Nesting {
    fn encode(self, value: UaValue) -> GatewayResult<Value> {
        ValueCodec::encode_nested(self.max_depth, &value, self.depth).map(|(v, _)| v)
    }
}

/// Decoder for one dictionary built-in type name.
pub(crate) struct BuiltInDecoder {
    pub name: &'static str,
    pub built_in: BuiltInType,
    /// Smallest encoded size, used to reject absurd element counts early.
    pub min_size: usize,
    pub integer: bool,
    decode: DecodeFn,
}

impl std::fmt::Debug for BuiltInDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltInDecoder")
            .field("name", &self.name)
            .field("built_in", &self.built_in)
            .finish()
    }
}

fn opt_string(v: Option<String>) -> Value {
    v.map(Value::String).unwrap_or(Value::Null)
}

fn timestamp(dt: Option<DateTime<Utc>>) -> Value {
    opt_string(dt.map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
}

fn data_value(dv: DataValue, nesting: Nesting) -> GatewayResult<Value> {
    let value = match dv.value {
        Some(v) => nesting.encode(UaValue::Variant(Box::new(v)))?,
        None => Value::Null,
    };
    Ok(json!({
        "Value": value,
        "StatusCode": dv.status.to_hex(),
        "SourceTimestamp": timestamp(dv.source_timestamp),
        "ServerTimestamp": timestamp(dv.server_timestamp),
    }))
}

/// A run of `width` bits: a single bit is a flag, wider runs are unsigned.
fn bits_json(width: u32, raw: u64) -> (Value, Value) {
    if width == 1 {
        (Value::Bool(raw != 0), schema::scalar(BuiltInType::Boolean))
    } else {
        (
            Value::from(raw),
            json!({ "type": "integer", "minimum": 0, "maximum": (1u64 << width) - 1 }),
        )
    }
}

/// Reads `opc:Bit` runs least significant bit first. Any other field starts
/// on the next byte boundary.
#[derive(Default)]
struct BitReader {
    byte: u8,
    left: u32,
}

impl BitReader {
    fn read(&mut self, cursor: &mut BinaryCursor<'_>, width: u32) -> GatewayResult<u64> {
        let mut raw = 0u64;
        for i in 0..width {
            if self.left == 0 {
                self.byte = cursor.read_u8()?;
                self.left = 8;
            }
            let bit = (self.byte >> (8 - self.left)) & 1;
            raw |= u64::from(bit) << i;
            self.left -= 1;
        }
        Ok(raw)
    }

    fn align(&mut self) {
        self.left = 0;
    }
}

static BUILT_INS: &[BuiltInDecoder] = &[
    BuiltInDecoder {
        name: "Boolean",
        built_in: BuiltInType::Boolean,
        min_size: 1,
        integer: false,
        decode: |c, _| c.read_bool().map(Value::from),
    },
    BuiltInDecoder {
        name: "SByte",
        built_in: BuiltInType::SByte,
        min_size: 1,
        integer: true,
        decode: |c, _| c.read_i8().map(Value::from),
    },
    BuiltInDecoder {
        name: "Byte",
        built_in: BuiltInType::Byte,
        min_size: 1,
        integer: true,
        decode: |c, _| c.read_u8().map(Value::from),
    },
    BuiltInDecoder {
        name: "Int16",
        built_in: BuiltInType::Int16,
        min_size: 2,
        integer: true,
        decode: |c, _| c.read_i16().map(Value::from),
    },
    BuiltInDecoder {
        name: "UInt16",
        built_in: BuiltInType::UInt16,
        min_size: 2,
        integer: true,
        decode: |c, _| c.read_u16().map(Value::from),
    },
    BuiltInDecoder {
        name: "Int32",
        built_in: BuiltInType::Int32,
        min_size: 4,
        integer: true,
        decode: |c, _| c.read_i32().map(Value::from),
    },
    BuiltInDecoder {
        name: "UInt32",
        built_in: BuiltInType::UInt32,
        min_size: 4,
        integer: true,
        decode: |c, _| c.read_u32().map(Value::from),
    },
    BuiltInDecoder {
        name: "Int64",
        built_in: BuiltInType::Int64,
        min_size: 8,
        integer: true,
        decode: |c, _| c.read_i64().map(Value::from),
    },
    BuiltInDecoder {
        name: "UInt64",
        built_in: BuiltInType::UInt64,
        min_size: 8,
        integer: true,
        decode: |c, _| c.read_u64().map(Value::from),
    },
    BuiltInDecoder {
        name: "Float",
        built_in: BuiltInType::Float,
        min_size: 4,
        integer: false,
        decode: |c, _| c.read_f32().map(|f| float_json(f as f64)),
    },
    BuiltInDecoder {
        name: "Double",
        built_in: BuiltInType::Double,
        min_size: 8,
        integer: false,
        decode: |c, _| c.read_f64().map(float_json),
    },
    BuiltInDecoder {
        name: "String",
        built_in: BuiltInType::String,
        min_size: 4,
        integer: false,
        decode: |c, _| c.read_string().map(opt_string),
    },
    BuiltInDecoder {
        name: "CharArray",
        built_in: BuiltInType::String,
        min_size: 4,
        integer: false,
        decode: |c, _| c.read_string().map(opt_string),
    },
    BuiltInDecoder {
        name: "DateTime",
        built_in: BuiltInType::DateTime,
        min_size: 8,
        integer: false,
        decode: |c, _| c.read_date_time().map(timestamp),
    },
    BuiltInDecoder {
        name: "Guid",
        built_in: BuiltInType::Guid,
        min_size: 16,
        integer: false,
        decode: |c, _| c.read_guid().map(|g| Value::String(g.hyphenated().to_string())),
    },
    BuiltInDecoder {
        name: "ByteString",
        built_in: BuiltInType::ByteString,
        min_size: 4,
        integer: false,
        decode: |c, _| c.read_byte_string().map(|b| opt_string(b.map(hex::encode))),
    },
    BuiltInDecoder {
        name: "StatusCode",
        built_in: BuiltInType::StatusCode,
        min_size: 4,
        integer: false,
        decode: |c, _| c.read_status_code().map(|s| Value::String(s.to_hex())),
    },
    BuiltInDecoder {
        name: "NodeId",
        built_in: BuiltInType::NodeId,
        min_size: 2,
        integer: false,
        decode: |c, _| c.read_node_id().map(|n| Value::String(n.to_string())),
    },
    BuiltInDecoder {
        name: "QualifiedName",
        built_in: BuiltInType::QualifiedName,
        min_size: 6,
        integer: false,
        decode: |c, _| c.read_qualified_name().map(|q| Value::String(q.to_string())),
    },
    BuiltInDecoder {
        name: "LocalizedText",
        built_in: BuiltInType::LocalizedText,
        min_size: 1,
        integer: false,
        decode: |c, _| c.read_localized_text().map(|t| Value::String(t.text)),
    },
    BuiltInDecoder {
        name: "XmlElement",
        built_in: BuiltInType::XmlElement,
        min_size: 4,
        integer: false,
        decode: |c, _| c.read_string().map(opt_string),
    },
    BuiltInDecoder {
        name: "ExpandedNodeId",
        built_in: BuiltInType::ExpandedNodeId,
        min_size: 2,
        integer: false,
        decode: |c, _| c.read_expanded_node_id().map(|n| Value::String(n.to_string())),
    },
    BuiltInDecoder {
        name: "ExtensionObject",
        built_in: BuiltInType::ExtensionObject,
        min_size: 3,
        integer: false,
        decode: |c, n| n.encode(UaValue::ExtensionObject(c.read_extension_object()?)),
    },
    BuiltInDecoder {
        name: "Variant",
        built_in: BuiltInType::Variant,
        min_size: 1,
        integer: false,
        decode: |c, n| {
            let v = c.read_variant(n.max_depth, n.depth)?;
            n.encode(UaValue::Variant(Box::new(v)))
        },
    },
    BuiltInDecoder {
        name: "DataValue",
        built_in: BuiltInType::DataValue,
        min_size: 1,
        integer: false,
        decode: |c, n| data_value(c.read_data_value(n.max_depth, n.depth)?, n),
    },
    BuiltInDecoder {
        name: "DiagnosticInfo",
        built_in: BuiltInType::DiagnosticInfo,
        min_size: 1,
        integer: false,
        decode: |c, n| {
            let info = c.read_diagnostic_info(n.max_depth, n.depth)?;
            n.encode(UaValue::DiagnosticInfo(Box::new(info)))
        },
    },
];

pub(crate) fn lookup(name: &str) -> Option<&'static BuiltInDecoder> {
    BUILT_INS.iter().find(|d| d.name == name)
}

impl TypeDictionary {
    /// Decode a binary ExtensionObject body of `type_name` into a JSON object
    /// and its schema.
    ///
    /// Fields are emitted in declared order. A field with a length field is an
    /// array of that many elements; a count of -1 yields `null`. Truncated
    /// input fails as a whole.
    pub fn build_object(
        &self,
        type_name: &str,
        data: &[u8],
        max_depth: usize,
    ) -> GatewayResult<(Value, Value)> {
        self.build_object_at(type_name, data, max_depth, 0)
    }

    /// Same as [`build_object`](Self::build_object), entered `depth` levels
    /// deep inside an encoded value.
    pub(crate) fn build_object_at(
        &self,
        type_name: &str,
        data: &[u8],
        max_depth: usize,
        depth: usize,
    ) -> GatewayResult<(Value, Value)> {
        let st = self.structure(type_name).ok_or_else(|| {
            GatewayError::InvalidDictionary(format!("unknown structured type {type_name}"))
        })?;
        let mut cursor = BinaryCursor::new(data);
        let out = StructureDecoder {
            dictionary: self,
            max_depth,
        }
        .structure(st, &mut cursor, depth)?;
        if cursor.remaining() > 0 {
            tracing::debug!(
                type_name,
                trailing = cursor.remaining(),
                "ignoring trailing bytes after structure"
            );
        }
        Ok(out)
    }
}

struct StructureDecoder<'d> {
    dictionary: &'d TypeDictionary,
    max_depth: usize,
}

impl StructureDecoder<'_> {
    fn structure(
        &self,
        st: &StructuredType,
        cursor: &mut BinaryCursor<'_>,
        depth: usize,
    ) -> GatewayResult<(Value, Value)> {
        ValueCodec::check_depth(self.max_depth, depth)?;

        let mut values = Map::with_capacity(st.fields.len());
        let mut properties = Map::with_capacity(st.fields.len());
        // integer value per field, consulted by later length and switch fields
        let mut raws: Vec<Option<i64>> = Vec::with_capacity(st.fields.len());
        let mut bits = BitReader::default();

        for field in &st.fields {
            if let Some(switch) = field.switch {
                let selector = raws.get(switch.index).copied().flatten();
                let present = match switch.value {
                    Some(expected) => selector == Some(expected),
                    None => selector.is_some_and(|v| v != 0),
                };
                // absent optional fields and union members are omitted
                if !present {
                    raws.push(None);
                    continue;
                }
            }

            let (value, schema) = match (&field.kind, field.length_index) {
                (FieldKind::Bits(width), _) => {
                    let raw = bits.read(cursor, *width)?;
                    raws.push(Some(raw as i64));
                    let (value, schema) = bits_json(*width, raw);
                    values.insert(field.name.clone(), value);
                    properties.insert(field.name.clone(), schema);
                    continue;
                }
                (_, None) => {
                    bits.align();
                    self.element(field, cursor, depth)?
                }
                (_, Some(index)) => {
                    bits.align();
                    let count = raws.get(index).copied().flatten().ok_or_else(|| {
                        GatewayError::MalformedBinary(format!(
                            "length field of {}.{} is absent",
                            st.name, field.name
                        ))
                    })?;
                    self.array(field, count, cursor, depth)?
                }
            };
            raws.push(value.as_i64());
            values.insert(field.name.clone(), value);
            properties.insert(field.name.clone(), schema);
        }

        Ok((Value::Object(values), schema::object(properties)))
    }

    fn array(
        &self,
        field: &FieldDescription,
        count: i64,
        cursor: &mut BinaryCursor<'_>,
        depth: usize,
    ) -> GatewayResult<(Value, Value)> {
        if count == -1 {
            return Ok((Value::Null, schema::null()));
        }
        let count = usize::try_from(count).map_err(|_| {
            GatewayError::MalformedBinary(format!("negative length {count} for {}", field.name))
        })?;
        if let FieldKind::BuiltIn(d) = field.kind {
            if count.saturating_mul(d.min_size) > cursor.remaining() {
                return Err(GatewayError::MalformedBinary(format!(
                    "{} elements of {} exceed the {} remaining bytes",
                    count,
                    field.name,
                    cursor.remaining()
                )));
            }
        }

        let mut items = Vec::with_capacity(count.min(cursor.remaining()));
        let mut item_schema = None;
        for _ in 0..count {
            let (v, s) = self.element(field, cursor, depth)?;
            items.push(v);
            item_schema.get_or_insert(s);
        }
        let item_schema = item_schema.unwrap_or_else(|| self.empty_schema(field));
        Ok((Value::Array(items), schema::array(item_schema, count as u32)))
    }

    fn element(
        &self,
        field: &FieldDescription,
        cursor: &mut BinaryCursor<'_>,
        depth: usize,
    ) -> GatewayResult<(Value, Value)> {
        match &field.kind {
            FieldKind::BuiltIn(d) => {
                let nesting = Nesting {
                    max_depth: self.max_depth,
                    depth: depth + 1,
                };
                Ok(((d.decode)(cursor, nesting)?, schema::scalar(d.built_in)))
            }
            FieldKind::Bits(width) => {
                let raw = BitReader::default().read(cursor, *width)?;
                Ok(bits_json(*width, raw))
            }
            FieldKind::Enumerated(name) => {
                let ty = self.dictionary.enumeration(name).ok_or_else(|| {
                    GatewayError::InvalidDictionary(format!("unknown enumeration {name}"))
                })?;
                let raw = match ty.length_in_bits {
                    8 => cursor.read_i8()? as i64,
                    16 => cursor.read_i16()? as i64,
                    _ => cursor.read_i32()? as i64,
                };
                let label = ty
                    .values
                    .iter()
                    .find(|(v, _)| *v == raw)
                    .map(|(_, l)| l.as_str())
                    .unwrap_or("");
                Ok((
                    json!({ "EnumValue": raw, "EnumLabel": label }),
                    schema::enumeration(),
                ))
            }
            FieldKind::Structured(name) => {
                let st = self.dictionary.structure(name).ok_or_else(|| {
                    GatewayError::InvalidDictionary(format!("unknown structured type {name}"))
                })?;
                self.structure(st, cursor, depth + 1)
            }
        }
    }

    fn empty_schema(&self, field: &FieldDescription) -> Value {
        match &field.kind {
            FieldKind::BuiltIn(d) => schema::scalar(d.built_in),
            FieldKind::Bits(width) => bits_json(*width, 0).1,
            FieldKind::Enumerated(_) => schema::enumeration(),
            FieldKind::Structured(_) => json!({ "type": "object" }),
        }
    }
}
