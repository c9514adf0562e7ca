use super::decoder::{self, BuiltInDecoder};
use crate::codec::EnumDefinition;
use quick_xml::{events::Event, Reader};
use std::collections::{HashMap, HashSet};
use tracing::warn;
use ua_gateway_error::{GatewayError, GatewayResult};

/// Widest `opc:Bit` field accepted.
const MAX_BIT_LENGTH: u32 = 32;

/// A parsed and validated `opc:TypeDictionary`.
///
/// Every field type is resolved when the dictionary is loaded, so decoding
/// never meets an unknown type name. A structured type that cannot be
/// resolved is left out with a warning, together with every type that embeds
/// it; the rest of the dictionary stays usable.
#[derive(Debug, Clone, Default)]
pub struct TypeDictionary {
    target_namespace: Option<String>,
    structures: HashMap<String, StructuredType>,
    enums: HashMap<String, EnumeratedType>,
}

#[derive(Debug, Clone)]
pub struct StructuredType {
    pub name: String,
    pub fields: Vec<FieldDescription>,
}

#[derive(Debug, Clone)]
pub struct FieldDescription {
    pub name: String,
    pub type_name: String,
    pub length_field: Option<String>,
    pub switch_field: Option<String>,
    pub(crate) kind: FieldKind,
    /// Index of the earlier field holding this field's element count.
    pub(crate) length_index: Option<usize>,
    pub(crate) switch: Option<Switch>,
}

#[derive(Debug, Clone)]
pub(crate) enum FieldKind {
    BuiltIn(&'static BuiltInDecoder),
    /// `opc:Bit` run of the given width, packed least significant bit first.
    Bits(u32),
    Structured(String),
    Enumerated(String),
}

/// Presence condition of an optional field or union member.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Switch {
    /// Index of the earlier field that selects this one.
    pub index: usize,
    /// `SwitchValue`; without it any non-zero selector enables the field.
    pub value: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct EnumeratedType {
    pub name: String,
    pub length_in_bits: u32,
    pub values: Vec<(i64, String)>,
}

impl EnumeratedType {
    pub fn definition(&self) -> EnumDefinition {
        EnumDefinition::from_values(self.values.clone())
    }
}

#[derive(Default)]
struct RawStruct {
    name: String,
    fields: Vec<RawField>,
}

struct RawField {
    name: String,
    type_name: String,
    length_field: Option<String>,
    length: Option<String>,
    switch_field: Option<String>,
    switch_value: Option<String>,
}

/// Split `prefix:Local` into its parts.
fn split_qualified(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    }
}

fn attr(e: &quick_xml::events::BytesStart<'_>, key: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key.as_bytes())
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

fn is_integer_scalar(field: &FieldDescription) -> bool {
    field.length_index.is_none()
        && match field.kind {
            FieldKind::BuiltIn(d) => d.integer,
            FieldKind::Bits(_) => true,
            _ => false,
        }
}

impl TypeDictionary {
    pub fn parse(xml: &str) -> GatewayResult<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut target_namespace = None;
        let mut structs: Vec<RawStruct> = Vec::new();
        let mut enums: HashMap<String, EnumeratedType> = HashMap::new();
        let mut current_struct: Option<RawStruct> = None;
        let mut current_enum: Option<EnumeratedType> = None;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| GatewayError::InvalidDictionary(format!("xml error: {e}")))?;
            match event {
                Event::Start(ref e) | Event::Empty(ref e) => {
                    let is_empty = matches!(event, Event::Empty(_));
                    match e.local_name().as_ref() {
                        b"TypeDictionary" => {
                            target_namespace = attr(e, "TargetNamespace");
                        }
                        b"StructuredType" => {
                            let name = attr(e, "Name").ok_or_else(|| {
                                GatewayError::InvalidDictionary("StructuredType without Name".into())
                            })?;
                            let raw = RawStruct {
                                name,
                                fields: Vec::new(),
                            };
                            if is_empty {
                                structs.push(raw);
                            } else {
                                current_struct = Some(raw);
                            }
                        }
                        b"Field" => {
                            let Some(raw) = current_struct.as_mut() else {
                                continue;
                            };
                            let name = attr(e, "Name").ok_or_else(|| {
                                GatewayError::InvalidDictionary(format!(
                                    "field without Name in {}",
                                    raw.name
                                ))
                            })?;
                            let type_name = attr(e, "TypeName").ok_or_else(|| {
                                GatewayError::InvalidDictionary(format!(
                                    "field {}.{name} without TypeName",
                                    raw.name
                                ))
                            })?;
                            raw.fields.push(RawField {
                                name,
                                type_name,
                                length_field: attr(e, "LengthField"),
                                length: attr(e, "Length"),
                                switch_field: attr(e, "SwitchField"),
                                switch_value: attr(e, "SwitchValue"),
                            });
                        }
                        b"EnumeratedType" => {
                            let name = attr(e, "Name").ok_or_else(|| {
                                GatewayError::InvalidDictionary("EnumeratedType without Name".into())
                            })?;
                            let length_in_bits = attr(e, "LengthInBits")
                                .map(|v| v.parse::<u32>())
                                .transpose()
                                .map_err(|_| {
                                    GatewayError::InvalidDictionary(format!(
                                        "bad LengthInBits on {name}"
                                    ))
                                })?
                                .unwrap_or(32);
                            let ty = EnumeratedType {
                                name,
                                length_in_bits,
                                values: Vec::new(),
                            };
                            if is_empty {
                                enums.insert(ty.name.clone(), ty);
                            } else {
                                current_enum = Some(ty);
                            }
                        }
                        b"EnumeratedValue" => {
                            let Some(ty) = current_enum.as_mut() else {
                                continue;
                            };
                            let label = attr(e, "Name").unwrap_or_default();
                            let value = attr(e, "Value")
                                .and_then(|v| v.parse::<i64>().ok())
                                .ok_or_else(|| {
                                    GatewayError::InvalidDictionary(format!(
                                        "EnumeratedValue {label} in {} without integer Value",
                                        ty.name
                                    ))
                                })?;
                            ty.values.push((value, label));
                        }
                        _ => {}
                    }
                }
                Event::End(ref e) => match e.local_name().as_ref() {
                    b"StructuredType" => {
                        if let Some(raw) = current_struct.take() {
                            structs.push(raw);
                        }
                    }
                    b"EnumeratedType" => {
                        if let Some(ty) = current_enum.take() {
                            enums.insert(ty.name.clone(), ty);
                        }
                    }
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(Self::resolve(target_namespace, structs, enums))
    }

    pub fn from_bytes(xml: &[u8]) -> GatewayResult<Self> {
        let text = std::str::from_utf8(xml)
            .map_err(|_| GatewayError::InvalidDictionary("dictionary is not UTF-8".into()))?;
        Self::parse(text)
    }

    fn resolve(
        target_namespace: Option<String>,
        raw_structs: Vec<RawStruct>,
        mut enums: HashMap<String, EnumeratedType>,
    ) -> Self {
        enums.retain(|name, ty| {
            let supported = matches!(ty.length_in_bits, 8 | 16 | 32);
            if !supported {
                warn!(
                    enumeration = %name,
                    length_in_bits = ty.length_in_bits,
                    "Skipping enumeration with unsupported LengthInBits"
                );
            }
            supported
        });

        // dropping a type can invalidate types embedding it, so repeat until stable
        let mut usable = raw_structs
            .iter()
            .map(|s| s.name.clone())
            .collect::<HashSet<_>>();
        let mut structures = HashMap::with_capacity(raw_structs.len());
        loop {
            structures.clear();
            let mut dropped = false;
            for raw in raw_structs.iter() {
                if !usable.contains(&raw.name) {
                    continue;
                }
                match Self::resolve_struct(raw, &usable, &enums) {
                    Ok(st) => {
                        structures.insert(raw.name.clone(), st);
                    }
                    Err(e) => {
                        warn!(structure = %raw.name, error = %e, "Skipping structured type");
                        usable.remove(&raw.name);
                        dropped = true;
                    }
                }
            }
            if !dropped {
                break;
            }
        }

        Self {
            target_namespace,
            structures,
            enums,
        }
    }

    fn resolve_struct(
        raw: &RawStruct,
        structs: &HashSet<String>,
        enums: &HashMap<String, EnumeratedType>,
    ) -> GatewayResult<StructuredType> {
        let invalid = |field: &str, reason: String| {
            GatewayError::InvalidDictionary(format!("field {}.{field} {reason}", raw.name))
        };
        let earlier = |fields: &[FieldDescription], name: &str| {
            fields.iter().position(|prev| prev.name == name)
        };

        let mut fields: Vec<FieldDescription> = Vec::with_capacity(raw.fields.len());
        for f in &raw.fields {
            let kind = match split_qualified(&f.type_name) {
                (Some("opc") | Some("ua") | None, "Bit") => {
                    let width = match &f.length {
                        None => 1,
                        Some(v) => v
                            .parse::<u32>()
                            .map_err(|_| invalid(&f.name, format!("has bad Length {v}")))?,
                    };
                    if !(1..=MAX_BIT_LENGTH).contains(&width) {
                        return Err(invalid(&f.name, format!("has unsupported bit width {width}")));
                    }
                    if f.length_field.is_some() {
                        return Err(invalid(&f.name, "is a bit array".into()));
                    }
                    FieldKind::Bits(width)
                }
                _ => Self::resolve_kind(&f.type_name, structs, enums)
                    .ok_or_else(|| invalid(&f.name, format!("has unknown type {}", f.type_name)))?,
            };

            let length_index = match &f.length_field {
                None => None,
                Some(length_name) => {
                    let index = earlier(&fields, length_name).ok_or_else(|| {
                        invalid(
                            &f.name,
                            format!("sized by {length_name}, which is not declared before it"),
                        )
                    })?;
                    if !matches!(fields[index].kind, FieldKind::BuiltIn(d) if d.integer)
                        || fields[index].length_index.is_some()
                    {
                        return Err(invalid(
                            length_name,
                            "is used as a length field but is not a scalar integer".into(),
                        ));
                    }
                    Some(index)
                }
            };

            let switch = match &f.switch_field {
                None => None,
                Some(switch_name) => {
                    let index = earlier(&fields, switch_name).ok_or_else(|| {
                        invalid(
                            &f.name,
                            format!("switched by {switch_name}, which is not declared before it"),
                        )
                    })?;
                    if !is_integer_scalar(&fields[index]) {
                        return Err(invalid(
                            switch_name,
                            "is used as a switch field but is not a bit or scalar integer".into(),
                        ));
                    }
                    let value = f
                        .switch_value
                        .as_deref()
                        .map(|v| {
                            v.parse::<i64>()
                                .map_err(|_| invalid(&f.name, format!("has bad SwitchValue {v}")))
                        })
                        .transpose()?;
                    Some(Switch { index, value })
                }
            };

            fields.push(FieldDescription {
                name: f.name.clone(),
                type_name: f.type_name.clone(),
                length_field: f.length_field.clone(),
                switch_field: f.switch_field.clone(),
                kind,
                length_index,
                switch,
            });
        }

        Ok(StructuredType {
            name: raw.name.clone(),
            fields,
        })
    }

    fn resolve_kind(
        type_name: &str,
        structs: &HashSet<String>,
        enums: &HashMap<String, EnumeratedType>,
    ) -> Option<FieldKind> {
        let (prefix, local) = split_qualified(type_name);
        let builtin = || decoder::lookup(local).map(FieldKind::BuiltIn);
        let local_type = || {
            if structs.contains(local) {
                Some(FieldKind::Structured(local.to_string()))
            } else if enums.contains_key(local) {
                Some(FieldKind::Enumerated(local.to_string()))
            } else {
                None
            }
        };
        match prefix {
            Some("opc") | Some("ua") => builtin().or_else(local_type),
            _ => local_type().or_else(builtin),
        }
    }

    pub fn target_namespace(&self) -> Option<&str> {
        self.target_namespace.as_deref()
    }

    pub fn structure(&self, name: &str) -> Option<&StructuredType> {
        self.structures.get(name)
    }

    pub fn enumeration(&self, name: &str) -> Option<&EnumeratedType> {
        self.enums.get(name)
    }

    pub fn structure_names(&self) -> impl Iterator<Item = &str> {
        self.structures.keys().map(String::as_str)
    }
}
