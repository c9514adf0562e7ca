//! Per-server type metadata: data type resolution, object classification,
//! reference type names, enumeration labels and structure dictionaries.
//!
//! Everything here is immutable server metadata, so results are cached for
//! the life of the process, keyed by server URL and node.

use crate::remote::Remote;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use ua_gateway_error::{GatewayError, GatewayResult};
use ua_gateway_sdk::{
    ids, structure::BinaryCursor, AttributeId, BrowseDirection, BuiltInType, EnumDefinition,
    ExtensionBody, NodeId, StructureBinding, TypeDictionary, TypeKind, UaValue, ValueContext,
};

const DEFAULT_BINARY: &str = "Default Binary";

type CacheKey = (String, NodeId);

/// Built-in representation of a variable's DataType.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedType {
    pub built_in: BuiltInType,
    pub kind: TypeKind,
}

pub struct TypeCatalog {
    max_hops: usize,
    data_types: DashMap<CacheKey, ResolvedType>,
    folders: DashMap<CacheKey, bool>,
    reference_names: DashMap<CacheKey, String>,
    enums: DashMap<CacheKey, Arc<EnumDefinition>>,
    bindings: DashMap<CacheKey, Option<StructureBinding>>,
    dictionaries: DashMap<CacheKey, Arc<TypeDictionary>>,
}

impl TypeCatalog {
    pub fn new(max_hops: usize) -> Self {
        Self {
            max_hops,
            data_types: DashMap::new(),
            folders: DashMap::new(),
            reference_names: DashMap::new(),
            enums: DashMap::new(),
            bindings: DashMap::new(),
            dictionaries: DashMap::new(),
        }
    }

    /// Resolve a DataType to its built-in type, walking HasSubtype backward
    /// until a built-in, Enumeration or Structure ancestor.
    pub(crate) async fn data_type(
        &self,
        remote: &Remote<'_>,
        data_type: &NodeId,
    ) -> GatewayResult<ResolvedType> {
        let key = (remote.url().to_string(), data_type.clone());
        if let Some(hit) = self.data_types.get(&key) {
            return Ok(*hit.value());
        }

        let mut current = data_type.clone();
        for _ in 0..=self.max_hops {
            if let Some(resolved) = built_in_data_type(&current) {
                self.data_types.insert(key, resolved);
                return Ok(resolved);
            }
            current = self.supertype(remote, &current, data_type).await?;
        }
        Err(GatewayError::Internal(format!(
            "data type {data_type} has no built-in ancestor within {} hops",
            self.max_hops
        )))
    }

    /// True when the object's type definition derives from FolderType.
    pub(crate) async fn object_is_folder(
        &self,
        remote: &Remote<'_>,
        node: &NodeId,
    ) -> GatewayResult<bool> {
        let defs = remote
            .browse(node, BrowseDirection::Forward, ids::HAS_TYPE_DEFINITION)
            .await?;
        match defs.into_iter().next() {
            Some(def) => self.is_folder_type(remote, &def.node_id).await,
            None => Ok(false),
        }
    }

    /// Classify an object type: FolderType (i=61) or BaseObjectType (i=58),
    /// whichever the backward HasSubtype walk reaches first.
    pub(crate) async fn is_folder_type(
        &self,
        remote: &Remote<'_>,
        type_definition: &NodeId,
    ) -> GatewayResult<bool> {
        let key = (remote.url().to_string(), type_definition.clone());
        if let Some(hit) = self.folders.get(&key) {
            return Ok(*hit.value());
        }

        let mut current = type_definition.clone();
        for _ in 0..=self.max_hops {
            let found = match current.as_ns0() {
                Some(ids::FOLDER_TYPE) => Some(true),
                Some(ids::BASE_OBJECT_TYPE) => Some(false),
                _ => None,
            };
            if let Some(is_folder) = found {
                self.folders.insert(key, is_folder);
                return Ok(is_folder);
            }
            current = self.supertype(remote, &current, type_definition).await?;
        }
        Err(GatewayError::Internal(format!(
            "object type {type_definition} did not reach FolderType or BaseObjectType within {} hops",
            self.max_hops
        )))
    }

    /// Name of a reference type: well-known ns=0 names first, then the
    /// server's BrowseName.
    pub(crate) async fn reference_name(&self, remote: &Remote<'_>, reference_type: &NodeId) -> String {
        if let Some(name) = reference_type.as_ns0().and_then(ids::reference_type_name) {
            return name.to_string();
        }
        let key = (remote.url().to_string(), reference_type.clone());
        if let Some(hit) = self.reference_names.get(&key) {
            return hit.value().clone();
        }
        let name = match remote
            .attributes(reference_type, &[AttributeId::BrowseName])
            .await
        {
            Ok(values) => match values.into_iter().next().and_then(|dv| dv.value) {
                Some(UaValue::QualifiedName(q)) if !q.name.is_empty() => q.name,
                _ => reference_type.to_string(),
            },
            Err(e) => {
                debug!(reference_type = %reference_type, error = %e, "Reference type name unresolved");
                return reference_type.to_string();
            }
        };
        self.reference_names.insert(key, name.clone());
        name
    }

    /// Context needed to encode values of `data_type`. Metadata that cannot be
    /// resolved degrades to a plain context.
    pub(crate) async fn value_context(
        &self,
        remote: &Remote<'_>,
        data_type: &NodeId,
        resolved: ResolvedType,
    ) -> ValueContext {
        match resolved.kind {
            TypeKind::Plain => ValueContext::default(),
            TypeKind::Enumeration => match self.enumeration(remote, data_type).await {
                Ok(def) => ValueContext::enumeration(def),
                Err(e) => {
                    warn!(data_type = %data_type, error = %e, "Enumeration labels unavailable");
                    ValueContext::default()
                }
            },
            TypeKind::Structure => match self.structure(remote, data_type).await {
                Ok(binding) => ValueContext {
                    enumeration: None,
                    structure: binding,
                },
                Err(e) => {
                    warn!(data_type = %data_type, error = %e, "Type dictionary unavailable");
                    ValueContext::default()
                }
            },
        }
    }

    /// Labels from `EnumStrings`, else `EnumValues`, else none.
    pub(crate) async fn enumeration(
        &self,
        remote: &Remote<'_>,
        data_type: &NodeId,
    ) -> GatewayResult<Arc<EnumDefinition>> {
        let key = (remote.url().to_string(), data_type.clone());
        if let Some(hit) = self.enums.get(&key) {
            return Ok(Arc::clone(hit.value()));
        }

        let props = remote
            .browse(data_type, BrowseDirection::Forward, ids::HAS_PROPERTY)
            .await?;
        let find = |name: &str| props.iter().find(|r| r.browse_name.name == name);
        let def = if let Some(strings) = find("EnumStrings") {
            enum_from_strings(&remote.value(&strings.node_id).await?)
        } else if let Some(values) = find("EnumValues") {
            enum_from_values(&remote.value(&values.node_id).await?)?
        } else {
            EnumDefinition::default()
        };

        let def = Arc::new(def);
        self.enums.insert(key, Arc::clone(&def));
        Ok(def)
    }

    /// Dictionary entry for a custom structure:
    /// HasEncoding "Default Binary" -> HasDescription -> the description's
    /// value names the type, its HasComponent parent holds the dictionary.
    pub(crate) async fn structure(
        &self,
        remote: &Remote<'_>,
        data_type: &NodeId,
    ) -> GatewayResult<Option<StructureBinding>> {
        let key = (remote.url().to_string(), data_type.clone());
        if let Some(hit) = self.bindings.get(&key) {
            return Ok(hit.value().clone());
        }
        let binding = self.locate_structure(remote, data_type).await?;
        if binding.is_none() {
            debug!(data_type = %data_type, "No binary type description");
        }
        self.bindings.insert(key, binding.clone());
        Ok(binding)
    }

    async fn locate_structure(
        &self,
        remote: &Remote<'_>,
        data_type: &NodeId,
    ) -> GatewayResult<Option<StructureBinding>> {
        let encodings = remote
            .browse(data_type, BrowseDirection::Forward, ids::HAS_ENCODING)
            .await?;
        let Some(binary) = encodings
            .iter()
            .find(|r| r.browse_name.name == DEFAULT_BINARY)
        else {
            return Ok(None);
        };
        let descriptions = remote
            .browse(&binary.node_id, BrowseDirection::Forward, ids::HAS_DESCRIPTION)
            .await?;
        let Some(description) = descriptions.first() else {
            return Ok(None);
        };
        let type_name = match remote.value(&description.node_id).await? {
            UaValue::String(s) if !s.is_empty() => s,
            _ => return Ok(None),
        };
        let parents = remote
            .browse(&description.node_id, BrowseDirection::Inverse, ids::HAS_COMPONENT)
            .await?;
        let Some(dictionary_node) = parents.first() else {
            return Ok(None);
        };
        let dictionary = self.dictionary(remote, &dictionary_node.node_id).await?;
        if dictionary.structure(&type_name).is_none() {
            return Err(GatewayError::InvalidDictionary(format!(
                "dictionary {} does not declare {type_name}",
                dictionary_node.node_id
            )));
        }
        Ok(Some(StructureBinding {
            dictionary,
            type_name,
        }))
    }

    async fn dictionary(
        &self,
        remote: &Remote<'_>,
        node: &NodeId,
    ) -> GatewayResult<Arc<TypeDictionary>> {
        let key = (remote.url().to_string(), node.clone());
        if let Some(hit) = self.dictionaries.get(&key) {
            return Ok(Arc::clone(hit.value()));
        }
        let xml = match remote.value(node).await? {
            UaValue::ByteString(b) => b,
            other => {
                return Err(GatewayError::InvalidDictionary(format!(
                    "dictionary node {node} holds {:?} instead of a ByteString",
                    other.built_in_type()
                )))
            }
        };
        let dictionary = Arc::new(TypeDictionary::from_bytes(&xml)?);
        debug!(
            node = %node,
            namespace = dictionary.target_namespace().unwrap_or_default(),
            "Type dictionary loaded"
        );
        self.dictionaries.insert(key, Arc::clone(&dictionary));
        Ok(dictionary)
    }

    async fn supertype(
        &self,
        remote: &Remote<'_>,
        current: &NodeId,
        origin: &NodeId,
    ) -> GatewayResult<NodeId> {
        remote
            .browse(current, BrowseDirection::Inverse, ids::HAS_SUBTYPE)
            .await?
            .into_iter()
            .next()
            .map(|r| r.node_id)
            .ok_or_else(|| {
                GatewayError::Internal(format!(
                    "type {current} has no supertype while resolving {origin}"
                ))
            })
    }
}

fn built_in_data_type(node: &NodeId) -> Option<ResolvedType> {
    let id = node.as_ns0()?;
    let (built_in, kind) = match id {
        ids::ENUMERATION => (BuiltInType::Int32, TypeKind::Enumeration),
        ids::STRUCTURE => (BuiltInType::ExtensionObject, TypeKind::Structure),
        _ => (BuiltInType::from_id(id)?, TypeKind::Plain),
    };
    Some(ResolvedType { built_in, kind })
}

fn enum_from_strings(value: &UaValue) -> EnumDefinition {
    match value {
        UaValue::Array(array) => EnumDefinition::from_strings(
            array
                .values
                .iter()
                .map(|v| v.as_str().unwrap_or_default().to_string()),
        ),
        _ => EnumDefinition::default(),
    }
}

/// `EnumValues` is an array of EnumValueType {Value: Int64, DisplayName,
/// Description}, either still binary encoded or decoded by the transport.
fn enum_from_values(value: &UaValue) -> GatewayResult<EnumDefinition> {
    let UaValue::Array(array) = value else {
        return Ok(EnumDefinition::default());
    };
    let mut entries = Vec::with_capacity(array.values.len());
    for item in &array.values {
        let UaValue::ExtensionObject(eo) = item else {
            continue;
        };
        match &eo.body {
            ExtensionBody::Binary(body) => {
                let mut cursor = BinaryCursor::new(body);
                let value = cursor.read_i64()?;
                let name = cursor.read_localized_text()?;
                entries.push((value, name.text));
            }
            ExtensionBody::Structure(fields) => {
                let field = |n: &str| fields.iter().find(|(k, _)| k == n).map(|(_, v)| v);
                if let Some(value) = field("Value").and_then(UaValue::as_i64) {
                    let name = field("DisplayName")
                        .and_then(UaValue::as_str)
                        .unwrap_or_default();
                    entries.push((value, name.to_string()));
                }
            }
            ExtensionBody::None | ExtensionBody::Xml(_) => {}
        }
    }
    Ok(EnumDefinition::from_values(entries))
}
