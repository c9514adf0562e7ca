use crate::{
    connection::ConnectionRegistry,
    dictionary::TypeCatalog,
    remote::{platform_id, status_text, Remote},
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument};
use ua_gateway_error::{GatewayError, GatewayResult};
use ua_gateway_models::{NodeDescriptor, NodeEdge, NodeType};
use ua_gateway_sdk::{
    ids, AttributeId, BrowseDirection, BuiltInType, DataValue, DeadbandType, DeclaredType,
    NodeClass, NodeId, PlatformNodeId, StatusCode, TypeKind, UaValue, ValueCodec, ValueRank,
    ACCESS_LEVEL_CURRENT_WRITE,
};

const EU_RANGE: &str = "EURange";

/// Read, write and browse of single nodes.
pub struct NodeAccessor {
    registry: Arc<ConnectionRegistry>,
    catalog: Arc<TypeCatalog>,
    codec: ValueCodec,
}

impl NodeAccessor {
    pub fn new(registry: Arc<ConnectionRegistry>, catalog: Arc<TypeCatalog>, codec: ValueCodec) -> Self {
        Self {
            registry,
            catalog,
            codec,
        }
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn read_node(&self, server_url: &str, node_id: &str) -> GatewayResult<NodeDescriptor> {
        let id = PlatformNodeId::parse(node_id)?;
        let session = self.registry.acquire(server_url).await?;
        let remote = Remote::new(server_url, session.as_ref());
        let node = id.node_id();

        let head = remote
            .attributes(node, &[AttributeId::NodeClass, AttributeId::DisplayName])
            .await?;
        let mut head = head.into_iter();
        let class_dv = head.next().unwrap_or_default();
        let name_dv = head.next().unwrap_or_default();
        if class_dv.status.is_bad() {
            return Err(remote.status_error(node, class_dv.status));
        }
        let class = class_dv
            .value
            .as_ref()
            .and_then(UaValue::as_i64)
            .map(|c| NodeClass::from_i32(c as i32))
            .unwrap_or(NodeClass::Unspecified);
        let name = display_name(&name_dv).unwrap_or_else(|| id.to_string());

        match class {
            NodeClass::Variable => self.describe_variable(&remote, &id, name).await,
            NodeClass::Object => {
                let is_folder = self.catalog.object_is_folder(&remote, node).await?;
                Ok(NodeDescriptor::new(
                    id.to_string(),
                    name,
                    NodeType::from_class(class, is_folder),
                ))
            }
            _ => Ok(NodeDescriptor::new(
                id.to_string(),
                name,
                NodeType::from_class(class, false),
            )),
        }
    }

    async fn describe_variable(
        &self,
        remote: &Remote<'_>,
        id: &PlatformNodeId,
        name: String,
    ) -> GatewayResult<NodeDescriptor> {
        let node = id.node_id();
        let attrs = remote
            .attributes(
                node,
                &[
                    AttributeId::Value,
                    AttributeId::DataType,
                    AttributeId::MinimumSamplingInterval,
                ],
            )
            .await?;
        let mut attrs = attrs.into_iter();
        let value_dv = attrs.next().unwrap_or_default();
        let type_dv = attrs.next().unwrap_or_default();
        let interval_dv = attrs.next().unwrap_or_default();

        let mut desc = NodeDescriptor::new(id.to_string(), name, NodeType::Variable);
        desc.status = Some(status_text(value_dv.status));
        desc.minimum_sampling_interval = match interval_dv.value {
            Some(UaValue::Double(ms)) if interval_dv.status.is_good() => Some(ms),
            _ => None,
        };

        let data_type = type_dv.value.as_ref().and_then(UaValue::as_node_id).cloned();
        let (resolved, ctx) = match &data_type {
            Some(dt) => {
                let resolved = self.catalog.data_type(remote, dt).await?;
                let ctx = self.catalog.value_context(remote, dt, resolved).await;
                (Some(resolved), ctx)
            }
            None => (None, Default::default()),
        };

        desc.dead_band = match resolved {
            Some(r) if r.kind == TypeKind::Plain && r.built_in.is_numeric() => {
                let mut kinds = vec![DeadbandType::Absolute];
                if self.has_property(remote, node, EU_RANGE).await? {
                    kinds.push(DeadbandType::Percent);
                }
                kinds.push(DeadbandType::None);
                kinds
            }
            _ => vec![DeadbandType::None],
        };

        if value_dv.status.is_bad() {
            debug!(node = %id, status = %value_dv.status, "Variable value not readable");
            return Ok(desc);
        }
        let value = value_dv.value.unwrap_or(UaValue::Empty);
        let encoded = self.codec.encode(&value, &ctx)?;
        desc.value = Some(encoded.value);
        desc.value_schema = Some(encoded.schema);
        Ok(desc)
    }

    /// Validate `json` against the node's declared type and write it.
    #[instrument(level = "debug", skip(self, json))]
    pub async fn write_node(&self, server_url: &str, node_id: &str, json: &Value) -> GatewayResult<()> {
        let id = PlatformNodeId::parse(node_id)?;
        let session = self.registry.acquire(server_url).await?;
        let remote = Remote::new(server_url, session.as_ref());
        let node = id.node_id();

        let attrs = remote
            .attributes(
                node,
                &[
                    AttributeId::DataType,
                    AttributeId::ValueRank,
                    AttributeId::ArrayDimensions,
                    AttributeId::AccessLevel,
                    AttributeId::UserAccessLevel,
                    AttributeId::Value,
                ],
            )
            .await?;
        let mut attrs = attrs.into_iter();
        let type_dv = attrs.next().unwrap_or_default();
        let rank_dv = attrs.next().unwrap_or_default();
        let dims_dv = attrs.next().unwrap_or_default();
        let access_dv = attrs.next().unwrap_or_default();
        let user_access_dv = attrs.next().unwrap_or_default();
        let current_dv = attrs.next().unwrap_or_default();
        if type_dv.status.is_bad() {
            return Err(match type_dv.status.sub_code() {
                StatusCode::BAD_ATTRIBUTE_ID_INVALID => {
                    GatewayError::NodeNotWritable(format!("{id} is not a variable"))
                }
                _ => remote.status_error(node, type_dv.status),
            });
        }
        for level in [&access_dv, &user_access_dv] {
            if let Some(bits) = level.value.as_ref().and_then(UaValue::as_i64) {
                if level.status.is_good() && bits & i64::from(ACCESS_LEVEL_CURRENT_WRITE) == 0 {
                    return Err(GatewayError::NodeNotWritable(format!(
                        "{id} access level {bits:#04x} lacks CurrentWrite"
                    )));
                }
            }
        }

        let data_type = type_dv
            .value
            .as_ref()
            .and_then(UaValue::as_node_id)
            .ok_or_else(|| GatewayError::Internal(format!("{id} reported no DataType")))?;
        let resolved = self.catalog.data_type(&remote, data_type).await?;
        let declared = declared_type(resolved, &rank_dv, &dims_dv, &current_dv);

        let value = self.codec.decode(json, &declared)?;
        let status = remote.write(node, value).await?;
        write_outcome(&remote, &id, &declared, status)
    }

    /// Forward hierarchical references of a node, in server order.
    #[instrument(level = "debug", skip(self))]
    pub async fn browse(&self, server_url: &str, node_id: &str) -> GatewayResult<Vec<NodeEdge>> {
        let id = PlatformNodeId::parse(node_id)?;
        let session = self.registry.acquire(server_url).await?;
        let remote = Remote::new(server_url, session.as_ref());

        let refs = remote
            .browse(id.node_id(), BrowseDirection::Forward, ids::HIERARCHICAL_REFERENCES)
            .await?;
        let mut edges = Vec::with_capacity(refs.len());
        for r in refs.into_iter().filter(|r| r.is_forward) {
            let is_folder = match (&r.node_class, &r.type_definition) {
                (NodeClass::Object, Some(def)) => self.catalog.is_folder_type(&remote, def).await?,
                _ => false,
            };
            let relationship = self.catalog.reference_name(&remote, &r.reference_type_id).await;
            let name = if r.display_name.text.is_empty() {
                r.browse_name.name
            } else {
                r.display_name.text
            };
            edges.push(NodeEdge {
                node_id: platform_id(&r.node_id),
                name,
                node_type: NodeType::from_class(r.node_class, is_folder),
                relationship,
            });
        }
        Ok(edges)
    }

    async fn has_property(&self, remote: &Remote<'_>, node: &NodeId, name: &str) -> GatewayResult<bool> {
        let props = remote
            .browse(node, BrowseDirection::Forward, ids::HAS_PROPERTY)
            .await?;
        Ok(props.iter().any(|r| r.browse_name.name == name))
    }
}

fn display_name(dv: &DataValue) -> Option<String> {
    match &dv.value {
        Some(UaValue::LocalizedText(t)) if dv.status.is_good() && !t.text.is_empty() => {
            Some(t.text.clone())
        }
        _ => None,
    }
}

/// Decode target of a write. Abstract data types that resolve to Variant
/// take the type of the value currently held by the node.
fn declared_type(
    resolved: crate::dictionary::ResolvedType,
    rank: &DataValue,
    dims: &DataValue,
    current: &DataValue,
) -> DeclaredType {
    let value_rank = rank
        .value
        .as_ref()
        .and_then(UaValue::as_i64)
        .map(|r| ValueRank::from_i32(r as i32))
        .unwrap_or(ValueRank::Scalar);

    let array_dimensions = match &dims.value {
        Some(UaValue::Array(a)) if !a.values.is_empty() => Some(
            a.values
                .iter()
                .map(|d| d.as_i64().and_then(|d| u32::try_from(d).ok()).unwrap_or_default())
                .collect::<Vec<_>>(),
        ),
        _ => None,
    };

    let built_in = match (resolved.built_in, resolved.kind, &current.value) {
        (BuiltInType::Variant, TypeKind::Plain, Some(v)) => {
            v.built_in_type().unwrap_or(BuiltInType::Variant)
        }
        (b, _, _) => b,
    };

    let declared = DeclaredType::scalar(built_in)
        .with_rank(value_rank)
        .with_kind(resolved.kind);
    match array_dimensions {
        Some(d) => declared.with_dimensions(d),
        None => declared,
    }
}

fn write_outcome(
    remote: &Remote<'_>,
    id: &PlatformNodeId,
    declared: &DeclaredType,
    status: StatusCode,
) -> GatewayResult<()> {
    if status.is_good() {
        return Ok(());
    }
    Err(match status.sub_code() {
        StatusCode::BAD_NOT_WRITABLE | StatusCode::BAD_USER_ACCESS_DENIED => {
            GatewayError::NodeNotWritable(format!("{id}: {status}"))
        }
        StatusCode::BAD_TYPE_MISMATCH => GatewayError::mismatch(
            "value",
            declared.built_in.name(),
            format!("value rejected by server ({status})"),
        ),
        StatusCode::BAD_OUT_OF_RANGE => GatewayError::out_of_range("value", declared.built_in.name()),
        _ => remote.status_error(id.node_id(), status),
    })
}
