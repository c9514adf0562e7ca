//! Transport seam between the gateway core and an OPC UA client stack.
//!
//! The core only talks to [`UaConnector`] and [`UaSession`]; the production
//! implementation lives in the `opcua` southward crate and tests use
//! in-memory fakes.

use crate::{
    node_id::NodeId,
    types::{AttributeId, DataValue, LocalizedText, NodeClass, QualifiedName, StatusCode},
    value::UaValue,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc, time::Duration};
use ua_gateway_error::GatewayResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageSecurityMode {
    None,
    Sign,
    SignAndEncrypt,
}

/// One endpoint advertised by a server's discovery service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescription {
    pub endpoint_url: String,
    pub security_policy_uri: String,
    pub security_mode: MessageSecurityMode,
    pub security_level: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowseDirection {
    Forward,
    Inverse,
    Both,
}

/// Single-node browse request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseRequest {
    pub node_id: NodeId,
    pub direction: BrowseDirection,
    pub reference_type_id: NodeId,
    pub include_subtypes: bool,
}

impl BrowseRequest {
    pub fn new(node_id: NodeId, direction: BrowseDirection, reference_type: u32) -> Self {
        Self {
            node_id,
            direction,
            reference_type_id: NodeId::numeric(0, reference_type),
            include_subtypes: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceDescription {
    pub reference_type_id: NodeId,
    pub is_forward: bool,
    pub node_id: NodeId,
    pub browse_name: QualifiedName,
    pub display_name: LocalizedText,
    pub node_class: NodeClass,
    pub type_definition: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadValueId {
    pub node_id: NodeId,
    pub attribute_id: AttributeId,
}

impl ReadValueId {
    pub fn new(node_id: NodeId, attribute_id: AttributeId) -> Self {
        Self {
            node_id,
            attribute_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubscriptionParams {
    pub publishing_interval: Duration,
    pub lifetime_count: u32,
    pub max_keep_alive_count: u32,
    pub max_notifications_per_publish: u32,
    pub priority: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeadbandType {
    None,
    Absolute,
    Percent,
}

/// DataChange filter: trigger on status or value, with an optional deadband.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataChangeFilter {
    pub deadband_type: DeadbandType,
    pub deadband_value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemRequest {
    pub node_id: NodeId,
    /// Handle echoed back on every change notification for this item.
    pub client_handle: u32,
    pub sampling_interval: f64,
    pub queue_size: u32,
    pub discard_oldest: bool,
    pub filter: DataChangeFilter,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemResult {
    pub status: StatusCode,
    pub monitored_item_id: u32,
    pub revised_sampling_interval: f64,
}

/// Invoked on the transport's notification path with the client handle of
/// the item and its new value. Must not block.
pub type DataChangeCallback = Arc<dyn Fn(u32, DataValue) + Send + Sync>;

/// A live, activated session to one server.
///
/// Service-level failures (transport down, session gone) are returned as
/// errors; per-operation results carry their own status codes.
#[async_trait]
pub trait UaSession: Send + Sync {
    async fn read(&self, nodes: &[ReadValueId]) -> GatewayResult<Vec<DataValue>>;

    async fn write(&self, node_id: &NodeId, value: UaValue) -> GatewayResult<StatusCode>;

    /// Follows continuation points until the result set is complete. A bad
    /// browse status is an error; `BadNodeIdUnknown` maps to `NodeNotFound`.
    async fn browse(&self, request: &BrowseRequest) -> GatewayResult<Vec<ReferenceDescription>>;

    /// Create a subscription whose data change notifications are routed to
    /// `on_change`. Returns the server-assigned subscription id.
    async fn create_subscription(
        &self,
        params: &SubscriptionParams,
        on_change: DataChangeCallback,
    ) -> GatewayResult<u32>;

    /// One result per request, in request order.
    async fn create_monitored_items(
        &self,
        subscription_id: u32,
        items: Vec<MonitoredItemRequest>,
    ) -> GatewayResult<Vec<MonitoredItemResult>>;

    async fn delete_monitored_items(
        &self,
        subscription_id: u32,
        monitored_item_ids: &[u32],
    ) -> GatewayResult<()>;

    async fn delete_subscription(&self, subscription_id: u32) -> GatewayResult<()>;

    async fn disconnect(&self);
}

/// Discovers endpoints and opens sessions.
#[async_trait]
pub trait UaConnector: Send + Sync {
    async fn discover_endpoints(&self, server_url: &str) -> GatewayResult<Vec<EndpointDescription>>;

    async fn connect(
        &self,
        server_url: &str,
        endpoint: &EndpointDescription,
    ) -> GatewayResult<Arc<dyn UaSession>>;
}

impl fmt::Debug for dyn UaSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UaSession")
    }
}
