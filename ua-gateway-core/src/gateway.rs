use crate::{
    accessor::NodeAccessor,
    connection::ConnectionRegistry,
    dictionary::TypeCatalog,
    publisher_pool::PublisherPool,
    subscription::{SubscriptionEngine, SubscriptionOptions},
};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;
use ua_gateway_error::{GatewayError, GatewayResult};
use ua_gateway_models::{
    MonitorRequest, NodeDescriptor, NodeEdge, ServerRegistry, Settings, StopMonitorRequest,
};
use ua_gateway_sdk::{PublisherFactory, UaConnector, ValueCodec};

/// Entry point for a request layer: every operation takes the URL of a
/// registered server.
pub struct Gateway {
    data_sets: ServerRegistry,
    registry: Arc<ConnectionRegistry>,
    publishers: Arc<PublisherPool>,
    accessor: NodeAccessor,
    subscriptions: SubscriptionEngine,
}

impl Gateway {
    pub fn new(
        settings: &Settings,
        connector: Arc<dyn UaConnector>,
        publisher_factory: Arc<dyn PublisherFactory>,
    ) -> Self {
        let codec = ValueCodec::new(settings.general.max_nesting_depth);
        let registry = Arc::new(ConnectionRegistry::new(
            connector,
            settings.client.endpoint_policy.clone(),
            settings.general.operation_timeout(),
        ));
        let catalog = Arc::new(TypeCatalog::new(settings.general.browse_max_hops));
        let publishers = Arc::new(PublisherPool::new(publisher_factory));

        let accessor = NodeAccessor::new(Arc::clone(&registry), Arc::clone(&catalog), codec);
        let subscriptions = SubscriptionEngine::new(
            Arc::clone(&registry),
            Arc::clone(&publishers),
            catalog,
            codec,
            SubscriptionOptions::from(&settings.subscription),
        );

        Self {
            data_sets: ServerRegistry::new(&settings.servers),
            registry,
            publishers,
            accessor,
            subscriptions,
        }
    }

    #[inline]
    pub fn data_sets(&self) -> &ServerRegistry {
        &self.data_sets
    }

    /// URL of a registered data set.
    pub fn server_url(&self, data_set_id: usize) -> GatewayResult<&str> {
        self.data_sets
            .get(data_set_id)
            .map(|d| d.url.as_str())
            .ok_or_else(|| GatewayError::InvalidArgument(format!("unknown data set {data_set_id}")))
    }

    pub async fn read_node(&self, server_url: &str, node_id: &str) -> GatewayResult<NodeDescriptor> {
        self.accessor.read_node(server_url, node_id).await
    }

    pub async fn write_node(&self, server_url: &str, node_id: &str, value: &Value) -> GatewayResult<()> {
        self.accessor.write_node(server_url, node_id, value).await
    }

    pub async fn browse(&self, server_url: &str, node_id: &str) -> GatewayResult<Vec<NodeEdge>> {
        self.accessor.browse(server_url, node_id).await
    }

    pub async fn is_server_available(&self, server_url: &str) -> bool {
        self.registry.is_available(server_url).await
    }

    pub async fn create_monitored_items(
        &self,
        server_url: &str,
        request: &MonitorRequest,
    ) -> GatewayResult<Vec<bool>> {
        self.subscriptions
            .create_monitored_items(
                server_url,
                &request.broker_url,
                &request.topic,
                &request.monitorable_nodes,
            )
            .await
    }

    pub async fn delete_monitoring(&self, server_url: &str, request: &StopMonitorRequest) -> bool {
        self.subscriptions
            .delete_monitoring(server_url, &request.broker_url, &request.topic)
            .await
    }

    /// Tear down subscriptions, then publishers, then sessions.
    pub async fn shutdown(&self) {
        self.subscriptions.shutdown().await;
        self.publishers.shutdown().await;
        self.registry.shutdown().await;
        info!("Gateway stopped");
    }
}
