use ua_gateway_error::{GatewayError, GatewayResult};
use ua_gateway_sdk::{
    AttributeId, BrowseDirection, BrowseRequest, DataValue, NodeId, PlatformNodeId, ReadValueId,
    ReferenceDescription, StatusCode, UaSession, UaValue,
};

/// A session bound to the URL it was acquired for.
///
/// Transport failures surface as `ServerUnavailable` for that URL; node-level
/// outcomes are left to the caller.
#[derive(Clone, Copy)]
pub(crate) struct Remote<'a> {
    url: &'a str,
    session: &'a dyn UaSession,
}

impl<'a> Remote<'a> {
    pub(crate) fn new(url: &'a str, session: &'a dyn UaSession) -> Self {
        Self { url, session }
    }

    #[inline]
    pub(crate) fn url(&self) -> &'a str {
        self.url
    }

    pub(crate) async fn read(&self, nodes: &[ReadValueId]) -> GatewayResult<Vec<DataValue>> {
        let values = self
            .session
            .read(nodes)
            .await
            .map_err(|e| self.service_error(e))?;
        if values.len() != nodes.len() {
            return Err(GatewayError::server_unavailable(
                self.url,
                format!("read returned {} values for {} nodes", values.len(), nodes.len()),
            ));
        }
        Ok(values)
    }

    /// Read several attributes of one node, in the requested order.
    pub(crate) async fn attributes(
        &self,
        node: &NodeId,
        attributes: &[AttributeId],
    ) -> GatewayResult<Vec<DataValue>> {
        let request: Vec<ReadValueId> = attributes
            .iter()
            .map(|a| ReadValueId::new(node.clone(), *a))
            .collect();
        self.read(&request).await
    }

    /// Value attribute of a node that must be readable.
    pub(crate) async fn value(&self, node: &NodeId) -> GatewayResult<UaValue> {
        let dv = self
            .attributes(node, &[AttributeId::Value])
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();
        if dv.status.is_bad() {
            return Err(self.status_error(node, dv.status));
        }
        Ok(dv.value.unwrap_or(UaValue::Empty))
    }

    pub(crate) async fn browse(
        &self,
        node: &NodeId,
        direction: BrowseDirection,
        reference_type: u32,
    ) -> GatewayResult<Vec<ReferenceDescription>> {
        self.session
            .browse(&BrowseRequest::new(node.clone(), direction, reference_type))
            .await
            .map_err(|e| self.service_error(e))
    }

    pub(crate) async fn write(&self, node: &NodeId, value: UaValue) -> GatewayResult<StatusCode> {
        self.session
            .write(node, value)
            .await
            .map_err(|e| self.service_error(e))
    }

    /// Error for a bad status returned for `node`.
    pub(crate) fn status_error(&self, node: &NodeId, status: StatusCode) -> GatewayError {
        match status.sub_code() {
            StatusCode::BAD_NODE_ID_UNKNOWN => GatewayError::NodeNotFound(platform_id(node)),
            StatusCode::BAD_NODE_ID_INVALID => GatewayError::InvalidNodeId(platform_id(node)),
            _ => GatewayError::server_unavailable(
                self.url,
                format!("{} returned {status}", platform_id(node)),
            ),
        }
    }

    fn service_error(&self, e: GatewayError) -> GatewayError {
        match e {
            GatewayError::NodeNotFound(_)
            | GatewayError::InvalidNodeId(_)
            | GatewayError::ServerUnavailable { .. } => e,
            other => GatewayError::server_unavailable(self.url, other),
        }
    }
}

/// `<ns>-<identifier>` text of a server node id.
#[inline]
pub(crate) fn platform_id(node: &NodeId) -> String {
    PlatformNodeId::from(node.clone()).to_string()
}

/// Status text used in envelopes and notifications.
pub(crate) fn status_text(status: StatusCode) -> String {
    status
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| status.to_hex())
}
