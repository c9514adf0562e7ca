use crate::convert::{
    from_data_value, from_ua_localized_text, from_ua_node_id, from_ua_qualified_name,
    from_ua_status, to_ua_node_id, to_variant,
};
use async_trait::async_trait;
use futures::{pin_mut, StreamExt};
use opcua::{
    client::{
        MonitoredItem, Session, SessionActivity, SessionEventLoop, SessionPollResult,
        SubscriptionCallbacks,
    },
    types as ua,
};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ua_gateway_error::{GatewayError, GatewayResult};
use ua_gateway_sdk::{
    BrowseDirection, BrowseRequest, DataChangeCallback, DataValue, DeadbandType,
    MonitoredItemRequest, MonitoredItemResult, NodeClass, NodeId, PlatformNodeId, ReadValueId,
    ReferenceDescription, StatusCode, SubscriptionParams, UaSession, UaValue,
};

/// Every field of a reference description.
const BROWSE_RESULT_MASK_ALL: u32 = 0x3F;
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// An activated `async-opcua` session and the task driving its event loop.
pub struct OpcUaSession {
    server_url: String,
    session: Arc<Session>,
    connected: watch::Receiver<bool>,
    cancel: CancellationToken,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl OpcUaSession {
    /// Drive `ev` until the session is activated. Fails when the event loop
    /// ends first; the caller bounds the wait.
    pub(crate) async fn start(
        server_url: String,
        session: Arc<Session>,
        ev: SessionEventLoop,
    ) -> GatewayResult<Self> {
        let cancel = CancellationToken::new();
        let (connected_tx, mut connected) = watch::channel(false);
        // dropping the start future before activation tears the loop down
        let guard = cancel.clone().drop_guard();

        let task = tokio::spawn(run_event_loop(
            server_url.clone(),
            Arc::clone(&session),
            ev,
            cancel.clone(),
            connected_tx,
        ));

        if connected.wait_for(|c| *c).await.is_err() {
            return Err(GatewayError::server_unavailable(
                &server_url,
                "session event loop ended before activation",
            ));
        }
        let _ = guard.disarm();

        info!(server_url = %server_url, "OPC UA session activated");
        Ok(Self {
            server_url,
            session,
            connected,
            cancel,
            event_loop: Mutex::new(Some(task)),
        })
    }

    fn ensure_connected(&self) -> GatewayResult<()> {
        if self.cancel.is_cancelled() || !*self.connected.borrow() {
            return Err(GatewayError::server_unavailable(
                &self.server_url,
                "session is not connected",
            ));
        }
        Ok(())
    }

    fn service_error(&self, service: &str, code: ua::StatusCode) -> GatewayError {
        GatewayError::server_unavailable(
            &self.server_url,
            format!("{service} failed: {}", from_ua_status(code)),
        )
    }

    fn reference(&self, r: &ua::ReferenceDescription) -> ReferenceDescription {
        let type_definition = from_ua_node_id(&r.type_definition.node_id);
        ReferenceDescription {
            reference_type_id: from_ua_node_id(&r.reference_type_id),
            is_forward: r.is_forward,
            node_id: from_ua_node_id(&r.node_id.node_id),
            browse_name: from_ua_qualified_name(&r.browse_name),
            display_name: from_ua_localized_text(&r.display_name),
            node_class: NodeClass::from_i32(r.node_class as i32),
            type_definition: (!type_definition.is_null()).then_some(type_definition),
        }
    }

    /// Collect one browse result page, failing on a bad status.
    fn page(
        &self,
        node: &NodeId,
        result: Option<ua::BrowseResult>,
        out: &mut Vec<ReferenceDescription>,
    ) -> GatewayResult<Option<ua::ByteString>> {
        let result = result.ok_or_else(|| {
            GatewayError::Internal(format!("browse {}: empty response", platform_id(node)))
        })?;
        let status = from_ua_status(result.status_code);
        if status.is_bad() {
            return Err(browse_status_error(node, status));
        }
        if let Some(references) = result.references.as_ref() {
            out.extend(references.iter().map(|r| self.reference(r)));
        }
        let continuation: &[u8] = result.continuation_point.as_ref();
        Ok((!continuation.is_empty()).then_some(result.continuation_point))
    }
}

async fn run_event_loop(
    server_url: String,
    session: Arc<Session>,
    ev: SessionEventLoop,
    cancel: CancellationToken,
    connected: watch::Sender<bool>,
) {
    let stream = ev.enter();
    pin_mut!(stream);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                session.disable_reconnects();
                let _ = tokio::time::timeout(DISCONNECT_TIMEOUT, session.disconnect()).await;
                let _ = connected.send(false);
                break;
            }
            item = stream.next() => match item {
                Some(Ok(SessionPollResult::Reconnected(_) | SessionPollResult::Transport(_))) => {
                    connected.send_if_modified(|c| !std::mem::replace(c, true));
                }
                Some(Ok(SessionPollResult::SessionActivity(SessionActivity::KeepAliveFailed(code)))) => {
                    warn!(server_url = %server_url, status = %code, "OPC UA keep-alive failed");
                }
                Some(Ok(SessionPollResult::ConnectionLost(code))) => {
                    warn!(server_url = %server_url, status = %code, "OPC UA connection lost");
                    let _ = connected.send(false);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(code)) => {
                    warn!(server_url = %server_url, status = %code, "OPC UA event loop error");
                    let _ = connected.send(false);
                    break;
                }
                None => {
                    let _ = connected.send(false);
                    break;
                }
            },
        }
    }
    debug!(server_url = %server_url, "OPC UA event loop stopped");
}

fn browse_direction(direction: BrowseDirection) -> ua::BrowseDirection {
    match direction {
        BrowseDirection::Forward => ua::BrowseDirection::Forward,
        BrowseDirection::Inverse => ua::BrowseDirection::Inverse,
        BrowseDirection::Both => ua::BrowseDirection::Both,
    }
}

fn deadband_type(t: DeadbandType) -> u32 {
    match t {
        DeadbandType::None => 0,
        DeadbandType::Absolute => 1,
        DeadbandType::Percent => 2,
    }
}

fn create_request(item: MonitoredItemRequest) -> ua::MonitoredItemCreateRequest {
    let filter = ua::DataChangeFilter {
        trigger: ua::DataChangeTrigger::StatusValue,
        deadband_type: deadband_type(item.filter.deadband_type),
        deadband_value: item.filter.deadband_value,
    };
    ua::MonitoredItemCreateRequest {
        item_to_monitor: ua::ReadValueId::new_value(to_ua_node_id(&item.node_id)),
        monitoring_mode: ua::MonitoringMode::Reporting,
        requested_parameters: ua::MonitoringParameters {
            client_handle: item.client_handle,
            sampling_interval: item.sampling_interval,
            filter: ua::ExtensionObject::from_message(filter),
            queue_size: item.queue_size,
            discard_oldest: item.discard_oldest,
        },
    }
}

#[async_trait]
impl UaSession for OpcUaSession {
    async fn read(&self, nodes: &[ReadValueId]) -> GatewayResult<Vec<DataValue>> {
        self.ensure_connected()?;
        let requests: Vec<ua::ReadValueId> = nodes
            .iter()
            .map(|n| ua::ReadValueId {
                node_id: to_ua_node_id(&n.node_id),
                attribute_id: n.attribute_id.id(),
                ..Default::default()
            })
            .collect();
        let values = self
            .session
            .read(&requests, ua::TimestampsToReturn::Both, 0.0)
            .await
            .map_err(|sc| self.service_error("Read", sc))?;
        if values.len() != nodes.len() {
            return Err(GatewayError::Internal(format!(
                "Read returned {} results for {} nodes",
                values.len(),
                nodes.len()
            )));
        }
        Ok(values.iter().map(from_data_value).collect())
    }

    async fn write(&self, node_id: &NodeId, value: UaValue) -> GatewayResult<StatusCode> {
        self.ensure_connected()?;
        let write = ua::WriteValue::value_attr(to_ua_node_id(node_id), to_variant(&value)?);
        let results = self
            .session
            .write(&[write])
            .await
            .map_err(|sc| self.service_error("Write", sc))?;
        results
            .first()
            .copied()
            .map(from_ua_status)
            .ok_or_else(|| {
                GatewayError::Internal(format!("Write {}: empty response", platform_id(node_id)))
            })
    }

    async fn browse(&self, request: &BrowseRequest) -> GatewayResult<Vec<ReferenceDescription>> {
        self.ensure_connected()?;
        let description = ua::BrowseDescription {
            node_id: to_ua_node_id(&request.node_id),
            browse_direction: browse_direction(request.direction),
            reference_type_id: to_ua_node_id(&request.reference_type_id),
            include_subtypes: request.include_subtypes,
            node_class_mask: 0,
            result_mask: BROWSE_RESULT_MASK_ALL,
        };
        let mut references = Vec::new();
        let first = self
            .session
            .browse(&[description], 0, None)
            .await
            .map_err(|sc| self.service_error("Browse", sc))?;
        let mut next = self.page(&request.node_id, first.into_iter().next(), &mut references)?;

        while let Some(point) = next {
            let results = self
                .session
                .browse_next(false, &[point])
                .await
                .map_err(|sc| self.service_error("BrowseNext", sc))?;
            next = self.page(&request.node_id, results.into_iter().next(), &mut references)?;
        }
        Ok(references)
    }

    async fn create_subscription(
        &self,
        params: &SubscriptionParams,
        on_change: DataChangeCallback,
    ) -> GatewayResult<u32> {
        self.ensure_connected()?;
        let callbacks = SubscriptionCallbacks::new(
            |_status| {},
            move |dv: ua::DataValue, item: &MonitoredItem| {
                on_change(item.client_handle(), from_data_value(&dv));
            },
            |_event, _item| {},
        );
        self.session
            .create_subscription(
                params.publishing_interval,
                params.lifetime_count,
                params.max_keep_alive_count,
                params.max_notifications_per_publish,
                params.priority,
                true,
                callbacks,
            )
            .await
            .map_err(|sc| self.service_error("CreateSubscription", sc))
    }

    async fn create_monitored_items(
        &self,
        subscription_id: u32,
        items: Vec<MonitoredItemRequest>,
    ) -> GatewayResult<Vec<MonitoredItemResult>> {
        self.ensure_connected()?;
        let expected = items.len();
        let requests: Vec<_> = items.into_iter().map(create_request).collect();
        let results = self
            .session
            .create_monitored_items(subscription_id, ua::TimestampsToReturn::Both, requests)
            .await
            .map_err(|sc| self.service_error("CreateMonitoredItems", sc))?;
        if results.len() != expected {
            return Err(GatewayError::Internal(format!(
                "CreateMonitoredItems returned {} results for {expected} items",
                results.len()
            )));
        }
        Ok(results
            .into_iter()
            .map(|r| MonitoredItemResult {
                status: from_ua_status(r.result.status_code),
                monitored_item_id: r.result.monitored_item_id,
                revised_sampling_interval: r.result.revised_sampling_interval,
            })
            .collect())
    }

    async fn delete_monitored_items(
        &self,
        subscription_id: u32,
        monitored_item_ids: &[u32],
    ) -> GatewayResult<()> {
        self.ensure_connected()?;
        let results = self
            .session
            .delete_monitored_items(subscription_id, monitored_item_ids)
            .await
            .map_err(|sc| self.service_error("DeleteMonitoredItems", sc))?;
        for (id, code) in monitored_item_ids.iter().zip(results) {
            if !code.is_good() {
                debug!(subscription_id, monitored_item_id = id, status = %code, "Monitored item not deleted");
            }
        }
        Ok(())
    }

    async fn delete_subscription(&self, subscription_id: u32) -> GatewayResult<()> {
        self.ensure_connected()?;
        let code = self
            .session
            .delete_subscription(subscription_id)
            .await
            .map_err(|sc| self.service_error("DeleteSubscriptions", sc))?;
        if !code.is_good() {
            debug!(subscription_id, status = %code, "Subscription not deleted");
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.cancel.cancel();
        let task = match self.event_loop.lock() {
            Ok(mut task) => task.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(server_url = %self.server_url, error = %e, "OPC UA event loop ended abnormally");
            }
        }
        info!(server_url = %self.server_url, "OPC UA session closed");
    }
}

impl Drop for OpcUaSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Node ids in errors use the `<ns>-<identifier>` form callers sent.
fn platform_id(node: &NodeId) -> String {
    PlatformNodeId::from(node.clone()).to_string()
}

fn browse_status_error(node: &NodeId, status: StatusCode) -> GatewayError {
    match status.sub_code() {
        StatusCode::BAD_NODE_ID_UNKNOWN => GatewayError::NodeNotFound(platform_id(node)),
        StatusCode::BAD_NODE_ID_INVALID => GatewayError::InvalidNodeId(platform_id(node)),
        _ => GatewayError::Internal(format!("browse {}: {status}", platform_id(node))),
    }
}
