use crate::{
    connection::ConnectionRegistry,
    dictionary::TypeCatalog,
    publisher_pool::PublisherPool,
    registry::KeyedSlots,
    remote::{platform_id, status_text, Remote},
};
use arc_swap::ArcSwap;
use bytes::Bytes;
use chrono::SecondsFormat;
use serde_json::{json, Map, Value};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{debug, info, instrument, warn};
use ua_gateway_error::{GatewayError, GatewayResult};
use ua_gateway_models::{settings, MonitorableNode};
use ua_gateway_sdk::{
    AttributeId, BrokerUrl, DataChangeCallback, DataChangeFilter, DataValue, MonitoredItemRequest,
    NodeId, PlatformNodeId, Publisher, ReadValueId, SubscriptionParams, UaSession, UaValue,
    ValueCodec, ValueContext,
};

/// Identity of a subscription: one per server, broker and topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub server_url: String,
    pub broker_url: String,
    pub topic: String,
}

/// Parameters applied to every subscription and monitored item.
#[derive(Debug, Clone, Copy)]
pub struct SubscriptionOptions {
    pub params: SubscriptionParams,
    pub queue_size: u32,
    pub include_schema: bool,
}

impl From<&settings::Subscription> for SubscriptionOptions {
    fn from(s: &settings::Subscription) -> Self {
        Self {
            params: SubscriptionParams {
                publishing_interval: Duration::from_millis(s.publishing_interval_ms),
                lifetime_count: s.lifetime_count,
                max_keep_alive_count: s.max_keep_alive_count,
                max_notifications_per_publish: 0,
                priority: 0,
            },
            queue_size: s.queue_size,
            include_schema: s.include_schema,
        }
    }
}

/// Where a client handle's notifications go and how they are labelled.
#[derive(Debug)]
struct Target {
    node_id: String,
    context: ValueContext,
}

type Targets = Arc<ArcSwap<HashMap<u32, Arc<Target>>>>;

struct TrackedItem {
    monitored_item_id: u32,
    request: MonitoredItemRequest,
}

struct ActiveSubscription {
    session: Arc<dyn UaSession>,
    subscription_id: u32,
    publisher: Arc<dyn Publisher>,
    /// Read by the notification callback, replaced under the key lock.
    targets: Targets,
    items: HashMap<NodeId, TrackedItem>,
}

/// Live monitored items grouped into subscriptions keyed by
/// (server, broker, topic), forwarding changes to pooled publishers.
pub struct SubscriptionEngine {
    registry: Arc<ConnectionRegistry>,
    publishers: Arc<PublisherPool>,
    catalog: Arc<TypeCatalog>,
    codec: ValueCodec,
    options: SubscriptionOptions,
    subscriptions: KeyedSlots<SubscriptionKey, ActiveSubscription>,
    next_handle: AtomicU32,
}

impl SubscriptionEngine {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        publishers: Arc<PublisherPool>,
        catalog: Arc<TypeCatalog>,
        codec: ValueCodec,
        options: SubscriptionOptions,
    ) -> Self {
        Self {
            registry,
            publishers,
            catalog,
            codec,
            options,
            subscriptions: KeyedSlots::default(),
            next_handle: AtomicU32::new(1),
        }
    }

    /// Monitor `nodes`, one outcome per node in input order.
    ///
    /// Invalid specs and items the server rejects report `false` without
    /// affecting the others. A bad broker URL or an unreachable server fails
    /// the whole call.
    #[instrument(level = "debug", skip(self, nodes), fields(count = nodes.len()))]
    pub async fn create_monitored_items(
        &self,
        server_url: &str,
        broker_url: &str,
        topic: &str,
        nodes: &[MonitorableNode],
    ) -> GatewayResult<Vec<bool>> {
        let broker: BrokerUrl = broker_url.parse()?;
        let mut results = vec![false; nodes.len()];

        let mut valid = Vec::with_capacity(nodes.len());
        for (index, spec) in nodes.iter().enumerate() {
            match self.validate(spec) {
                Ok(request) => valid.push((index, request)),
                Err(e) => warn!(index, node_id = %spec.node_id, error = %e, "Monitored item rejected"),
            }
        }
        if valid.is_empty() {
            return Ok(results);
        }

        let session = self.registry.acquire(server_url).await?;
        let key = SubscriptionKey {
            server_url: server_url.to_string(),
            broker_url: broker.as_str().to_string(),
            topic: topic.to_string(),
        };
        let mut slot = self.subscriptions.lock(&key).await;
        let outcome = self
            .monitor_locked(&mut slot, &key, &broker, session, valid)
            .await;
        self.subscriptions.release(&key, slot);

        for (index, ok) in outcome? {
            results[index] = ok;
        }
        Ok(results)
    }

    /// Delete the subscription for the key and all of its items. `false`
    /// when no subscription is active.
    #[instrument(level = "debug", skip(self))]
    pub async fn delete_monitoring(&self, server_url: &str, broker_url: &str, topic: &str) -> bool {
        let key = SubscriptionKey {
            server_url: server_url.to_string(),
            broker_url: broker_url.trim().to_string(),
            topic: topic.to_string(),
        };
        let Some(mut slot) = self.subscriptions.lock_existing(&key).await else {
            return false;
        };
        if let Some(active) = slot.take() {
            self.teardown(&key, active).await;
        }
        self.subscriptions.release(&key, slot);
        true
    }

    pub async fn shutdown(&self) {
        for key in self.subscriptions.keys() {
            if let Some(mut slot) = self.subscriptions.lock_existing(&key).await {
                if let Some(active) = slot.take() {
                    self.teardown(&key, active).await;
                }
                self.subscriptions.release(&key, slot);
            }
        }
    }

    async fn monitor_locked(
        &self,
        slot: &mut Option<ActiveSubscription>,
        key: &SubscriptionKey,
        broker: &BrokerUrl,
        session: Arc<dyn UaSession>,
        valid: Vec<(usize, MonitoredItemRequest)>,
    ) -> GatewayResult<Vec<(usize, bool)>> {
        let mut active = match slot.take() {
            Some(active) if Arc::ptr_eq(&active.session, &session) => active,
            Some(stale) => self.reopen(key, session, stale).await?,
            None => self.open(key, broker, session).await?,
        };

        let mut outcomes = Vec::with_capacity(valid.len());
        let mut pending: Vec<(usize, MonitoredItemRequest)> = Vec::new();
        let mut first_seen: HashMap<NodeId, usize> = HashMap::new();
        let mut repeats = Vec::new();
        for (index, request) in valid {
            if active.items.contains_key(&request.node_id) {
                debug!(node_id = %request.node_id, "Node already monitored");
                outcomes.push((index, true));
            } else if let Some(&first) = first_seen.get(&request.node_id) {
                repeats.push((index, first));
            } else {
                first_seen.insert(request.node_id.clone(), pending.len());
                pending.push((index, request));
            }
        }

        let nodes: Vec<NodeId> = pending.iter().map(|(_, r)| r.node_id.clone()).collect();
        let contexts = self
            .contexts(&Remote::new(&key.server_url, active.session.as_ref()), &nodes)
            .await;
        let mut targets = HashMap::clone(&active.targets.load());
        for ((_, request), context) in pending.iter().zip(contexts) {
            let target = Target {
                node_id: platform_id(&request.node_id),
                context,
            };
            targets.insert(request.client_handle, Arc::new(target));
        }
        active.targets.store(Arc::new(targets));

        let (indexes, requests): (Vec<usize>, Vec<MonitoredItemRequest>) = pending.into_iter().unzip();
        let created = self.create_items(&mut active, requests).await;
        outcomes.extend(indexes.into_iter().zip(created.iter().copied()));
        outcomes.extend(
            repeats
                .into_iter()
                .map(|(index, first)| (index, created.get(first).copied().unwrap_or(false))),
        );

        if active.items.is_empty() {
            // nothing to keep alive
            self.teardown(key, active).await;
        } else {
            *slot = Some(active);
        }
        Ok(outcomes)
    }

    async fn open(
        &self,
        key: &SubscriptionKey,
        broker: &BrokerUrl,
        session: Arc<dyn UaSession>,
    ) -> GatewayResult<ActiveSubscription> {
        let publisher = self.publishers.get_or_create(broker).await?;
        let targets: Targets = Arc::new(ArcSwap::from_pointee(HashMap::new()));
        let callback = self.callback(&key.topic, &publisher, &targets);
        let subscription_id = session
            .create_subscription(&self.options.params, callback)
            .await
            .map_err(|e| subscription_error(key, e))?;
        info!(
            server_url = %key.server_url,
            broker = %key.broker_url,
            topic = %key.topic,
            subscription_id,
            "Subscription created"
        );
        Ok(ActiveSubscription {
            session,
            subscription_id,
            publisher,
            targets,
            items: HashMap::new(),
        })
    }

    /// The session behind a subscription was replaced; recreate the
    /// subscription and its items on the new one.
    async fn reopen(
        &self,
        key: &SubscriptionKey,
        session: Arc<dyn UaSession>,
        stale: ActiveSubscription,
    ) -> GatewayResult<ActiveSubscription> {
        let callback = self.callback(&key.topic, &stale.publisher, &stale.targets);
        let subscription_id = session
            .create_subscription(&self.options.params, callback)
            .await
            .map_err(|e| subscription_error(key, e))?;
        let mut active = ActiveSubscription {
            session,
            subscription_id,
            publisher: stale.publisher,
            targets: stale.targets,
            items: HashMap::new(),
        };
        let requests: Vec<MonitoredItemRequest> =
            stale.items.into_values().map(|t| t.request).collect();
        let total = requests.len();
        let restored = self
            .create_items(&mut active, requests)
            .await
            .into_iter()
            .filter(|ok| *ok)
            .count();
        warn!(
            server_url = %key.server_url,
            topic = %key.topic,
            subscription_id,
            restored,
            total,
            "Session was replaced, subscription recreated"
        );
        Ok(active)
    }

    /// Create items in one server call; one outcome per request.
    async fn create_items(
        &self,
        active: &mut ActiveSubscription,
        requests: Vec<MonitoredItemRequest>,
    ) -> Vec<bool> {
        if requests.is_empty() {
            return Vec::new();
        }
        let results = match active
            .session
            .create_monitored_items(active.subscription_id, requests.clone())
            .await
        {
            Ok(results) => results,
            Err(e) => {
                warn!(
                    subscription_id = active.subscription_id,
                    count = requests.len(),
                    error = %e,
                    "CreateMonitoredItems failed"
                );
                Vec::new()
            }
        };

        let mut rejected = Vec::new();
        let mut outcomes = Vec::with_capacity(requests.len());
        for (i, request) in requests.into_iter().enumerate() {
            match results.get(i) {
                Some(r) if r.status.is_good() => {
                    debug!(
                        node_id = %request.node_id,
                        monitored_item_id = r.monitored_item_id,
                        revised_sampling_interval = r.revised_sampling_interval,
                        "Monitored item created"
                    );
                    active.items.insert(
                        request.node_id.clone(),
                        TrackedItem {
                            monitored_item_id: r.monitored_item_id,
                            request,
                        },
                    );
                    outcomes.push(true);
                }
                other => {
                    if let Some(r) = other {
                        warn!(node_id = %request.node_id, status = %r.status, "Monitored item refused");
                    }
                    rejected.push(request.client_handle);
                    outcomes.push(false);
                }
            }
        }

        if !rejected.is_empty() {
            let mut targets = HashMap::clone(&active.targets.load());
            for handle in rejected {
                targets.remove(&handle);
            }
            active.targets.store(Arc::new(targets));
        }
        outcomes
    }

    /// Encoding context per node; unresolved metadata yields a plain context.
    async fn contexts(&self, remote: &Remote<'_>, nodes: &[NodeId]) -> Vec<ValueContext> {
        if nodes.is_empty() {
            return Vec::new();
        }
        let request: Vec<ReadValueId> = nodes
            .iter()
            .map(|n| ReadValueId::new(n.clone(), AttributeId::DataType))
            .collect();
        let data_types = match remote.read(&request).await {
            Ok(values) => values,
            Err(e) => {
                debug!(error = %e, "DataType read failed, notifications unlabelled");
                return vec![ValueContext::default(); nodes.len()];
            }
        };

        let mut contexts = Vec::with_capacity(nodes.len());
        for dv in data_types {
            let data_type = match &dv.value {
                Some(UaValue::NodeId(id)) if dv.status.is_good() => id.clone(),
                _ => {
                    contexts.push(ValueContext::default());
                    continue;
                }
            };
            let context = match self.catalog.data_type(remote, &data_type).await {
                Ok(resolved) => self.catalog.value_context(remote, &data_type, resolved).await,
                Err(e) => {
                    debug!(data_type = %data_type, error = %e, "DataType unresolved");
                    ValueContext::default()
                }
            };
            contexts.push(context);
        }
        contexts
    }

    fn callback(
        &self,
        topic: &str,
        publisher: &Arc<dyn Publisher>,
        targets: &Targets,
    ) -> DataChangeCallback {
        let topic = topic.to_string();
        let publisher = Arc::clone(publisher);
        let targets = Arc::clone(targets);
        let codec = self.codec;
        let include_schema = self.options.include_schema;
        Arc::new(move |handle, dv| {
            let guard = targets.load();
            let Some(target) = guard.get(&handle) else {
                debug!(handle, "Notification for unknown client handle");
                return;
            };
            let message = match notification_message(&codec, target, &dv, include_schema) {
                Ok(m) => m,
                Err(e) => {
                    warn!(node_id = %target.node_id, error = %e, "Notification not encodable");
                    return;
                }
            };
            let payload = match serde_json::to_vec(&message) {
                Ok(p) => Bytes::from(p),
                Err(e) => {
                    warn!(node_id = %target.node_id, error = %e, "Notification not serializable");
                    return;
                }
            };
            if let Err(e) = publisher.try_publish(&topic, payload) {
                warn!(
                    topic = %topic,
                    broker = %publisher.broker(),
                    node_id = %target.node_id,
                    error = %e,
                    "Notification dropped"
                );
            }
        })
    }

    async fn teardown(&self, key: &SubscriptionKey, active: ActiveSubscription) {
        let ids: Vec<u32> = active
            .items
            .values()
            .map(|t| t.monitored_item_id)
            .collect();
        if !ids.is_empty() {
            if let Err(e) = active
                .session
                .delete_monitored_items(active.subscription_id, &ids)
                .await
            {
                warn!(subscription_id = active.subscription_id, error = %e, "DeleteMonitoredItems failed");
            }
        }
        if let Err(e) = active.session.delete_subscription(active.subscription_id).await {
            warn!(subscription_id = active.subscription_id, error = %e, "DeleteSubscription failed");
        }
        info!(
            server_url = %key.server_url,
            broker = %key.broker_url,
            topic = %key.topic,
            subscription_id = active.subscription_id,
            items = ids.len(),
            "Subscription deleted"
        );
    }

    fn validate(&self, spec: &MonitorableNode) -> GatewayResult<MonitoredItemRequest> {
        let node_id = PlatformNodeId::parse(&spec.node_id)?.into_node_id();
        // negated comparisons also reject NaN
        if !(spec.sampling_interval > 0.0) {
            return Err(GatewayError::InvalidArgument(format!(
                "samplingInterval must be positive, got {}",
                spec.sampling_interval
            )));
        }
        if !(spec.dead_band_value > 0.0) {
            return Err(GatewayError::InvalidArgument(format!(
                "deadBandValue must be positive, got {}",
                spec.dead_band_value
            )));
        }
        Ok(MonitoredItemRequest {
            node_id,
            client_handle: self.next_handle.fetch_add(1, Ordering::Relaxed),
            sampling_interval: spec.sampling_interval,
            queue_size: self.options.queue_size,
            discard_oldest: true,
            filter: DataChangeFilter {
                deadband_type: spec.dead_band,
                deadband_value: spec.dead_band_value,
            },
        })
    }
}

fn subscription_error(key: &SubscriptionKey, e: GatewayError) -> GatewayError {
    match e {
        GatewayError::ServerUnavailable { .. } => e,
        other => GatewayError::Subscription(format!(
            "creating subscription on {} for topic {}: {other}",
            key.server_url, key.topic
        )),
    }
}

/// JSON published for one data change.
fn notification_message(
    codec: &ValueCodec,
    target: &Target,
    dv: &DataValue,
    include_schema: bool,
) -> GatewayResult<Value> {
    let encoded = match &dv.value {
        Some(v) if !dv.status.is_bad() => Some(codec.encode(v, &target.context)?),
        _ => None,
    };
    let mut msg = Map::new();
    msg.insert("node-id".into(), json!(target.node_id));
    match encoded {
        Some(e) => {
            msg.insert("value".into(), e.value);
            if include_schema {
                msg.insert("value-schema".into(), e.schema);
            }
        }
        None => {
            msg.insert("value".into(), Value::Null);
        }
    }
    msg.insert("status".into(), json!(status_text(dv.status)));
    let ts = |t: &Option<chrono::DateTime<chrono::Utc>>| {
        json!(t.as_ref().map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true)))
    };
    msg.insert("sourceTimestamp".into(), ts(&dv.source_timestamp));
    msg.insert("serverTimestamp".into(), ts(&dv.server_timestamp));
    Ok(Value::Object(msg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;
    use ua_gateway_sdk::{EnumDefinition, StatusCode};

    #[test]
    fn test_notification_message_shape() -> anyhow::Result<()> {
        let target = Target {
            node_id: "2-Mode".into(),
            context: ValueContext::enumeration(Arc::new(EnumDefinition::from_strings(["Off", "On"]))),
        };
        let dv = DataValue {
            value: Some(UaValue::Int32(1)),
            status: StatusCode::GOOD,
            source_timestamp: Some(chrono::Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
            server_timestamp: None,
        };
        let msg = notification_message(&ValueCodec::default(), &target, &dv, false)?;
        assert_eq!(
            msg,
            json!({
                "node-id": "2-Mode",
                "value": {"EnumValue": 1, "EnumLabel": "On"},
                "status": "Good",
                "sourceTimestamp": "2024-05-01T12:00:00.000Z",
                "serverTimestamp": null
            })
        );

        let with_schema = notification_message(&ValueCodec::default(), &target, &dv, true)?;
        assert!(with_schema.get("value-schema").is_some());
        Ok(())
    }

    #[test]
    fn test_bad_status_has_no_value() -> anyhow::Result<()> {
        let target = Target {
            node_id: "2-1".into(),
            context: ValueContext::default(),
        };
        let dv = DataValue::bad(StatusCode::BAD_NOT_READABLE);
        let msg = notification_message(&ValueCodec::default(), &target, &dv, true)?;
        assert_eq!(msg["value"], Value::Null);
        assert_eq!(msg["status"], "BadNotReadable");
        assert!(msg.get("value-schema").is_none());
        Ok(())
    }
}
