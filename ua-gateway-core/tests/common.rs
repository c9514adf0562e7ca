#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicUsize, Ordering},
        Arc, Mutex, Once,
    },
    time::Duration,
};
use tracing::Level;
use ua_gateway_core::Gateway;
use ua_gateway_error::{GatewayError, GatewayResult};
use ua_gateway_models::{
    settings::{Inner, ServerEntry},
    Settings,
};
use ua_gateway_sdk::{
    ids, AttributeId, BrokerUrl, BrowseDirection, BrowseRequest, DataChangeCallback, DataValue,
    EndpointDescription, ExtensionBody, ExtensionObject, LocalizedText, MessageSecurityMode, MonitoredItemRequest,
    MonitoredItemResult, NodeClass, NodeId, Publisher, PublisherFactory, QualifiedName, ReadValueId,
    ReferenceDescription, StatusCode, SubscriptionParams, UaConnector, UaSession, UaValue,
    ACCESS_LEVEL_CURRENT_WRITE,
};

pub const SERVER_URL: &str = "opc.tcp://mock:4840";
pub const MQTT_BROKER: &str = "mqtt:broker.local:1883";

static INIT_TRACING: Once = Once::new();

pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_target(false)
            .without_time()
            .try_init();
    });
}

const HIERARCHICAL: [u32; 6] = [
    ids::HAS_CHILD,
    ids::ORGANIZES,
    ids::AGGREGATES,
    ids::HAS_PROPERTY,
    ids::HAS_COMPONENT,
    ids::HAS_SUBTYPE,
];

struct MockSubscription {
    callback: DataChangeCallback,
    items: HashMap<u32, MonitoredItemRequest>,
}

/// In-memory address space shared by every session of one mock server.
#[derive(Default)]
pub struct MockServer {
    attributes: Mutex<HashMap<(NodeId, AttributeId), DataValue>>,
    references: Mutex<Vec<(NodeId, u32, NodeId)>>,
    writes: Mutex<Vec<(NodeId, UaValue)>>,
    subscriptions: Mutex<HashMap<u32, MockSubscription>>,
    deleted_subscriptions: AtomicUsize,
    next_id: AtomicU32,
    connects: AtomicUsize,
    /// Sessions with an id at or below this fail every call.
    broken_below: AtomicUsize,
    fail_connect: AtomicBool,
    server_state: AtomicI64,
    write_status: Mutex<Option<StatusCode>>,
    short_reads: AtomicBool,
}

impl MockServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn set(&self, node: &NodeId, attribute: AttributeId, value: UaValue) {
        self.attributes
            .lock()
            .unwrap()
            .insert((node.clone(), attribute), DataValue::good(value));
    }

    fn base(&self, node: &NodeId, name: &str, class: NodeClass) {
        self.set(node, AttributeId::NodeClass, UaValue::Int32(class.as_i32()));
        self.set(
            node,
            AttributeId::BrowseName,
            UaValue::QualifiedName(QualifiedName::new(node.namespace, name)),
        );
        self.set(
            node,
            AttributeId::DisplayName,
            UaValue::LocalizedText(LocalizedText::text(name)),
        );
    }

    /// Readable and writable scalar variable of a namespace 0 data type.
    pub fn variable(&self, node: &NodeId, name: &str, data_type: u32, value: UaValue) {
        self.variable_of(node, name, NodeId::numeric(0, data_type), value);
    }

    pub fn variable_of(&self, node: &NodeId, name: &str, data_type: NodeId, value: UaValue) {
        self.base(node, name, NodeClass::Variable);
        self.set(node, AttributeId::Value, value);
        self.set(node, AttributeId::DataType, UaValue::NodeId(data_type));
        self.set(node, AttributeId::ValueRank, UaValue::Int32(-1));
        self.set(
            node,
            AttributeId::ArrayDimensions,
            UaValue::array(ua_gateway_sdk::BuiltInType::UInt32, Vec::new()),
        );
        let level = UaValue::Byte(0x01 | ACCESS_LEVEL_CURRENT_WRITE);
        self.set(node, AttributeId::AccessLevel, level.clone());
        self.set(node, AttributeId::UserAccessLevel, level);
        self.set(node, AttributeId::MinimumSamplingInterval, UaValue::Double(100.0));
    }

    pub fn read_only(&self, node: &NodeId) {
        self.set(node, AttributeId::AccessLevel, UaValue::Byte(0x01));
        self.set(node, AttributeId::UserAccessLevel, UaValue::Byte(0x01));
    }

    pub fn object(&self, node: &NodeId, name: &str, type_definition: u32) {
        self.object_of(node, name, NodeId::numeric(0, type_definition));
    }

    pub fn object_of(&self, node: &NodeId, name: &str, type_definition: NodeId) {
        self.base(node, name, NodeClass::Object);
        self.reference(node, ids::HAS_TYPE_DEFINITION, &type_definition);
    }

    pub fn method(&self, node: &NodeId, name: &str) {
        self.base(node, name, NodeClass::Method);
    }

    /// Object type deriving from `supertype`.
    pub fn object_type(&self, node: &NodeId, name: &str, supertype: u32) {
        self.base(node, name, NodeClass::ObjectType);
        self.reference(&NodeId::numeric(0, supertype), ids::HAS_SUBTYPE, node);
    }

    pub fn reference(&self, source: &NodeId, reference_type: u32, target: &NodeId) {
        self.references
            .lock()
            .unwrap()
            .push((source.clone(), reference_type, target.clone()));
    }

    pub fn writes(&self) -> Vec<(NodeId, UaValue)> {
        self.writes.lock().unwrap().clone()
    }

    /// Status every subsequent write returns instead of Good.
    pub fn reject_writes(&self, status: StatusCode) {
        *self.write_status.lock().unwrap() = Some(status);
    }

    /// Reads answer with one value fewer than requested.
    pub fn short_reads(&self, short: bool) {
        self.short_reads.store(short, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Every session opened so far starts failing.
    pub fn break_sessions(&self) {
        self.broken_below.store(self.connects(), Ordering::SeqCst);
    }

    pub fn fail_connects(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_server_state(&self, state: i64) {
        self.server_state.store(state, Ordering::SeqCst);
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.lock().unwrap().len()
    }

    pub fn deleted_subscriptions(&self) -> usize {
        self.deleted_subscriptions.load(Ordering::SeqCst)
    }

    pub fn monitored_items(&self) -> Vec<MonitoredItemRequest> {
        self.subscriptions
            .lock()
            .unwrap()
            .values()
            .flat_map(|s| s.items.values().cloned())
            .collect()
    }

    /// Push a data change for `node` to every item monitoring it.
    pub fn emit(&self, node: &NodeId, dv: DataValue) -> usize {
        let targets: Vec<(DataChangeCallback, u32)> = self
            .subscriptions
            .lock()
            .unwrap()
            .values()
            .flat_map(|s| {
                s.items
                    .values()
                    .filter(|i| &i.node_id == node)
                    .map(|i| (Arc::clone(&s.callback), i.client_handle))
                    .collect::<Vec<_>>()
            })
            .collect();
        for (callback, handle) in &targets {
            callback(*handle, dv.clone());
        }
        targets.len()
    }

    fn exists(&self, node: &NodeId) -> bool {
        self.attributes
            .lock()
            .unwrap()
            .contains_key(&(node.clone(), AttributeId::NodeClass))
    }

    fn read_one(&self, id: &ReadValueId) -> DataValue {
        if id.node_id == NodeId::numeric(0, ids::SERVER_STATUS_STATE) {
            return DataValue::good(UaValue::Int32(
                self.server_state.load(Ordering::SeqCst) as i32
            ));
        }
        if !self.exists(&id.node_id) {
            return DataValue::bad(StatusCode::BAD_NODE_ID_UNKNOWN);
        }
        self.attributes
            .lock()
            .unwrap()
            .get(&(id.node_id.clone(), id.attribute_id))
            .cloned()
            .unwrap_or_else(|| DataValue::bad(StatusCode::BAD_ATTRIBUTE_ID_INVALID))
    }

    fn attribute(&self, node: &NodeId, attribute: AttributeId) -> Option<UaValue> {
        self.attributes
            .lock()
            .unwrap()
            .get(&(node.clone(), attribute))
            .and_then(|dv| dv.value.clone())
    }

    fn describe(&self, reference_type: u32, node: &NodeId, is_forward: bool) -> ReferenceDescription {
        let browse_name = match self.attribute(node, AttributeId::BrowseName) {
            Some(UaValue::QualifiedName(q)) => q,
            _ => QualifiedName::new(0, ""),
        };
        let display_name = match self.attribute(node, AttributeId::DisplayName) {
            Some(UaValue::LocalizedText(t)) => t,
            _ => LocalizedText::text(""),
        };
        let node_class = self
            .attribute(node, AttributeId::NodeClass)
            .and_then(|v| v.as_i64())
            .map(|c| NodeClass::from_i32(c as i32))
            .unwrap_or(NodeClass::Unspecified);
        let type_definition = self
            .references
            .lock()
            .unwrap()
            .iter()
            .find(|(s, t, _)| s == node && *t == ids::HAS_TYPE_DEFINITION)
            .map(|(_, _, target)| target.clone());
        ReferenceDescription {
            reference_type_id: NodeId::numeric(0, reference_type),
            is_forward,
            node_id: node.clone(),
            browse_name,
            display_name,
            node_class,
            type_definition,
        }
    }

    fn browse_refs(&self, request: &BrowseRequest) -> Vec<ReferenceDescription> {
        let wanted = request.reference_type_id.as_ns0().unwrap_or_default();
        let matches = |t: u32| {
            t == wanted || (wanted == ids::HIERARCHICAL_REFERENCES && HIERARCHICAL.contains(&t))
        };
        let refs = self.references.lock().unwrap().clone();
        let mut out = Vec::new();
        for (source, reference_type, target) in refs {
            if !matches(reference_type) {
                continue;
            }
            let forward = matches!(request.direction, BrowseDirection::Forward | BrowseDirection::Both);
            let inverse = matches!(request.direction, BrowseDirection::Inverse | BrowseDirection::Both);
            if forward && source == request.node_id {
                out.push(self.describe(reference_type, &target, true));
            }
            if inverse && target == request.node_id {
                out.push(self.describe(reference_type, &source, false));
            }
        }
        out
    }
}

pub struct MockSession {
    id: usize,
    server: Arc<MockServer>,
}

impl MockSession {
    fn check(&self) -> GatewayResult<()> {
        if self.id <= self.server.broken_below.load(Ordering::SeqCst) {
            return Err(GatewayError::server_unavailable(SERVER_URL, "connection reset"));
        }
        Ok(())
    }
}

#[async_trait]
impl UaSession for MockSession {
    async fn read(&self, nodes: &[ReadValueId]) -> GatewayResult<Vec<DataValue>> {
        self.check()?;
        let mut values: Vec<DataValue> = nodes.iter().map(|n| self.server.read_one(n)).collect();
        if self.server.short_reads.load(Ordering::SeqCst) {
            values.pop();
        }
        Ok(values)
    }

    async fn write(&self, node_id: &NodeId, value: UaValue) -> GatewayResult<StatusCode> {
        self.check()?;
        if let Some(status) = *self.server.write_status.lock().unwrap() {
            return Ok(status);
        }
        self.server
            .writes
            .lock()
            .unwrap()
            .push((node_id.clone(), value.clone()));
        self.server.set(node_id, AttributeId::Value, value);
        Ok(StatusCode::GOOD)
    }

    async fn browse(&self, request: &BrowseRequest) -> GatewayResult<Vec<ReferenceDescription>> {
        self.check()?;
        let known = self.server.exists(&request.node_id) || request.node_id.namespace == 0;
        if !known {
            return Err(GatewayError::NodeNotFound(request.node_id.to_string()));
        }
        Ok(self.server.browse_refs(request))
    }

    async fn create_subscription(
        &self,
        _params: &SubscriptionParams,
        on_change: DataChangeCallback,
    ) -> GatewayResult<u32> {
        self.check()?;
        let id = self.server.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.server.subscriptions.lock().unwrap().insert(
            id,
            MockSubscription {
                callback: on_change,
                items: HashMap::new(),
            },
        );
        Ok(id)
    }

    async fn create_monitored_items(
        &self,
        subscription_id: u32,
        items: Vec<MonitoredItemRequest>,
    ) -> GatewayResult<Vec<MonitoredItemResult>> {
        self.check()?;
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            if !self.server.exists(&item.node_id) {
                results.push(MonitoredItemResult {
                    status: StatusCode::BAD_NODE_ID_UNKNOWN,
                    monitored_item_id: 0,
                    revised_sampling_interval: 0.0,
                });
                continue;
            }
            let id = self.server.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            results.push(MonitoredItemResult {
                status: StatusCode::GOOD,
                monitored_item_id: id,
                revised_sampling_interval: item.sampling_interval,
            });
            let mut subscriptions = self.server.subscriptions.lock().unwrap();
            let subscription = subscriptions
                .get_mut(&subscription_id)
                .ok_or_else(|| GatewayError::Subscription("unknown subscription".into()))?;
            subscription.items.insert(id, item);
        }
        Ok(results)
    }

    async fn delete_monitored_items(
        &self,
        subscription_id: u32,
        monitored_item_ids: &[u32],
    ) -> GatewayResult<()> {
        self.check()?;
        if let Some(s) = self.server.subscriptions.lock().unwrap().get_mut(&subscription_id) {
            for id in monitored_item_ids {
                s.items.remove(id);
            }
        }
        Ok(())
    }

    async fn delete_subscription(&self, subscription_id: u32) -> GatewayResult<()> {
        self.check()?;
        if self
            .server
            .subscriptions
            .lock()
            .unwrap()
            .remove(&subscription_id)
            .is_some()
        {
            self.server.deleted_subscriptions.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn disconnect(&self) {}
}

pub struct MockConnector {
    pub server: Arc<MockServer>,
    /// Delay before a session is handed out, widening race windows.
    pub connect_delay: Duration,
}

#[async_trait]
impl UaConnector for MockConnector {
    async fn discover_endpoints(&self, server_url: &str) -> GatewayResult<Vec<EndpointDescription>> {
        Ok(vec![EndpointDescription {
            endpoint_url: server_url.to_string(),
            security_policy_uri: "http://opcfoundation.org/UA/SecurityPolicy#None".into(),
            security_mode: MessageSecurityMode::None,
            security_level: 0,
        }])
    }

    async fn connect(
        &self,
        server_url: &str,
        _endpoint: &EndpointDescription,
    ) -> GatewayResult<Arc<dyn UaSession>> {
        tokio::time::sleep(self.connect_delay).await;
        if self.server.fail_connect.load(Ordering::SeqCst) {
            return Err(GatewayError::server_unavailable(server_url, "connection refused"));
        }
        let id = self.server.connects.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Arc::new(MockSession {
            id,
            server: Arc::clone(&self.server),
        }))
    }
}

/// Records every payload it is handed.
#[derive(Debug)]
pub struct MockPublisher {
    broker: BrokerUrl,
    pub messages: Mutex<Vec<(String, Bytes)>>,
    pub closed: AtomicBool,
}

impl MockPublisher {
    pub fn json_messages(&self) -> Vec<(String, serde_json::Value)> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|(topic, payload)| {
                (
                    topic.clone(),
                    serde_json::from_slice(payload).unwrap_or_default(),
                )
            })
            .collect()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    fn broker(&self) -> &BrokerUrl {
        &self.broker
    }

    fn try_publish(&self, topic: &str, payload: Bytes) -> GatewayResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(GatewayError::Publish("publisher closed".into()));
        }
        self.messages
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockPublisherFactory {
    pub created: Mutex<Vec<Arc<MockPublisher>>>,
}

impl MockPublisherFactory {
    pub fn created(&self) -> Vec<Arc<MockPublisher>> {
        self.created.lock().unwrap().clone()
    }
}

impl PublisherFactory for MockPublisherFactory {
    fn create(&self, broker: &BrokerUrl) -> GatewayResult<Arc<dyn Publisher>> {
        let publisher = Arc::new(MockPublisher {
            broker: broker.clone(),
            messages: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.created.lock().unwrap().push(Arc::clone(&publisher));
        Ok(publisher)
    }
}

pub struct Harness {
    pub gateway: Gateway,
    pub server: Arc<MockServer>,
    pub publishers: Arc<MockPublisherFactory>,
}

pub fn settings() -> Settings {
    let mut inner = Inner::default();
    inner.general.operation_timeout_ms = 2000;
    inner.servers = vec![ServerEntry {
        name: "mock".into(),
        url: SERVER_URL.into(),
    }];
    Settings::from_inner(inner)
}

pub fn harness(server: Arc<MockServer>) -> Harness {
    harness_with(server, settings(), Duration::ZERO)
}

pub fn harness_with(server: Arc<MockServer>, settings: Settings, connect_delay: Duration) -> Harness {
    init_tracing();
    let connector = Arc::new(MockConnector {
        server: Arc::clone(&server),
        connect_delay,
    });
    let publishers = Arc::new(MockPublisherFactory::default());
    let gateway = Gateway::new(&settings, connector, Arc::clone(&publishers) as Arc<dyn PublisherFactory>);
    Harness {
        gateway,
        server,
        publishers,
    }
}

/// Address space used by most tests:
///
/// ```text
/// i=85 Objects
/// └── 2-Line1            (FolderType subtype)
///     ├── 2-Speed        Double 12.5
///     ├── 2-Count        Int32 7
///     ├── 2-Mode         Enumeration
///     ├── 2-Pump         Object (BaseObjectType)
///     └── 2-Reset        Method
/// ```
pub fn plant() -> Arc<MockServer> {
    let server = MockServer::new();
    let objects = NodeId::numeric(0, 85);
    server.object(&objects, "Objects", ids::FOLDER_TYPE);

    let line_type = NodeId::numeric(2, 1000);
    server.object_type(&line_type, "LineFolderType", ids::FOLDER_TYPE);
    let line = NodeId::string(2, "Line1");
    server.object_of(&line, "Line1", line_type);
    server.reference(&objects, ids::ORGANIZES, &line);

    let speed = NodeId::string(2, "Speed");
    server.variable(&speed, "Speed", 11, UaValue::Double(12.5));
    server.reference(&line, ids::HAS_COMPONENT, &speed);

    let count = NodeId::string(2, "Count");
    server.variable(&count, "Count", 6, UaValue::Int32(7));
    server.reference(&line, ids::HAS_COMPONENT, &count);

    let mode_type = NodeId::numeric(2, 3000);
    server.base(&mode_type, "ModeEnum", NodeClass::DataType);
    server.reference(&NodeId::numeric(0, ids::ENUMERATION), ids::HAS_SUBTYPE, &mode_type);
    let mode_strings = NodeId::numeric(2, 3001);
    server.variable(
        &mode_strings,
        "EnumStrings",
        21,
        UaValue::array(
            ua_gateway_sdk::BuiltInType::LocalizedText,
            vec![
                UaValue::LocalizedText(LocalizedText::text("Off")),
                UaValue::LocalizedText(LocalizedText::text("Auto")),
                UaValue::LocalizedText(LocalizedText::text("Manual")),
            ],
        ),
    );
    server.reference(&mode_type, ids::HAS_PROPERTY, &mode_strings);
    let mode = NodeId::string(2, "Mode");
    server.variable_of(&mode, "Mode", mode_type, UaValue::Int32(1));
    server.reference(&line, ids::HAS_COMPONENT, &mode);

    let pump = NodeId::string(2, "Pump");
    server.object(&pump, "Pump", ids::BASE_OBJECT_TYPE);
    server.reference(&line, ids::HAS_COMPONENT, &pump);

    let reset = NodeId::string(2, "Reset");
    server.method(&reset, "Reset");
    server.reference(&line, ids::HAS_COMPONENT, &reset);

    server
}

/// Binary schema declaring `Sample { count: Int32, values: Int32[count] }`.
pub const SAMPLE_DICTIONARY: &str = r#"<opc:TypeDictionary xmlns:opc="http://opcfoundation.org/BinarySchema/"
    xmlns:tns="urn:plant" TargetNamespace="urn:plant">
  <opc:StructuredType Name="Sample">
    <opc:Field Name="count" TypeName="opc:Int32"/>
    <opc:Field Name="values" TypeName="opc:Int32" LengthField="count"/>
  </opc:StructuredType>
</opc:TypeDictionary>"#;

/// `{count: 2, values: [10, 20]}` in Default Binary.
pub const SAMPLE_BODY: [u8; 12] = [
    0x02, 0x00, 0x00, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x14, 0x00, 0x00, 0x00,
];

/// Add a custom structure and a `2-Sample` variable holding one instance:
///
/// ```text
/// 0-22 Structure
/// └── 2-4000 SampleType              HasSubtype
///     └── 2-4001 "Default Binary"    HasEncoding
///         └── 2-4002 "Sample"        HasDescription
///             ^ 2-4003 dictionary    HasComponent, value `dictionary`
/// ```
pub fn with_structure(server: &MockServer, dictionary: &[u8]) {
    let sample_type = NodeId::numeric(2, 4000);
    server.base(&sample_type, "SampleType", NodeClass::DataType);
    server.reference(&NodeId::numeric(0, ids::STRUCTURE), ids::HAS_SUBTYPE, &sample_type);

    let encoding = NodeId::numeric(2, 4001);
    server.base(&encoding, "Default Binary", NodeClass::Object);
    server.reference(&sample_type, ids::HAS_ENCODING, &encoding);

    let description = NodeId::numeric(2, 4002);
    server.variable(&description, "Sample", 12, UaValue::String("Sample".into()));
    server.reference(&encoding, ids::HAS_DESCRIPTION, &description);

    let dictionary_node = NodeId::numeric(2, 4003);
    server.variable(
        &dictionary_node,
        "PlantDictionary",
        15,
        UaValue::ByteString(Bytes::copy_from_slice(dictionary)),
    );
    server.reference(&dictionary_node, ids::HAS_COMPONENT, &description);

    server.variable_of(
        &NodeId::string(2, "Sample"),
        "Sample",
        sample_type,
        UaValue::ExtensionObject(ExtensionObject {
            type_id: encoding,
            body: ExtensionBody::Binary(Bytes::from_static(&SAMPLE_BODY)),
        }),
    );
}
