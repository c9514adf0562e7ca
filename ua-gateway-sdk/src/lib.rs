pub mod codec;
mod node_id;
mod publisher;
mod retry;
mod session;
pub mod structure;
mod types;
mod value;

pub use codec::{
    DeclaredType, EncodedValue, EnumDefinition, StructureBinding, TypeKind, ValueCodec,
    ValueContext, DEFAULT_MAX_NESTING_DEPTH,
};
pub use node_id::{Identifier, NodeId, PlatformNodeId};
pub use publisher::{BrokerScheme, BrokerUrl, Publisher, PublisherFactory, DEFAULT_MQTT_PORT};
pub use retry::{build_exponential_backoff, RetryPolicy};
pub use session::{
    BrowseDirection, BrowseRequest, DataChangeCallback, DataChangeFilter, DeadbandType,
    EndpointDescription, MessageSecurityMode, MonitoredItemRequest, MonitoredItemResult,
    ReadValueId, ReferenceDescription, SubscriptionParams, UaConnector, UaSession,
};
pub use structure::TypeDictionary;
pub use types::{
    ids, AttributeId, BuiltInType, DataValue, DiagnosticInfo, ExpandedNodeId, ExtensionBody,
    ExtensionObject, LocalizedText, NodeClass, QualifiedName, StatusCode, ValueRank,
    ACCESS_LEVEL_CURRENT_WRITE,
};
pub use value::{UaArray, UaValue};
