mod accessor;
mod connection;
mod dictionary;
mod gateway;
mod publisher_pool;
mod registry;
mod remote;
mod subscription;

pub use accessor::NodeAccessor;
pub use connection::{select_endpoint, ConnectionRegistry};
pub use dictionary::{ResolvedType, TypeCatalog};
pub use gateway::Gateway;
pub use publisher_pool::PublisherPool;
pub use subscription::{SubscriptionEngine, SubscriptionKey, SubscriptionOptions};
