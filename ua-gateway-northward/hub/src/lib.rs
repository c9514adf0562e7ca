mod connection;
mod factory;
mod protocol;
mod publisher;

pub use factory::HubPublisherFactory;
pub use publisher::HubPublisher;
