mod factory;
mod options;
mod publisher;
mod supervisor;

pub use factory::MqttPublisherFactory;
pub use options::MqttConnectOptions;
pub use publisher::MqttPublisher;
