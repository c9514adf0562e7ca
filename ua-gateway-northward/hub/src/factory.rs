use crate::publisher::HubPublisher;
use std::sync::Arc;
use ua_gateway_error::GatewayResult;
use ua_gateway_models::settings;
use ua_gateway_sdk::{BrokerUrl, Publisher, PublisherFactory};

#[derive(Debug, Clone, Default)]
pub struct HubPublisherFactory {
    settings: settings::Publisher,
}

impl HubPublisherFactory {
    pub fn new(settings: settings::Publisher) -> Self {
        Self { settings }
    }
}

impl PublisherFactory for HubPublisherFactory {
    fn create(&self, broker: &BrokerUrl) -> GatewayResult<Arc<dyn Publisher>> {
        Ok(Arc::new(HubPublisher::spawn(broker.clone(), &self.settings)?))
    }
}
