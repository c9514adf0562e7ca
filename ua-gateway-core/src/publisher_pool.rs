use crate::registry::KeyedSlots;
use std::sync::Arc;
use tracing::info;
use ua_gateway_error::GatewayResult;
use ua_gateway_sdk::{BrokerUrl, Publisher, PublisherFactory};

/// Publishers pooled by [`BrokerUrl::key`], so every spelling of one broker
/// shares a publisher. A publisher lives until [`shutdown`].
///
/// [`shutdown`]: PublisherPool::shutdown
pub struct PublisherPool {
    factory: Arc<dyn PublisherFactory>,
    publishers: KeyedSlots<String, Arc<dyn Publisher>>,
}

impl PublisherPool {
    pub fn new(factory: Arc<dyn PublisherFactory>) -> Self {
        Self {
            factory,
            publishers: KeyedSlots::default(),
        }
    }

    pub async fn get_or_create(&self, broker: &BrokerUrl) -> GatewayResult<Arc<dyn Publisher>> {
        let key = broker.key();
        let mut slot = self.publishers.lock(&key).await;
        if let Some(publisher) = slot.as_ref() {
            return Ok(Arc::clone(publisher));
        }
        match self.factory.create(broker) {
            Ok(publisher) => {
                info!(broker = %broker, "Publisher created");
                *slot = Some(Arc::clone(&publisher));
                self.publishers.release(&key, slot);
                Ok(publisher)
            }
            Err(e) => {
                self.publishers.release(&key, slot);
                Err(e)
            }
        }
    }

    /// Number of live publishers.
    pub fn len(&self) -> usize {
        self.publishers.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn shutdown(&self) {
        for key in self.publishers.keys() {
            if let Some(mut slot) = self.publishers.lock_existing(&key).await {
                if let Some(publisher) = slot.take() {
                    publisher.close().await;
                    info!(broker = %key, "Publisher closed");
                }
                self.publishers.release(&key, slot);
            }
        }
    }
}
