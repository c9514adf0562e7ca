use crate::registry::KeyedSlots;
use std::{future::Future, sync::Arc, time::Duration};
use tracing::{debug, info, instrument, warn};
use ua_gateway_error::{GatewayError, GatewayResult};
use ua_gateway_models::settings::EndpointPolicy;
use ua_gateway_sdk::{
    ids, AttributeId, EndpointDescription, NodeId, ReadValueId, UaConnector, UaSession,
};

/// `ServerState.Running`
const SERVER_STATE_RUNNING: i64 = 0;

/// Owns every session, keyed by server URL.
///
/// A cached session is health checked before being handed out; a failed check
/// discards it and exactly one fresh session is attempted before the
/// server is reported unavailable.
pub struct ConnectionRegistry {
    connector: Arc<dyn UaConnector>,
    sessions: KeyedSlots<String, Arc<dyn UaSession>>,
    policy: EndpointPolicy,
    operation_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(
        connector: Arc<dyn UaConnector>,
        policy: EndpointPolicy,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            sessions: KeyedSlots::default(),
            policy,
            operation_timeout,
        }
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn acquire(&self, server_url: &str) -> GatewayResult<Arc<dyn UaSession>> {
        let key = server_url.to_string();
        let mut slot = self.sessions.lock(&key).await;

        if let Some(session) = slot.as_ref() {
            match self.health_check(session.as_ref()).await {
                Ok(()) => return Ok(Arc::clone(session)),
                Err(reason) => {
                    warn!(server_url, reason = %reason, "Session health check failed, reconnecting");
                    if let Some(stale) = slot.take() {
                        stale.disconnect().await;
                    }
                }
            }
        }

        match self.establish(server_url).await {
            Ok(session) => {
                *slot = Some(Arc::clone(&session));
                self.sessions.release(&key, slot);
                Ok(session)
            }
            Err(e) => {
                self.sessions.release(&key, slot);
                Err(e)
            }
        }
    }

    pub async fn is_available(&self, server_url: &str) -> bool {
        match self.acquire(server_url).await {
            Ok(_) => true,
            Err(e) => {
                debug!(server_url, error = %e, "Server unavailable");
                false
            }
        }
    }

    /// Disconnect every cached session.
    pub async fn shutdown(&self) {
        for key in self.sessions.keys() {
            if let Some(mut slot) = self.sessions.lock_existing(&key).await {
                if let Some(session) = slot.take() {
                    session.disconnect().await;
                    info!(server_url = %key, "Session closed");
                }
                self.sessions.release(&key, slot);
            }
        }
    }

    async fn health_check(&self, session: &dyn UaSession) -> Result<(), String> {
        let state = ReadValueId::new(
            NodeId::numeric(0, ids::SERVER_STATUS_STATE),
            AttributeId::Value,
        );
        let values = session
            .read(std::slice::from_ref(&state))
            .await
            .map_err(|e| e.to_string())?;
        let dv = values.into_iter().next().ok_or("empty health check result")?;
        if !dv.status.is_good() {
            return Err(format!("server status read returned {}", dv.status));
        }
        match dv.value.as_ref().and_then(|v| v.as_i64()) {
            Some(SERVER_STATE_RUNNING) => Ok(()),
            Some(state) => Err(format!("server state is {state}, not running")),
            None => Err("server state has no value".into()),
        }
    }

    async fn establish(&self, server_url: &str) -> GatewayResult<Arc<dyn UaSession>> {
        let endpoints = self
            .bounded(server_url, self.connector.discover_endpoints(server_url))
            .await?;
        for ep in &endpoints {
            debug!(
                url = %ep.endpoint_url,
                policy = %ep.security_policy_uri,
                mode = ?ep.security_mode,
                level = ep.security_level,
                "Discovered endpoint"
            );
        }
        let endpoint = select_endpoint(&self.policy, &endpoints).ok_or_else(|| {
            GatewayError::server_unavailable(
                server_url,
                format!(
                    "no endpoint satisfies {:?} among {} discovered",
                    self.policy,
                    endpoints.len()
                ),
            )
        })?;
        let session = self
            .bounded(server_url, self.connector.connect(server_url, endpoint))
            .await?;
        info!(
            server_url,
            endpoint = %endpoint.endpoint_url,
            policy = %endpoint.security_policy_uri,
            "Session established"
        );
        Ok(session)
    }

    async fn bounded<T>(
        &self,
        server_url: &str,
        fut: impl Future<Output = GatewayResult<T>>,
    ) -> GatewayResult<T> {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e @ GatewayError::ServerUnavailable { .. })) => Err(e),
            Ok(Err(e)) => Err(GatewayError::server_unavailable(server_url, e)),
            Err(_elapsed) => Err(GatewayError::server_unavailable(
                server_url,
                GatewayError::Timeout(self.operation_timeout),
            )),
        }
    }
}

/// Pick an endpoint according to the configured policy.
pub fn select_endpoint<'a>(
    policy: &EndpointPolicy,
    endpoints: &'a [EndpointDescription],
) -> Option<&'a EndpointDescription> {
    match policy {
        EndpointPolicy::First => endpoints.first(),
        // ties keep discovery order
        EndpointPolicy::HighestSecurityLevel => endpoints
            .iter()
            .rev()
            .max_by_key(|e| e.security_level),
        EndpointPolicy::Matching {
            security_policy_uri,
            security_mode,
        } => endpoints.iter().find(|e| {
            &e.security_policy_uri == security_policy_uri && &e.security_mode == security_mode
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ua_gateway_sdk::MessageSecurityMode;

    fn ep(policy: &str, mode: MessageSecurityMode, level: u8) -> EndpointDescription {
        EndpointDescription {
            endpoint_url: "opc.tcp://plc:4840".into(),
            security_policy_uri: policy.into(),
            security_mode: mode,
            security_level: level,
        }
    }

    #[test]
    fn test_endpoint_policies() {
        let none = "http://opcfoundation.org/UA/SecurityPolicy#None";
        let sha = "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256";
        let eps = vec![
            ep(none, MessageSecurityMode::None, 0),
            ep(sha, MessageSecurityMode::Sign, 3),
            ep(sha, MessageSecurityMode::SignAndEncrypt, 3),
        ];
        assert_eq!(select_endpoint(&EndpointPolicy::First, &eps), Some(&eps[0]));
        assert_eq!(
            select_endpoint(&EndpointPolicy::HighestSecurityLevel, &eps),
            Some(&eps[1])
        );
        let matching = EndpointPolicy::Matching {
            security_policy_uri: sha.into(),
            security_mode: MessageSecurityMode::SignAndEncrypt,
        };
        assert_eq!(select_endpoint(&matching, &eps), Some(&eps[2]));
        assert_eq!(select_endpoint(&EndpointPolicy::First, &[]), None);
    }
}
