use crate::session::OpcUaSession;
use async_trait::async_trait;
use dashmap::DashMap;
use opcua::{
    client::{Client, ClientBuilder, IdentityToken, Password},
    types as ua,
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};
use ua_gateway_error::{GatewayError, GatewayResult};
use ua_gateway_models::settings;
use ua_gateway_sdk::{EndpointDescription, MessageSecurityMode, UaConnector, UaSession};
use url::Url;

/// Opens `async-opcua` sessions configured from the `[client]` settings.
///
/// Discovery results are kept per server URL so `connect` can hand the full
/// endpoint description (server certificate included) to the client stack.
pub struct OpcUaConnector {
    config: settings::Client,
    discovered: DashMap<String, Vec<ua::EndpointDescription>>,
}

impl OpcUaConnector {
    pub fn new(config: settings::Client) -> Self {
        Self {
            config,
            discovered: DashMap::new(),
        }
    }

    /// Secure endpoints and X509 identities need an application instance
    /// certificate; plain ones do not.
    fn build_client(&self, secure: bool) -> GatewayResult<Client> {
        let cfg = &self.config;
        ClientBuilder::new()
            .application_name(&cfg.application_name)
            .application_uri(&cfg.application_uri)
            .pki_dir(&cfg.pki_dir)
            .session_retry_limit(0)
            .session_timeout(cfg.session_timeout_ms)
            .keep_alive_interval(Duration::from_millis(cfg.keep_alive_interval_ms))
            .trust_server_certs(secure)
            .create_sample_keypair(secure)
            .client()
            .map_err(|e| GatewayError::Internal(format!("OPC UA client configuration: {e:?}")))
    }

    fn identity(&self) -> IdentityToken {
        match &self.config.identity {
            settings::Identity::Anonymous => IdentityToken::Anonymous,
            settings::Identity::UserPassword { username, password } => {
                IdentityToken::UserName(username.clone(), Password::new(password.clone()))
            }
        }
    }

    async fn discover(&self, server_url: &str) -> GatewayResult<Vec<ua::EndpointDescription>> {
        let mut client = self.build_client(false)?;
        let endpoints = client
            .get_server_endpoints_from_url(server_url)
            .await
            .map_err(|sc| {
                GatewayError::server_unavailable(server_url, format!("GetEndpoints: {sc}"))
            })?;
        for ep in &endpoints {
            debug!(
                server_url,
                endpoint_url = %ep.endpoint_url,
                security_policy_uri = %ep.security_policy_uri,
                security_mode = ?ep.security_mode,
                "OPC UA discovered endpoint"
            );
        }
        self.discovered.insert(server_url.to_string(), endpoints.clone());
        Ok(endpoints)
    }

    async fn resolve(
        &self,
        server_url: &str,
        endpoint: &EndpointDescription,
    ) -> GatewayResult<ua::EndpointDescription> {
        let find = |endpoints: &[ua::EndpointDescription]| {
            endpoints
                .iter()
                .find(|ep| from_ua_endpoint(ep).as_ref() == Some(endpoint))
                .cloned()
        };
        let cached = self.discovered.get(server_url).and_then(|e| find(&e));
        if let Some(found) = cached {
            return Ok(found);
        }
        find(&self.discover(server_url).await?).ok_or_else(|| {
            GatewayError::server_unavailable(
                server_url,
                format!("endpoint {} is no longer advertised", endpoint.endpoint_url),
            )
        })
    }
}

fn security_mode(mode: ua::MessageSecurityMode) -> Option<MessageSecurityMode> {
    match mode {
        ua::MessageSecurityMode::None => Some(MessageSecurityMode::None),
        ua::MessageSecurityMode::Sign => Some(MessageSecurityMode::Sign),
        ua::MessageSecurityMode::SignAndEncrypt => Some(MessageSecurityMode::SignAndEncrypt),
        _ => None,
    }
}

fn from_ua_endpoint(ep: &ua::EndpointDescription) -> Option<EndpointDescription> {
    let endpoint_url: &str = ep.endpoint_url.as_ref();
    let security_policy_uri: &str = ep.security_policy_uri.as_ref();
    Some(EndpointDescription {
        endpoint_url: endpoint_url.to_string(),
        security_policy_uri: security_policy_uri.to_string(),
        security_mode: security_mode(ep.security_mode)?,
        security_level: ep.security_level,
    })
}

/// Servers often advertise a host name the gateway cannot resolve; the
/// configured URL decides host and port, the server decides the path.
fn override_host(server_url: &str, endpoint_url: &str) -> Option<String> {
    let configured = Url::parse(server_url).ok()?;
    let mut advertised = Url::parse(endpoint_url).ok()?;
    if let Some(host) = configured.host_str() {
        advertised.set_host(Some(host)).ok()?;
    }
    if let Some(port) = configured.port() {
        advertised.set_port(Some(port)).ok()?;
    }
    Some(advertised.to_string())
}

#[async_trait]
impl UaConnector for OpcUaConnector {
    async fn discover_endpoints(&self, server_url: &str) -> GatewayResult<Vec<EndpointDescription>> {
        let endpoints = self.discover(server_url.trim()).await?;
        Ok(endpoints.iter().filter_map(from_ua_endpoint).collect())
    }

    async fn connect(
        &self,
        server_url: &str,
        endpoint: &EndpointDescription,
    ) -> GatewayResult<Arc<dyn UaSession>> {
        let server_url = server_url.trim();
        let mut selected = self.resolve(server_url, endpoint).await?;
        let advertised = from_ua_endpoint(&selected)
            .map(|ep| ep.endpoint_url)
            .unwrap_or_else(|| endpoint.endpoint_url.clone());
        if let Some(url) = override_host(server_url, &advertised) {
            selected.endpoint_url = url.into();
        }
        info!(
            server_url,
            endpoint_url = %selected.endpoint_url,
            advertised_url = %advertised,
            security_policy_uri = %selected.security_policy_uri,
            security_mode = ?selected.security_mode,
            "Connecting OPC UA session"
        );

        let secure = endpoint.security_mode != MessageSecurityMode::None;
        let mut client = self.build_client(secure)?;
        let (session, ev) = client
            .connect_to_endpoint_directly(selected, self.identity())
            .map_err(|e| GatewayError::server_unavailable(server_url, format!("connect: {e}")))?;

        let session = OpcUaSession::start(server_url.to_string(), session, ev).await?;
        Ok(Arc::new(session))
    }
}
