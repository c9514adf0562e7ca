use config::{Config, File, FileFormat};
use serde::{self, Deserialize};
use std::{ops::Deref, sync::Arc, time::Duration};
use ua_gateway_error::GatewayResult;
use ua_gateway_sdk::{MessageSecurityMode, RetryPolicy, DEFAULT_MAX_NESTING_DEPTH};

const ENV_PREFIX: &str = "UAGW";

#[derive(Debug, Clone, Default)]
pub struct Settings(Arc<Inner>);

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Settings {
    /// Load settings from an optional file plus `UAGW__` environment overrides.
    ///
    /// # Environment override
    /// - `UAGW__GENERAL__OPERATION_TIMEOUT_MS=5000`
    /// - `UAGW__PUBLISHER__MQTT__QOS=0`
    pub fn new(config_path: &str) -> GatewayResult<Self> {
        let builder = Config::builder()
            .add_source(File::with_name(config_path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            );
        let inner: Inner = builder.build()?.try_deserialize()?;
        Ok(Self(Arc::new(inner)))
    }

    /// Load settings from TOML text only, without environment overrides.
    pub fn from_toml(content: &str) -> GatewayResult<Self> {
        let inner: Inner = Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(Self(Arc::new(inner)))
    }

    pub fn from_inner(inner: Inner) -> Self {
        Self(Arc::new(inner))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub general: General,
    #[serde(default)]
    pub client: Client,
    #[serde(default)]
    pub subscription: Subscription,
    #[serde(default)]
    pub publisher: Publisher,
    #[serde(default)]
    pub log: Log,
    /// Registered backend servers; ids are assigned by position.
    #[serde(default)]
    pub servers: Vec<ServerEntry>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct General {
    /// Nesting limit shared by every recursive codec path
    #[serde(default = "General::max_nesting_depth_default")]
    pub max_nesting_depth: usize,
    /// Bound on discovery and session creation (in milliseconds)
    #[serde(default = "General::operation_timeout_ms_default")]
    pub operation_timeout_ms: u64,
    /// Hop bound for type hierarchy walks
    #[serde(default = "General::browse_max_hops_default")]
    pub browse_max_hops: usize,
}

impl Default for General {
    fn default() -> Self {
        General {
            max_nesting_depth: General::max_nesting_depth_default(),
            operation_timeout_ms: General::operation_timeout_ms_default(),
            browse_max_hops: General::browse_max_hops_default(),
        }
    }
}

impl General {
    fn max_nesting_depth_default() -> usize {
        DEFAULT_MAX_NESTING_DEPTH
    }

    fn operation_timeout_ms_default() -> u64 {
        10000
    }

    fn browse_max_hops_default() -> usize {
        32
    }

    #[inline]
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// OPC UA client identity and session options.
#[derive(Debug, Clone, Deserialize)]
pub struct Client {
    #[serde(default = "Client::application_name_default")]
    pub application_name: String,
    #[serde(default = "Client::application_uri_default")]
    pub application_uri: String,
    /// Directory holding the client certificate store
    #[serde(default = "Client::pki_dir_default")]
    pub pki_dir: String,
    #[serde(default = "Client::session_timeout_ms_default")]
    pub session_timeout_ms: u32,
    #[serde(default = "Client::keep_alive_interval_ms_default")]
    pub keep_alive_interval_ms: u64,
    #[serde(default)]
    pub endpoint_policy: EndpointPolicy,
    #[serde(default)]
    pub identity: Identity,
}

impl Default for Client {
    fn default() -> Self {
        Client {
            application_name: Client::application_name_default(),
            application_uri: Client::application_uri_default(),
            pki_dir: Client::pki_dir_default(),
            session_timeout_ms: Client::session_timeout_ms_default(),
            keep_alive_interval_ms: Client::keep_alive_interval_ms_default(),
            endpoint_policy: EndpointPolicy::default(),
            identity: Identity::default(),
        }
    }
}

impl Client {
    fn application_name_default() -> String {
        "UA Gateway".into()
    }

    fn application_uri_default() -> String {
        "urn:ua-gateway".into()
    }

    fn pki_dir_default() -> String {
        "./pki".into()
    }

    fn session_timeout_ms_default() -> u32 {
        30000
    }

    fn keep_alive_interval_ms_default() -> u64 {
        30000
    }
}

/// How an endpoint is chosen among those a server advertises.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum EndpointPolicy {
    /// The first endpoint returned by discovery.
    #[default]
    First,
    HighestSecurityLevel,
    Matching {
        security_policy_uri: String,
        security_mode: MessageSecurityMode,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Identity {
    #[default]
    Anonymous,
    UserPassword { username: String, password: String },
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Subscription {
    #[serde(default = "Subscription::publishing_interval_ms_default")]
    pub publishing_interval_ms: u64,
    #[serde(default = "Subscription::lifetime_count_default")]
    pub lifetime_count: u32,
    #[serde(default = "Subscription::max_keep_alive_count_default")]
    pub max_keep_alive_count: u32,
    /// Server-side queue size of each monitored item
    #[serde(default = "Subscription::queue_size_default")]
    pub queue_size: u32,
    /// Attach the value schema to every change notification
    #[serde(default)]
    pub include_schema: bool,
}

impl Default for Subscription {
    fn default() -> Self {
        Subscription {
            publishing_interval_ms: Subscription::publishing_interval_ms_default(),
            lifetime_count: Subscription::lifetime_count_default(),
            max_keep_alive_count: Subscription::max_keep_alive_count_default(),
            queue_size: Subscription::queue_size_default(),
            include_schema: false,
        }
    }
}

impl Subscription {
    fn publishing_interval_ms_default() -> u64 {
        500
    }

    fn lifetime_count_default() -> u32 {
        60
    }

    fn max_keep_alive_count_default() -> u32 {
        20
    }

    fn queue_size_default() -> u32 {
        10
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Publisher {
    /// Outbound queue capacity of each publisher (bounded channel)
    #[serde(default = "Publisher::queue_capacity_default")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub mqtt: Mqtt,
    #[serde(default)]
    pub hub: Hub,
}

impl Default for Publisher {
    fn default() -> Self {
        Publisher {
            queue_capacity: Publisher::queue_capacity_default(),
            mqtt: Mqtt::default(),
            hub: Hub::default(),
        }
    }
}

impl Publisher {
    fn queue_capacity_default() -> usize {
        1024
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Mqtt {
    #[serde(default = "Mqtt::keep_alive_secs_default")]
    pub keep_alive_secs: u64,
    /// 0, 1 or 2
    #[serde(default = "Mqtt::qos_default")]
    pub qos: u8,
    #[serde(default = "Mqtt::client_id_prefix_default")]
    pub client_id_prefix: String,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for Mqtt {
    fn default() -> Self {
        Mqtt {
            keep_alive_secs: Mqtt::keep_alive_secs_default(),
            qos: Mqtt::qos_default(),
            client_id_prefix: Mqtt::client_id_prefix_default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl Mqtt {
    fn keep_alive_secs_default() -> u64 {
        60
    }

    fn qos_default() -> u8 {
        1
    }

    fn client_id_prefix_default() -> String {
        "ua-gateway".into()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hub {
    /// Hub method invoked with `[topic, message]`
    #[serde(default = "Hub::method_default")]
    pub method: String,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for Hub {
    fn default() -> Self {
        Hub {
            method: Hub::method_default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl Hub {
    fn method_default() -> String {
        "Publish".into()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Log {
    #[serde(default = "Log::level_default")]
    pub level: String,
    #[serde(default = "Log::dir_default")]
    pub dir: String,
}

impl Default for Log {
    fn default() -> Self {
        Log {
            level: Log::level_default(),
            dir: Log::dir_default(),
        }
    }
}

impl Log {
    fn level_default() -> String {
        "info".into()
    }

    fn dir_default() -> String {
        "logs".into()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerEntry {
    pub name: String,
    pub url: String,
}
