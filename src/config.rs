//! SeedPilot Configuration
//!
//! Every hook invocation builds one `SeedPilotConfig` from built-in
//! defaults, an optional TOML file, and finally the process environment.
//! Environment values are cleaned the way container images expect:
//! `#` starts a comment, whitespace is trimmed and `$VAR` references are
//! expanded.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Main SeedPilot configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedPilotConfig {
    /// Coordination store connection
    #[serde(default)]
    pub consul: ConsulConfig,

    /// Session used to hold the seed lock
    #[serde(default)]
    pub session: SessionConfig,

    /// Identity of this node
    #[serde(default)]
    pub node: NodeConfig,

    /// Seed election settings
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Clustered service (Cassandra) settings
    #[serde(default)]
    pub service: ServiceConfig,

    /// Reachability probe settings
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Coordination store connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsulConfig {
    /// Consul host, optionally with a port (`consul` or `consul:8500`)
    #[serde(default = "default_consul_address")]
    pub address: String,

    /// A Consul agent runs next to this node; talk to it on localhost
    #[serde(default)]
    pub agent: bool,

    /// HTTP API port, used when `address` carries none
    #[serde(default = "default_consul_port")]
    pub port: u16,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Logical session name, also the session's name on the store
    #[serde(default = "default_session_name")]
    pub name: String,

    /// Session TTL in seconds (clamped to the store's allowed range)
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,

    /// File holding the session id between hook invocations
    #[serde(default = "default_session_cache_file")]
    pub cache_file: PathBuf,
}

/// Node identity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Network interface whose IPv4 address identifies this node
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Fixed routable address (skips interface detection)
    #[serde(default)]
    pub advertise_address: Option<String>,

    /// Role prefix for the logical node name
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
}

/// Seed election configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Logical cluster name written into the service configuration
    #[serde(default = "default_cluster_name")]
    pub name: String,

    /// Store key holding the seed address
    #[serde(default = "default_seed_key")]
    pub seed_key: String,

    /// Upper bound of the random pause before joining, in seconds
    #[serde(default = "default_join_jitter")]
    pub join_jitter_secs: u64,

    /// Claim rounds before giving up when neither record nor lock is visible
    #[serde(default = "default_claim_attempts")]
    pub claim_attempts: u32,

    /// Pause between claim rounds, in milliseconds
    #[serde(default = "default_claim_retry")]
    pub claim_retry_millis: u64,
}

/// Clustered service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Path of the service's persistent configuration file
    #[serde(default = "default_service_config_path")]
    pub config_path: PathBuf,

    /// Admin tool used for status queries
    #[serde(default = "default_nodetool")]
    pub nodetool: String,

    /// Topology snitch selected in the service configuration
    #[serde(default = "default_snitch")]
    pub endpoint_snitch: String,
}

/// Reachability probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Seconds to wait for a single echo reply
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_consul_address() -> String {
    "consul".to_string()
}

fn default_consul_port() -> u16 {
    8500
}

fn default_request_timeout() -> u64 {
    10
}

fn default_session_name() -> String {
    "consul-session".to_string()
}

fn default_session_ttl() -> u64 {
    25
}

fn default_session_cache_file() -> PathBuf {
    PathBuf::from("/tmp/consul-session")
}

fn default_interface() -> String {
    "eth0".to_string()
}

fn default_name_prefix() -> String {
    "cassandra".to_string()
}

fn default_cluster_name() -> String {
    "MainCluster".to_string()
}

fn default_seed_key() -> String {
    "cluster_seeds".to_string()
}

fn default_join_jitter() -> u64 {
    20
}

fn default_claim_attempts() -> u32 {
    3
}

fn default_claim_retry() -> u64 {
    1000
}

fn default_service_config_path() -> PathBuf {
    PathBuf::from("/etc/cassandra/cassandra.yaml")
}

fn default_nodetool() -> String {
    "nodetool".to_string()
}

fn default_snitch() -> String {
    "GossipingPropertyFileSnitch".to_string()
}

fn default_probe_timeout() -> u64 {
    2
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: default_consul_address(),
            agent: false,
            port: default_consul_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: default_session_name(),
            ttl_secs: default_session_ttl(),
            cache_file: default_session_cache_file(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            advertise_address: None,
            name_prefix: default_name_prefix(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: default_cluster_name(),
            seed_key: default_seed_key(),
            join_jitter_secs: default_join_jitter(),
            claim_attempts: default_claim_attempts(),
            claim_retry_millis: default_claim_retry(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            config_path: default_service_config_path(),
            nodetool: default_nodetool(),
            endpoint_snitch: default_snitch(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_probe_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl SeedPilotConfig {
    /// Build the configuration for one hook invocation: defaults, then the
    /// optional TOML file, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                toml::from_str(&content)?
            }
            None => SeedPilotConfig::default(),
        };
        let vars: HashMap<String, String> = std::env::vars().collect();
        config.apply_env(&vars)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> Result<Self> {
        let config: SeedPilotConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from environment-style variables
    pub fn apply_env(&mut self, vars: &HashMap<String, String>) -> Result<()> {
        if let Some(v) = env_value(vars, "CONSUL") {
            self.consul.address = v;
        }
        if let Some(v) = env_value(vars, "CONSUL_AGENT") {
            self.consul.agent = to_flag(&v);
        }
        if let Some(v) = env_value(vars, "CONSUL_PORT") {
            self.consul.port = parse_number("CONSUL_PORT", &v)?;
        }
        if let Some(v) = env_value(vars, "SESSION_NAME") {
            self.session.name = v;
        }
        if let Some(v) = env_value(vars, "SESSION_TTL") {
            self.session.ttl_secs = parse_number("SESSION_TTL", &v)?;
        }
        if let Some(v) = env_value(vars, "SESSION_CACHE_FILE") {
            self.session.cache_file = PathBuf::from(v);
        }
        if let Some(v) = env_value(vars, "NODE_INTERFACE") {
            self.node.interface = v;
        }
        if let Some(v) = env_value(vars, "NODE_ADDRESS") {
            self.node.advertise_address = Some(v).filter(|s| !s.is_empty());
        }
        if let Some(v) = env_value(vars, "NODE_NAME_PREFIX") {
            self.node.name_prefix = v;
        }
        if let Some(v) = env_value(vars, "CLUSTER_NAME") {
            self.cluster.name = v;
        }
        if let Some(v) = env_value(vars, "SEED_KEY") {
            self.cluster.seed_key = v;
        }
        if let Some(v) = env_value(vars, "SEED_JOIN_JITTER") {
            self.cluster.join_jitter_secs = parse_number("SEED_JOIN_JITTER", &v)?;
        }
        if let Some(v) = env_value(vars, "CASSANDRA_CONFIG") {
            self.service.config_path = PathBuf::from(v);
        }
        if let Some(v) = env_value(vars, "NODETOOL") {
            self.service.nodetool = v;
        }
        if let Some(v) = env_value(vars, "PING_TIMEOUT") {
            self.probe.timeout_secs = parse_number("PING_TIMEOUT", &v)?;
        }
        if let Some(v) = env_value(vars, "LOG_LEVEL") {
            self.logging.level = v.to_lowercase();
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.consul.address.is_empty() {
            return Err(Error::Config("consul.address cannot be empty".into()));
        }

        if self.session.name.is_empty() {
            return Err(Error::Config("session.name cannot be empty".into()));
        }

        if self.session.cache_file.as_os_str().is_empty() {
            return Err(Error::Config("session.cache_file cannot be empty".into()));
        }

        if self.cluster.seed_key.is_empty() {
            return Err(Error::Config("cluster.seed_key cannot be empty".into()));
        }

        if self.cluster.claim_attempts == 0 {
            return Err(Error::Config("cluster.claim_attempts must be at least 1".into()));
        }

        Ok(())
    }

    /// Host the coordination client talks to
    pub fn consul_host(&self) -> &str {
        if self.consul.agent {
            "localhost"
        } else {
            &self.consul.address
        }
    }

    /// Base URL of the Consul HTTP API
    pub fn consul_url(&self) -> String {
        let host = self.consul_host();
        if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else if host.contains(':') {
            format!("http://{}", host)
        } else {
            format!("http://{}:{}", host, self.consul.port)
        }
    }

    /// Store key of the lock guarding the seed claim
    pub fn seed_lock_key(&self) -> String {
        format!("{}_lock", self.cluster.seed_key)
    }

    /// Get the request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.consul.request_timeout_secs)
    }

    /// Get the join jitter upper bound as Duration
    pub fn join_jitter(&self) -> Duration {
        Duration::from_secs(self.cluster.join_jitter_secs)
    }

    /// Get the probe timeout as Duration
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe.timeout_secs.max(1))
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("{} must be a number, got '{}'", key, value)))
}

/// Read one variable, strip the trailing comment and whitespace and expand
/// `$VAR` references against the process environment.
pub fn env_value(vars: &HashMap<String, String>, key: &str) -> Option<String> {
    let raw = vars.get(key)?;
    let cleaned = raw.split('#').next().unwrap_or("").trim();
    Some(expand_vars(cleaned, |name| std::env::var(name).ok()))
}

/// Expand `$NAME` and `${NAME}`; unknown variables are left verbatim
pub fn expand_vars<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        match (name.is_empty(), lookup(name)) {
            (false, Some(value)) => out.push_str(&value),
            _ => out.push_str(&rest[pos..pos + 1 + consumed]),
        }
        rest = &after[consumed..];
    }

    out.push_str(rest);
    out
}

/// Parse flag strings like "yes/no", "on/off", "true/false", "1/0"
pub fn to_flag(value: &str) -> bool {
    if let Ok(n) = value.trim().parse::<i64>() {
        return n != 0;
    }
    let value = value.trim().to_lowercase();
    !matches!(value.as_str(), "" | "false" | "off" | "no" | "n")
}
