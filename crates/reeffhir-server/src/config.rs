use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub circuit: CircuitConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Tenant buckets this deployment serves.
    #[serde(default = "default_tenants")]
    pub tenants: Vec<TenantConfig>,
}

impl AppConfig {
    /// Load from an optional TOML file plus `REEFFHIR_*` environment
    /// overrides (`REEFFHIR_SERVER__PORT=8081`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("REEFFHIR")
                .separator("__")
                .try_parsing(true),
        );
        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.request_timeout_ms == 0 {
            return Err("server.request_timeout_ms must be > 0".into());
        }
        if self.pagination.default_page_size == 0 {
            return Err("pagination.default_page_size must be > 0".into());
        }
        if self.search.fts_limit == 0 {
            return Err("search.fts_limit must be > 0".into());
        }
        if self.search.max_page_size < self.pagination.default_page_size {
            return Err("search.max_page_size must be >= pagination.default_page_size".into());
        }
        if self.tenants.is_empty() {
            return Err("at least one tenant must be configured".into());
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid:?}"));
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    /// Base URL used in bundle links and Location headers.
    pub fn base_url(&self) -> String {
        self.server
            .base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.server.host, self.server.port))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.server.request_timeout_ms))
    }

    pub fn circuit_reset_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.circuit.reset_timeout_ms))
    }

    pub fn pagination_ttl(&self) -> Duration {
        Duration::from_secs(u64::from(self.pagination.ttl_seconds))
    }

    pub fn tenant_names(&self) -> impl Iterator<Item = String> {
        self.tenants.iter().map(|t| t.name.clone()).collect::<Vec<_>>().into_iter()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// External base URL; defaults to `http://{host}:{port}`.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Tokio worker threads; `None` uses the runtime default.
    #[serde(default)]
    pub worker_threads: Option<usize>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_url: None,
            worker_threads: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitConfig {
    #[serde(default = "default_circuit_reset_ms")]
    pub reset_timeout_ms: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            reset_timeout_ms: default_circuit_reset_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    /// Matches the `Admin.cache` collection's maxTTL.
    #[serde(default = "default_pagination_ttl_seconds")]
    pub ttl_seconds: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            ttl_seconds: default_pagination_ttl_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Safety cap on keys returned by one FTS.
    #[serde(default = "default_fts_limit")]
    pub fts_limit: usize,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            fts_limit: default_fts_limit(),
            max_page_size: default_max_page_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub name: String,
    /// Resource types `$everything` scans for references to the patient.
    /// Absent configuration means the empty set.
    #[serde(default)]
    pub everything: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout_ms() -> u32 {
    30_000
}
fn default_circuit_reset_ms() -> u32 {
    30_000
}
fn default_page_size() -> usize {
    50
}
fn default_pagination_ttl_seconds() -> u32 {
    300
}
fn default_fts_limit() -> usize {
    1_000
}
fn default_max_page_size() -> usize {
    500
}
fn default_log_level() -> String {
    "info".into()
}
fn default_tenants() -> Vec<TenantConfig> {
    vec![TenantConfig {
        name: "demo".into(),
        everything: Vec::new(),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let mut config = AppConfig::default();
        config.tenants = default_tenants();
        assert!(config.validate().is_ok());
        assert_eq!(config.circuit.reset_timeout_ms, 30_000);
        assert_eq!(config.pagination.default_page_size, 50);
        assert_eq!(config.pagination.ttl_seconds, 300);
        assert_eq!(config.search.fts_limit, 1_000);
    }

    #[test]
    fn base_url_prefers_explicit_setting() {
        let mut config = AppConfig::default();
        assert_eq!(config.base_url(), "http://0.0.0.0:8080");
        config.server.base_url = Some("https://fhir.example.org".into());
        assert_eq!(config.base_url(), "https://fhir.example.org");
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.tenants = default_tenants();
        config.search.fts_limit = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.tenants = Vec::new();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.tenants = default_tenants();
        config.logging.level = "verbose".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_round_trip() {
        let toml = r#"
            [server]
            port = 9090
            base_url = "http://fhir.local"

            [circuit]
            reset_timeout_ms = 5000

            [[tenants]]
            name = "acme"
            everything = ["Observation", "Encounter"]
        "#;
        let config: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.circuit.reset_timeout_ms, 5000);
        assert_eq!(config.tenants[0].name, "acme");
        assert_eq!(config.tenants[0].everything.len(), 2);
        // Unset sections keep their defaults.
        assert_eq!(config.pagination.default_page_size, 50);
    }
}
