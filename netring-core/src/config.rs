//! Configuration loading for the member agent and the registry service
//!
//! Both components read a YAML file when one is given on the command line.
//! Without a file, configuration comes from `NETRING_*` environment
//! variables (the flat names used by container deployments). The two
//! sources are never merged: a file, when present, is authoritative.

use std::path::Path;

use config::{Config as ConfigBuilder, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Member agent configuration, rooted at the `member:` key of the YAML file.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemberConfig {
    pub location: String,
    /// Pre-assigned instance id. Usually absent; the registry assigns one.
    pub instance_id: Option<String>,
    pub registry: RegistryEndpoint,
    pub intervals: Intervals,
    pub checks: Checks,
    pub server: MemberServer,
    pub tests: Tests,
    pub fault_tolerance: FaultTolerance,
    pub logging: LoggingConfig,
}

impl std::fmt::Debug for MemberConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemberConfig")
            .field("location", &self.location)
            .field("instance_id", &self.instance_id)
            .field("registry", &self.registry)
            .field("intervals", &self.intervals)
            .field("checks", &self.checks)
            .field("server", &self.server)
            .field("tests", &self.tests)
            .field("fault_tolerance", &self.fault_tolerance)
            .field("logging", &self.logging)
            .finish()
    }
}

impl Default for MemberConfig {
    fn default() -> Self {
        Self {
            location: "unknown".to_string(),
            instance_id: None,
            registry: RegistryEndpoint::default(),
            intervals: Intervals::default(),
            checks: Checks::default(),
            server: MemberServer::default(),
            tests: Tests::default(),
            fault_tolerance: FaultTolerance::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryEndpoint {
    pub url: String,
}

impl Default for RegistryEndpoint {
    fn default() -> Self {
        Self {
            url: "http://localhost:8756".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Intervals {
    /// Seconds between peer-discovery polls against the registry.
    pub poll_interval: u64,
    /// Seconds between connectivity check rounds.
    pub check_interval: u64,
    /// Seconds between registry heartbeats.
    pub heartbeat_interval: u64,
    /// Seconds between bandwidth test rounds.
    pub bandwidth_test_interval: u64,
    /// Seconds between traceroute rounds.
    pub traceroute_interval: u64,
    /// Seconds between metric reports to the registry.
    pub report_interval: u64,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            poll_interval: 30,
            check_interval: 60,
            heartbeat_interval: 45,
            bandwidth_test_interval: 300,
            traceroute_interval: 300,
            report_interval: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Checks {
    /// TCP connect timeout in seconds.
    pub tcp_timeout: u64,
    /// HTTP request timeout in seconds.
    pub http_timeout: u64,
    /// Peer endpoints probed by the HTTP connectivity check.
    pub http_endpoints: Vec<String>,
}

impl Default for Checks {
    fn default() -> Self {
        Self {
            tcp_timeout: 5,
            http_timeout: 10,
            http_endpoints: vec!["/health".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemberServer {
    pub host: String,
    pub port: u16,
    /// How to determine the address advertised to peers: `auto`,
    /// `env:<VARNAME>`, or a literal IP.
    pub advertise_ip: String,
}

impl Default for MemberServer {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8757,
            advertise_ip: "auto".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Tests {
    /// Requested bandwidth payload size in MB (the serving side clamps to 10).
    pub bandwidth_test_size_mb: u64,
}

impl Default for Tests {
    fn default() -> Self {
        Self {
            bandwidth_test_size_mb: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultTolerance {
    /// Seconds without a task heartbeat before the watchdog restarts it.
    pub task_timeout: u64,
    /// Seconds between watchdog scans of the heartbeat table.
    pub monitor_interval: u64,
}

impl Default for FaultTolerance {
    fn default() -> Self {
        Self {
            task_timeout: 300,
            monitor_interval: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` for production, `pretty` for development.
    pub format: String,
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl MemberConfig {
    /// Load member configuration from a YAML file, or from `NETRING_*`
    /// environment variables when no file is given.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        match config_file {
            Some(path) => Self::from_file(path),
            None => Self::from_env(),
        }
    }

    /// Load from a YAML file rooted at the `member:` key.
    pub fn from_file(path: &Path) -> Result<Self> {
        let path_str = path
            .to_str()
            .ok_or_else(|| Error::Config(format!("non-UTF8 config path: {}", path.display())))?;
        let cfg = ConfigBuilder::builder()
            .add_source(File::new(path_str, FileFormat::Yaml))
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;
        cfg.get::<Self>("member")
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from environment variables only (for Docker/K8s).
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = env_string("NETRING_LOCATION") {
            config.location = v;
        }
        config.instance_id = env_string("NETRING_INSTANCE_ID");
        if let Some(v) = env_string("NETRING_REGISTRY_URL") {
            config.registry.url = v;
        }
        if let Some(v) = env_parse("NETRING_POLL_INTERVAL")? {
            config.intervals.poll_interval = v;
        }
        if let Some(v) = env_parse("NETRING_CHECK_INTERVAL")? {
            config.intervals.check_interval = v;
        }
        if let Some(v) = env_parse("NETRING_HEARTBEAT_INTERVAL")? {
            config.intervals.heartbeat_interval = v;
        }
        if let Some(v) = env_parse("NETRING_BANDWIDTH_TEST_INTERVAL")? {
            config.intervals.bandwidth_test_interval = v;
        }
        if let Some(v) = env_parse("NETRING_TRACEROUTE_INTERVAL")? {
            config.intervals.traceroute_interval = v;
        }
        if let Some(v) = env_parse("NETRING_REPORT_INTERVAL")? {
            config.intervals.report_interval = v;
        }
        if let Some(v) = env_parse("NETRING_TCP_TIMEOUT")? {
            config.checks.tcp_timeout = v;
        }
        if let Some(v) = env_parse("NETRING_HTTP_TIMEOUT")? {
            config.checks.http_timeout = v;
        }
        if let Some(v) = env_string("NETRING_HTTP_ENDPOINTS") {
            config.checks.http_endpoints =
                v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Some(v) = env_string("NETRING_SERVER_HOST") {
            config.server.host = v;
        }
        if let Some(v) = env_parse("NETRING_SERVER_PORT")? {
            config.server.port = v;
        }
        if let Some(v) = env_string("NETRING_ADVERTISE_IP") {
            config.server.advertise_ip = v;
        }
        if let Some(v) = env_parse("NETRING_BANDWIDTH_TEST_SIZE_MB")? {
            config.tests.bandwidth_test_size_mb = v;
        }
        if let Some(v) = env_parse("NETRING_TASK_TIMEOUT")? {
            config.fault_tolerance.task_timeout = v;
        }
        if let Some(v) = env_parse("NETRING_MONITOR_INTERVAL")? {
            config.fault_tolerance.monitor_interval = v;
        }
        if let Some(v) = env_string("NETRING_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Some(v) = env_string("NETRING_LOG_FORMAT") {
            config.logging.format = v;
        }
        Ok(config)
    }
}

/// Registry service configuration, rooted at the `registry:` key.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub redis: RedisConfig,
    pub server: RegistryServer,
    /// Seconds a member record lives without a heartbeat.
    pub member_ttl: u64,
    /// Seconds between cleanup scans.
    pub cleanup_interval: u64,
    pub expected_members: ExpectedMembersConfig,
    pub logging: LoggingConfig,
}

impl std::fmt::Debug for RegistryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryConfig")
            .field("redis", &self.redis)
            .field("server", &self.server)
            .field("member_ttl", &self.member_ttl)
            .field("cleanup_interval", &self.cleanup_interval)
            .field("expected_members", &self.expected_members)
            .field("logging", &self.logging)
            .finish()
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            server: RegistryServer::default(),
            member_ttl: 300,
            cleanup_interval: 60,
            expected_members: ExpectedMembersConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub password: Option<String>,
}

impl std::fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .field(
                "password",
                &self.password.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
            password: None,
        }
    }
}

impl RedisConfig {
    /// Connection URL in the form the redis client expects.
    #[must_use]
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => {
                format!("redis://:{}@{}:{}/{}", password, self.host, self.port, self.db)
            }
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryServer {
    pub host: String,
    pub port: u16,
}

impl Default for RegistryServer {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8756,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpectedMembersConfig {
    /// Path to the expected-topology YAML descriptor.
    pub config_file: Option<String>,
    pub enable_missing_detection: bool,
    /// Seconds between background missing-member evaluations.
    pub missing_check_interval: u64,
}

impl Default for ExpectedMembersConfig {
    fn default() -> Self {
        Self {
            config_file: None,
            enable_missing_detection: false,
            missing_check_interval: 60,
        }
    }
}

impl RegistryConfig {
    /// Load registry configuration from a YAML file, or from `NETRING_*`
    /// environment variables when no file is given.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        match config_file {
            Some(path) => Self::from_file(path),
            None => Self::from_env(),
        }
    }

    /// Load from a YAML file rooted at the `registry:` key.
    pub fn from_file(path: &Path) -> Result<Self> {
        let path_str = path
            .to_str()
            .ok_or_else(|| Error::Config(format!("non-UTF8 config path: {}", path.display())))?;
        let cfg = ConfigBuilder::builder()
            .add_source(File::new(path_str, FileFormat::Yaml))
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;
        cfg.get::<Self>("registry")
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from environment variables only (for Docker/K8s).
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = env_string("NETRING_REDIS_HOST") {
            config.redis.host = v;
        }
        if let Some(v) = env_parse("NETRING_REDIS_PORT")? {
            config.redis.port = v;
        }
        if let Some(v) = env_parse("NETRING_REDIS_DB")? {
            config.redis.db = v;
        }
        config.redis.password = env_string("NETRING_REDIS_PASSWORD");
        if let Some(v) = env_string("NETRING_SERVER_HOST") {
            config.server.host = v;
        }
        if let Some(v) = env_parse("NETRING_SERVER_PORT")? {
            config.server.port = v;
        }
        if let Some(v) = env_parse("NETRING_MEMBER_TTL")? {
            config.member_ttl = v;
        }
        if let Some(v) = env_parse("NETRING_CLEANUP_INTERVAL")? {
            config.cleanup_interval = v;
        }
        config.expected_members.config_file = env_string("NETRING_EXPECTED_MEMBERS_FILE");
        if let Some(v) = env_string("NETRING_ENABLE_MISSING_DETECTION") {
            config.expected_members.enable_missing_detection =
                matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = env_parse("NETRING_MISSING_CHECK_INTERVAL")? {
            config.expected_members.missing_check_interval = v;
        }
        if let Some(v) = env_string("NETRING_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Some(v) = env_string("NETRING_LOG_FORMAT") {
            config.logging.format = v;
        }
        Ok(config)
    }

    /// Listen address for the HTTP server.
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env_string(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Config(format!("invalid {name}={raw}: {e}"))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn member_defaults() {
        let config = MemberConfig::default();
        assert_eq!(config.location, "unknown");
        assert_eq!(config.registry.url, "http://localhost:8756");
        assert_eq!(config.intervals.poll_interval, 30);
        assert_eq!(config.intervals.check_interval, 60);
        assert_eq!(config.intervals.heartbeat_interval, 45);
        assert_eq!(config.intervals.bandwidth_test_interval, 300);
        assert_eq!(config.intervals.traceroute_interval, 300);
        assert_eq!(config.checks.tcp_timeout, 5);
        assert_eq!(config.checks.http_timeout, 10);
        assert_eq!(config.server.port, 8757);
        assert_eq!(config.server.advertise_ip, "auto");
        assert_eq!(config.fault_tolerance.task_timeout, 300);
        assert_eq!(config.fault_tolerance.monitor_interval, 60);
    }

    #[test]
    fn registry_defaults() {
        let config = RegistryConfig::default();
        assert_eq!(config.redis.port, 6379);
        assert_eq!(config.server.port, 8756);
        assert_eq!(config.member_ttl, 300);
        assert_eq!(config.cleanup_interval, 60);
        assert!(!config.expected_members.enable_missing_detection);
    }

    #[test]
    fn member_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
        write!(
            file,
            "member:\n  location: us1-k8s\n  registry:\n    url: http://registry:8756\n  intervals:\n    poll_interval: 45\n  server:\n    port: 9000\n"
        )
        .unwrap();

        let config = MemberConfig::from_file(file.path()).unwrap();
        assert_eq!(config.location, "us1-k8s");
        assert_eq!(config.registry.url, "http://registry:8756");
        assert_eq!(config.intervals.poll_interval, 45);
        // Unset keys fall back to defaults
        assert_eq!(config.intervals.check_interval, 60);
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn registry_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
        write!(
            file,
            "registry:\n  redis:\n    host: test-redis\n    port: 6379\n    db: 0\n  server:\n    host: 0.0.0.0\n    port: 8756\n  member_ttl: 300\n  cleanup_interval: 60\n"
        )
        .unwrap();

        let config = RegistryConfig::from_file(file.path()).unwrap();
        assert_eq!(config.redis.host, "test-redis");
        assert_eq!(config.member_ttl, 300);
        assert_eq!(config.cleanup_interval, 60);
        assert_eq!(config.http_address(), "0.0.0.0:8756");
    }

    #[test]
    fn redis_url_masks_nothing_but_formats_password() {
        let mut redis = RedisConfig::default();
        assert_eq!(redis.url(), "redis://localhost:6379/0");
        redis.password = Some("secret".to_string());
        assert_eq!(redis.url(), "redis://:secret@localhost:6379/0");
        let shown = format!("{redis:?}");
        assert!(!shown.contains("secret"));
    }
}
