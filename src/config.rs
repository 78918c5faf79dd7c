//! Configuration types for ztnet-dns.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::allowlist::Allowlist;
use crate::credential::CredentialSource;
use crate::error::DnsError;

/// Length of a ZeroTier network identifier in hex characters.
const NETWORK_ID_LEN: usize = 16;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// DNS zone configuration.
    pub dns: DnsConfig,

    /// Directory (ZTNET API) configuration.
    pub directory: DirectoryConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), DnsError> {
        self.dns.validate()?;
        self.directory.validate()
    }
}

/// DNS zone configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Address for DNS server to listen on (UDP and TCP).
    pub listen_addr: SocketAddr,

    /// Zone served by this instance (e.g., "zt.example.com").
    pub zone: String,

    /// TTL for DNS records in seconds, also the SOA minimum.
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// Deny every source until the first successful refresh.
    #[serde(default)]
    pub strict_start: bool,

    /// Domain advertised in the `_dns-sd._udp` TXT record. Defaults to the zone.
    #[serde(default)]
    pub search_domain: Option<String>,

    /// Answer single-label names as if they were inside the zone.
    #[serde(default)]
    pub allow_short_names: bool,

    /// Allow sources from directly reachable (no `via`) network routes.
    #[serde(default = "default_true")]
    pub auto_allow_routes: bool,

    /// Extra CIDRs that are always allowed.
    #[serde(default)]
    pub allowed_networks: Vec<String>,

    /// Add the derived RFC4193 address of each member to its AAAA records.
    #[serde(default)]
    pub synthesize_rfc4193: bool,

    /// Add the derived 6PLANE address of each member to its AAAA records.
    #[serde(default)]
    pub synthesize_6plane: bool,
}

impl DnsConfig {
    /// The zone as a lowercase FQDN with trailing dot.
    pub fn zone_fqdn(&self) -> String {
        normalize_fqdn(&self.zone)
    }

    /// The search domain as a lowercase FQDN, falling back to the zone.
    pub fn search_domain_fqdn(&self) -> String {
        match self.search_domain.as_deref().map(str::trim) {
            Some(domain) if !domain.is_empty() => normalize_fqdn(domain),
            _ => self.zone_fqdn(),
        }
    }

    fn validate(&self) -> Result<(), DnsError> {
        if self.zone_fqdn() == "." {
            return Err(DnsError::Config("dns.zone is required".to_string()));
        }
        Allowlist::new(&self.allowed_networks)
            .map_err(|e| DnsError::Config(format!("dns.allowed_networks: {e}")))?;
        Ok(())
    }
}

/// Directory (ZTNET API) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// API base URL including version prefix (e.g., "https://ztnet.example.com/api/v1").
    pub api_url: String,

    /// 16-hex-character network identifier.
    pub network_id: String,

    /// Read the credential from this file.
    #[serde(default)]
    pub token_file: Option<PathBuf>,

    /// Read the credential from this environment variable.
    #[serde(default)]
    pub token_env: Option<String>,

    /// Inline credential (development only).
    #[serde(default)]
    pub api_token: Option<String>,

    /// Refresh interval in seconds.
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,

    /// Per-cycle HTTP deadline in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Retries after the first attempt for transport errors and 5xx.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl DirectoryConfig {
    /// Resolve the single configured credential directive.
    pub fn credential_source(&self) -> Result<CredentialSource, DnsError> {
        let mut sources = Vec::with_capacity(1);
        if let Some(path) = &self.token_file {
            sources.push(CredentialSource::File(path.clone()));
        }
        if let Some(name) = &self.token_env {
            sources.push(CredentialSource::Env(name.clone()));
        }
        if let Some(value) = &self.api_token {
            sources.push(CredentialSource::Inline(value.clone()));
        }

        match sources.len() {
            1 => Ok(sources.remove(0)),
            n => Err(DnsError::Config(format!(
                "exactly one of token_file, token_env, api_token is required, got {n}"
            ))),
        }
    }

    /// Refresh interval.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }

    /// Per-cycle HTTP deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn validate(&self) -> Result<(), DnsError> {
        if self.api_url.trim().is_empty() {
            return Err(DnsError::Config("directory.api_url is required".to_string()));
        }
        validate_network_id(&self.network_id)?;
        self.credential_source()?;
        if self.refresh_secs == 0 {
            return Err(DnsError::Config(
                "directory.refresh_secs must be greater than zero".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(DnsError::Config(
                "directory.timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn validate_network_id(network_id: &str) -> Result<(), DnsError> {
    if network_id.len() != NETWORK_ID_LEN {
        return Err(DnsError::Config(format!(
            "directory.network_id must be exactly {NETWORK_ID_LEN} hex characters, got length {}",
            network_id.len()
        )));
    }
    if !network_id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(DnsError::Config(
            "directory.network_id must contain only hex characters".to_string(),
        ));
    }
    Ok(())
}

/// Lowercase `name` and make it fully qualified.
pub fn normalize_fqdn(name: &str) -> String {
    let trimmed = name.trim().trim_end_matches('.').to_ascii_lowercase();
    format!("{trimmed}.")
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "ztnet_dns=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ttl() -> u32 {
    60
}

fn default_true() -> bool {
    true
}

fn default_refresh_secs() -> u64 {
    30
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_max_retries() -> u32 {
    3
}
