//! ZTNET directory API client.
//!
//! Two reads are exposed: the member list of a network and the network's
//! routing configuration. Every attempt and every backoff wait observes a
//! [`RequestContext`] so a shutdown or cycle deadline unwinds promptly.

use reqwest::{Client as HttpClient, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::DirectoryConfig;
use crate::error::DnsError;

/// Header carrying the directory credential.
pub const AUTH_HEADER: &str = "x-ztnet-auth";

/// Largest response body that will be decoded.
pub const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Backoff step; attempt `n` (0-based) waits `(n + 1) * BACKOFF_STEP`.
const BACKOFF_STEP: Duration = Duration::from_millis(100);

/// Field names that may carry a member's node id, highest priority first.
const NODE_ID_ALIASES: [&str; 5] = ["nodeId", "nodeid", "node_id", "id", "address"];

/// A network member as reported by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawMember")]
pub struct Member {
    /// Normalized (trimmed, lowercase) node id; empty if none was present.
    pub node_id: String,
    /// Display name as entered in the directory.
    pub name: String,
    /// Whether the member is authorized on the network.
    pub authorized: bool,
    /// Assigned addresses, unparsed.
    pub ip_assignments: Vec<String>,
}

#[derive(Deserialize)]
struct RawMember {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    authorized: Option<bool>,
    #[serde(default, rename = "ipAssignments")]
    ip_assignments: Option<Vec<String>>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

impl From<RawMember> for Member {
    fn from(raw: RawMember) -> Self {
        let node_id = NODE_ID_ALIASES
            .iter()
            .find_map(|alias| raw.rest.get(*alias).and_then(node_id_candidate))
            .unwrap_or_default();

        Member {
            node_id,
            name: raw.name.unwrap_or_default(),
            authorized: raw.authorized.unwrap_or(false),
            ip_assignments: raw.ip_assignments.unwrap_or_default(),
        }
    }
}

fn node_id_candidate(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_ascii_lowercase())
        }
        Value::Number(n) => n
            .as_u64()
            .map(|v| v.to_string())
            .or_else(|| n.as_i64().map(|v| v.to_string()))
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.is_finite())
                    .map(|f| format!("{f:.0}"))
            }),
        _ => None,
    }
}

/// A route from the network configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Route {
    /// Destination CIDR, unparsed.
    #[serde(default)]
    pub target: String,
    /// Next hop; `None` for directly reachable subnets.
    #[serde(default, deserialize_with = "non_empty")]
    pub via: Option<String>,
}

impl Route {
    /// True when the route has no next hop.
    pub fn is_local(&self) -> bool {
        self.via.is_none()
    }
}

fn non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.trim().is_empty()))
}

/// Network-level information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NetworkInfo {
    /// Network configuration block.
    #[serde(default)]
    pub config: NetworkConfig,
}

/// The `config` block of a network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NetworkConfig {
    /// Managed routes.
    #[serde(default)]
    pub routes: Vec<Route>,
}

/// Cancellation and deadline shared by all calls in one refresh cycle.
#[derive(Debug, Clone)]
pub struct RequestContext {
    cancel: CancellationToken,
    deadline: Instant,
}

impl RequestContext {
    /// Context that expires `timeout` from now or when `cancel` fires.
    pub fn new(cancel: CancellationToken, timeout: Duration) -> Self {
        Self {
            cancel,
            deadline: Instant::now() + timeout,
        }
    }

    /// Drive `fut` unless cancelled or past the deadline.
    async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, DnsError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DnsError::Cancelled),
            _ = sleep_until(self.deadline) => Err(DnsError::DeadlineExceeded),
            out = fut => Ok(out),
        }
    }
}

/// Client for the directory API.
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    http: HttpClient,
    base_url: String,
    network_id: String,
    max_retries: u32,
}

enum Attempt<T> {
    Done(T),
    Retry(DnsError),
}

impl DirectoryClient {
    /// Build a client from directory configuration.
    pub fn new(config: &DirectoryConfig) -> Result<Self, DnsError> {
        let timeout = config.timeout();
        let http = HttpClient::builder()
            .timeout(timeout)
            .connect_timeout(timeout / 2)
            .user_agent(concat!("ztnet-dns/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            network_id: config.network_id.clone(),
            max_retries: config.max_retries,
        })
    }

    /// Fetch the members of the network, keeping only authorized ones.
    pub async fn fetch_members(
        &self,
        token: &str,
        ctx: &RequestContext,
    ) -> Result<Vec<Member>, DnsError> {
        let path = format!("/network/{}/member", self.network_id);
        let members: Vec<Member> = self.get_json(token, &path, ctx).await?;
        let total = members.len();
        let authorized: Vec<Member> = members.into_iter().filter(|m| m.authorized).collect();
        debug!(total, authorized = authorized.len(), "fetched members");
        Ok(authorized)
    }

    /// Fetch the network's routing configuration.
    pub async fn fetch_network(
        &self,
        token: &str,
        ctx: &RequestContext,
    ) -> Result<NetworkInfo, DnsError> {
        let path = format!("/network/{}", self.network_id);
        let network: NetworkInfo = self.get_json(token, &path, ctx).await?;
        debug!(routes = network.config.routes.len(), "fetched network");
        Ok(network)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        token: &str,
        path: &str,
        ctx: &RequestContext,
    ) -> Result<T, DnsError> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0u32;

        loop {
            let last_error = match self.attempt(token, &url, path, ctx).await? {
                Attempt::Done(value) => return Ok(value),
                Attempt::Retry(err) => err,
            };

            if attempt >= self.max_retries {
                return Err(last_error);
            }

            let wait = BACKOFF_STEP * (attempt + 1);
            warn!(path, attempt, ?wait, error = %last_error, "directory request failed, retrying");
            ctx.guard(sleep(wait)).await?;
            attempt += 1;
        }
    }

    /// One GET. Terminal failures are returned as `Err`, retryable ones as `Attempt::Retry`.
    async fn attempt<T: DeserializeOwned>(
        &self,
        token: &str,
        url: &str,
        path: &str,
        ctx: &RequestContext,
    ) -> Result<Attempt<T>, DnsError> {
        debug!(url, "GET request");
        let sent = ctx
            .guard(self.http.get(url).header(AUTH_HEADER, token).send())
            .await?;

        let response = match sent {
            Ok(response) => response,
            Err(source) => {
                return Ok(Attempt::Retry(DnsError::DirectoryUnreachable {
                    path: path.to_string(),
                    source,
                }))
            }
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(DnsError::Unauthorized {
                path: path.to_string(),
            });
        }
        if status.is_server_error() {
            return Ok(Attempt::Retry(DnsError::DirectoryServerError {
                path: path.to_string(),
                status: status.as_u16(),
            }));
        }
        if !status.is_success() {
            return Err(DnsError::DirectoryBadRequest {
                path: path.to_string(),
                status: status.as_u16(),
            });
        }

        let body = ctx.guard(read_capped(response, path)).await??;
        serde_json::from_slice(&body)
            .map(Attempt::Done)
            .map_err(|e| DnsError::Decode {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }
}

async fn read_capped(mut response: reqwest::Response, path: &str) -> Result<Vec<u8>, DnsError> {
    let too_large = || DnsError::Decode {
        path: path.to_string(),
        reason: format!("response body exceeds {MAX_BODY_BYTES} bytes"),
    };

    if response
        .content_length()
        .is_some_and(|len| len > MAX_BODY_BYTES as u64)
    {
        return Err(too_large());
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(|e| DnsError::Decode {
        path: path.to_string(),
        reason: e.to_string(),
    })? {
        if body.len() + chunk.len() > MAX_BODY_BYTES {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}
