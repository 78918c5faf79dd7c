//! Background refresh of the snapshot cache from the directory.
//!
//! Each cycle loads the credential, fetches members and routes concurrently,
//! derives a fresh [`RecordSet`] and [`Allowlist`], and publishes both in one
//! step. Any failure leaves the previous snapshot in force.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::addressing;
use crate::allowlist::Allowlist;
use crate::config::Config;
use crate::credential::CredentialSource;
use crate::directory::{DirectoryClient, Member, RequestContext, Route};
use crate::error::DnsError;
use crate::metrics::{self, RefreshStatus};
use crate::state::{RecordSet, SnapshotCache};

/// Longest DNS label.
const MAX_LABEL_LEN: usize = 63;
/// Longest DNS name in presentation form, without the trailing dot.
const MAX_NAME_LEN: usize = 253;

/// Derived-address options applied while building records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Synthesis {
    /// Network id the derivations are keyed on.
    pub network_id: String,
    /// Append the RFC4193 address.
    pub rfc4193: bool,
    /// Append the 6PLANE address.
    pub six_plane: bool,
}

/// Everything a refresh cycle needs besides the client and cache.
#[derive(Debug, Clone)]
pub struct RefreshSettings {
    /// Zone FQDN, lowercase with trailing dot.
    pub zone: String,
    /// Where the credential is read from on each cycle.
    pub credential: CredentialSource,
    /// Statically allowed CIDRs.
    pub allowed_networks: Vec<String>,
    /// Also allow directly reachable route targets.
    pub auto_allow_routes: bool,
    /// Derived-address options.
    pub synthesis: Synthesis,
    /// Time between cycles.
    pub interval: Duration,
    /// Deadline for the directory calls of one cycle.
    pub timeout: Duration,
}

impl RefreshSettings {
    /// Extract refresh settings from validated configuration.
    pub fn from_config(config: &Config) -> Result<Self, DnsError> {
        Ok(Self {
            zone: config.dns.zone_fqdn(),
            credential: config.directory.credential_source()?,
            allowed_networks: config.dns.allowed_networks.clone(),
            auto_allow_routes: config.dns.auto_allow_routes,
            synthesis: Synthesis {
                network_id: config.directory.network_id.clone(),
                rfc4193: config.dns.synthesize_rfc4193,
                six_plane: config.dns.synthesize_6plane,
            },
            interval: config.directory.refresh_interval(),
            timeout: config.directory.timeout(),
        })
    }
}

/// Single writer of the snapshot cache.
pub struct RefreshLoop {
    client: DirectoryClient,
    cache: Arc<SnapshotCache>,
    settings: RefreshSettings,
}

impl RefreshLoop {
    /// Create a refresh loop publishing into `cache`.
    pub fn new(
        client: DirectoryClient,
        cache: Arc<SnapshotCache>,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            client,
            cache,
            settings,
        }
    }

    /// Refresh immediately, then every interval, until `cancel` fires.
    ///
    /// Cycles never overlap: the next tick is awaited only after the current
    /// cycle has finished.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            zone = %self.settings.zone,
            interval = ?self.settings.interval,
            "refresh loop started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("refresh loop shutting down");
                    return;
                }
                _ = ticker.tick() => {}
            }

            // Failures are counted and logged inside; the old snapshot keeps serving.
            let _ = self.refresh_once(&cancel).await;
        }
    }

    /// Run one cycle and return the published serial.
    pub async fn refresh_once(&self, cancel: &CancellationToken) -> Result<u32, DnsError> {
        let zone = self.settings.zone.as_str();
        match self.cycle(cancel).await {
            Ok(serial) => {
                metrics::record_refresh(zone, RefreshStatus::Ok);
                Ok(serial)
            }
            Err(e) if e.is_cancelled() => {
                debug!(zone, "refresh cancelled");
                Err(e)
            }
            Err(e) if e.is_unauthorized() => {
                error!(
                    zone,
                    error = %e,
                    "directory rejected credential, keeping previous snapshot"
                );
                metrics::record_refresh(zone, RefreshStatus::Unauthorized);
                Err(e)
            }
            Err(e) => {
                warn!(zone, error = %e, "refresh failed, keeping previous snapshot");
                metrics::record_refresh(zone, RefreshStatus::Error);
                Err(e)
            }
        }
    }

    async fn cycle(&self, cancel: &CancellationToken) -> Result<u32, DnsError> {
        let zone = self.settings.zone.as_str();
        let source = &self.settings.credential;

        let token = source.load();
        metrics::record_credential_reload(zone, source.kind(), token.is_ok());
        let token = token?;

        let ctx = RequestContext::new(cancel.clone(), self.settings.timeout);
        let (members, network) = tokio::join!(
            self.client.fetch_members(&token, &ctx),
            self.client.fetch_network(&token, &ctx),
        );
        let members = members?;
        let network = network?;

        let records = build_records(&members, zone, &self.settings.synthesis);
        let cidrs = collect_allowed_cidrs(
            &self.settings.allowed_networks,
            &network.config.routes,
            self.settings.auto_allow_routes,
        );
        let allowlist = Allowlist::new(&cidrs)?;

        let (a_names, aaaa_names) = (records.a_names(), records.aaaa_names());
        let serial = self.cache.publish(records, allowlist);

        metrics::record_cache_entries(zone, a_names, aaaa_names);
        metrics::record_serial(zone, serial);
        info!(
            zone,
            serial,
            members = members.len(),
            a_names,
            aaaa_names,
            allowed = cidrs.len(),
            "refresh complete"
        );
        Ok(serial)
    }
}

/// Build the record set for `members` under `zone`.
///
/// Each member is published as `<node_id>.<zone>` and, when its display name
/// forms a valid label, as `<display_name>.<zone>`. Every address is added to
/// every name of its member.
pub fn build_records(members: &[Member], zone: &str, synthesis: &Synthesis) -> RecordSet {
    let mut records = RecordSet::new();

    for member in members {
        let names = member_names(member, zone);
        if names.is_empty() {
            warn!(name = %member.name, "member has empty node id, skipping");
            continue;
        }

        let mut addresses: Vec<IpAddr> = member
            .ip_assignments
            .iter()
            .filter_map(|raw| match raw.trim().parse() {
                Ok(ip) => Some(ip),
                Err(_) => {
                    debug!(
                        node_id = %member.node_id,
                        address = %raw,
                        "ignoring unparseable address"
                    );
                    None
                }
            })
            .collect();
        addresses.extend(synthesized(member, synthesis));

        for name in &names {
            for ip in &addresses {
                records.push(name, *ip);
            }
        }
    }

    records
}

/// Names under which `member` is published; empty when it has no node id.
pub fn member_names(member: &Member, zone: &str) -> Vec<String> {
    let node_id = member.node_id.trim().to_ascii_lowercase();
    if node_id.is_empty() {
        return Vec::new();
    }

    let mut names = vec![format!("{node_id}.{zone}")];
    if !member.name.trim().is_empty() {
        match display_name_label(&member.name) {
            Some(label) if label.len() + zone.len() <= MAX_NAME_LEN => {
                let name = format!("{label}.{zone}");
                // A label equal to the node id would repeat every record under one owner.
                if !names.contains(&name) {
                    names.push(name);
                }
            }
            _ => warn!(
                name = %member.name,
                "display name is not a valid DNS label, skipping name record"
            ),
        }
    }
    names
}

/// Normalize a display name into a DNS label.
///
/// Trims, replaces spaces with `_` and lowercases; returns `None` unless the
/// result is 1 to 63 characters of `[a-z0-9_-]`.
pub fn display_name_label(name: &str) -> Option<String> {
    let label = name.trim().replace(' ', "_").to_lowercase();
    let valid = !label.is_empty()
        && label.len() <= MAX_LABEL_LEN
        && label
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-');
    valid.then_some(label)
}

fn synthesized(member: &Member, synthesis: &Synthesis) -> Vec<IpAddr> {
    let mut derived = Vec::new();
    if synthesis.rfc4193 {
        match addressing::rfc4193(&synthesis.network_id, &member.node_id) {
            Ok(ip) => derived.push(IpAddr::V6(ip)),
            Err(e) => debug!(node_id = %member.node_id, error = %e, "no RFC4193 address"),
        }
    }
    if synthesis.six_plane {
        match addressing::six_plane(&synthesis.network_id, &member.node_id) {
            Ok(ip) => derived.push(IpAddr::V6(ip)),
            Err(e) => debug!(node_id = %member.node_id, error = %e, "no 6PLANE address"),
        }
    }
    derived
}

/// Configured CIDRs followed by directly reachable route targets.
pub fn collect_allowed_cidrs(
    configured: &[String],
    routes: &[Route],
    auto_allow: bool,
) -> Vec<String> {
    let mut cidrs = configured.to_vec();
    if auto_allow {
        cidrs.extend(
            routes
                .iter()
                .filter(|route| route.is_local() && !route.target.trim().is_empty())
                .map(|route| route.target.trim().to_string()),
        );
    }
    cidrs
}
