//! Metrics instrumentation for ztnet-dns.
//!
//! All metrics are prefixed with `ztnet_dns.`

use hickory_proto::op::ResponseCode;
use metrics::{counter, gauge};

/// Record a terminal query outcome.
pub fn record_request(zone: &str, rcode: ResponseCode) {
    counter!(
        "ztnet_dns.request.count",
        "zone" => zone.to_string(),
        "rcode" => rcode_label(rcode)
    )
    .increment(1);
}

/// Record a query refused by the source allowlist.
pub fn record_refused(zone: &str) {
    counter!("ztnet_dns.refused.count", "zone" => zone.to_string()).increment(1);
}

fn rcode_label(rcode: ResponseCode) -> &'static str {
    match rcode {
        ResponseCode::NoError => "NOERROR",
        ResponseCode::NXDomain => "NXDOMAIN",
        ResponseCode::Refused => "REFUSED",
        ResponseCode::ServFail => "SERVFAIL",
        ResponseCode::FormErr => "FORMERR",
        ResponseCode::NotImp => "NOTIMP",
        _ => "OTHER",
    }
}

/// Record a refresh cycle outcome.
pub fn record_refresh(zone: &str, status: RefreshStatus) {
    let status_str = match status {
        RefreshStatus::Ok => "ok",
        RefreshStatus::Error => "error",
        RefreshStatus::Unauthorized => "unauthorized",
    };

    counter!("ztnet_dns.refresh.count", "zone" => zone.to_string(), "status" => status_str)
        .increment(1);
}

/// Refresh cycle outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStatus {
    /// A snapshot was published.
    Ok,
    /// The cycle aborted; the previous snapshot stays in force.
    Error,
    /// The directory rejected the credential.
    Unauthorized,
}

/// Record a credential load attempt.
pub fn record_credential_reload(zone: &str, source: &'static str, ok: bool) {
    counter!(
        "ztnet_dns.credential.reload.count",
        "zone" => zone.to_string(),
        "source" => source,
        "status" => if ok { "ok" } else { "error" }
    )
    .increment(1);
}

/// Record cache sizes after a publish.
pub fn record_cache_entries(zone: &str, a_names: usize, aaaa_names: usize) {
    gauge!("ztnet_dns.cache.entries", "zone" => zone.to_string(), "type" => "A")
        .set(a_names as f64);
    gauge!("ztnet_dns.cache.entries", "zone" => zone.to_string(), "type" => "AAAA")
        .set(aaaa_names as f64);
}

/// Record the SOA serial number.
pub fn record_serial(zone: &str, serial: u32) {
    gauge!("ztnet_dns.state.serial", "zone" => zone.to_string()).set(serial as f64);
}
