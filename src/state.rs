//! Snapshot cache shared between the refresh loop and the resolver.
//!
//! The refresh loop is the only writer. Every refresh builds a complete
//! [`RecordSet`] and [`Allowlist`] and installs them together as one
//! immutable [`Snapshot`]; readers load the current snapshot without locking
//! and never see records from one cycle paired with the allowlist of another.

use arc_swap::ArcSwapOption;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tracing::debug;

use crate::allowlist::Allowlist;

/// Address records keyed by lowercase FQDN (with trailing dot).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSet {
    a: HashMap<String, Vec<Ipv4Addr>>,
    aaaa: HashMap<String, Vec<Ipv6Addr>>,
}

impl RecordSet {
    /// Create an empty record set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an A record for `name`.
    pub fn push_a(&mut self, name: &str, ip: Ipv4Addr) {
        self.a.entry(name.to_string()).or_default().push(ip);
    }

    /// Append an AAAA record for `name`.
    pub fn push_aaaa(&mut self, name: &str, ip: Ipv6Addr) {
        self.aaaa.entry(name.to_string()).or_default().push(ip);
    }

    /// Append `ip` to the list matching its family.
    ///
    /// IPv4-mapped IPv6 addresses are stored as A records.
    pub fn push(&mut self, name: &str, ip: IpAddr) {
        match ip {
            IpAddr::V4(v4) => self.push_a(name, v4),
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => self.push_a(name, v4),
                None => self.push_aaaa(name, v6),
            },
        }
    }

    /// A records for an exact name, in insertion order.
    pub fn a(&self, name: &str) -> &[Ipv4Addr] {
        self.a.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// AAAA records for an exact name, in insertion order.
    pub fn aaaa(&self, name: &str) -> &[Ipv6Addr] {
        self.aaaa.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Whether any record of any type exists for `name`.
    pub fn contains_name(&self, name: &str) -> bool {
        self.a.contains_key(name) || self.aaaa.contains_key(name)
    }

    /// Number of names with A records.
    pub fn a_names(&self) -> usize {
        self.a.len()
    }

    /// Number of names with AAAA records.
    pub fn aaaa_names(&self) -> usize {
        self.aaaa.len()
    }
}

/// Records and allowlist computed in the same refresh, plus their serial.
#[derive(Debug)]
pub struct Snapshot {
    /// Address records.
    pub records: RecordSet,
    /// Permitted source ranges.
    pub allowlist: Allowlist,
    /// Generation counter; changes only when content changes.
    pub serial: u32,
}

impl Snapshot {
    /// Whether `ip` is a permitted source. An absent address is never permitted.
    pub fn allows(&self, ip: Option<IpAddr>) -> bool {
        ip.is_some_and(|ip| self.allowlist.contains(ip))
    }
}

/// Lock-free holder of the current [`Snapshot`].
#[derive(Debug, Default)]
pub struct SnapshotCache {
    current: ArcSwapOption<Snapshot>,
}

impl SnapshotCache {
    /// Create a cache with no snapshot published yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically install new content and return the resulting serial.
    ///
    /// The serial is bumped when `records` or `allowlist` differ from the
    /// currently published snapshot and kept otherwise.
    pub fn publish(&self, records: RecordSet, allowlist: Allowlist) -> u32 {
        let mut serial = 0;
        self.current.rcu(|current| {
            serial = match current.as_deref() {
                Some(prev) if prev.records == records && prev.allowlist == allowlist => prev.serial,
                Some(prev) => prev.serial.wrapping_add(1).max(1),
                None => 1,
            };
            Some(Arc::new(Snapshot {
                records: records.clone(),
                allowlist: allowlist.clone(),
                serial,
            }))
        });
        debug!(serial, "published snapshot");
        serial
    }

    /// The current snapshot, if any has been published.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.current.load_full()
    }

    fn with_current<R>(&self, f: impl FnOnce(&Snapshot) -> R) -> Option<R> {
        let guard = self.current.load();
        guard.as_deref().map(f)
    }

    /// A records for `name` from the current snapshot.
    pub fn lookup_a(&self, name: &str) -> Vec<Ipv4Addr> {
        self.with_current(|s| s.records.a(name).to_vec()).unwrap_or_default()
    }

    /// AAAA records for `name` from the current snapshot.
    pub fn lookup_aaaa(&self, name: &str) -> Vec<Ipv6Addr> {
        self.with_current(|s| s.records.aaaa(name).to_vec()).unwrap_or_default()
    }

    /// Check a source address against the current allowlist.
    ///
    /// Before the first publish every source is allowed unless `strict_start`
    /// is set, in which case every source is denied.
    pub fn is_allowed(&self, ip: Option<IpAddr>, strict_start: bool) -> bool {
        self.with_current(|s| s.allows(ip)).unwrap_or(!strict_start)
    }

    /// Current serial, 0 before the first publish.
    pub fn serial(&self) -> u32 {
        self.with_current(|s| s.serial).unwrap_or(0)
    }

    /// Whether a snapshot has been published.
    pub fn is_ready(&self) -> bool {
        self.with_current(|_| ()).is_some()
    }
}
