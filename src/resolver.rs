//! Query resolution against the snapshot cache.
//!
//! [`ZoneResolver`] has no transport dependency: it maps a question and a
//! source address to a [`Resolution`], which the hickory authority adapter
//! then turns into a response.
//!
//! ```text
//! question ──▶ in zone? ──no──▶ Passthrough
//!                │ yes (or bare name rewritten into the zone)
//!                ▼
//!           source allowed? ──no──▶ Refused
//!                │
//!                ▼
//!           _dns-sd TXT? ──yes──▶ Answer(TXT)
//!                │
//!                ▼
//!           answers? ──yes──▶ Answer
//!                │ no
//!                ▼
//!           name known ─▶ NoData | bare ─▶ Passthrough | else NxDomain(SOA)
//! ```

use hickory_proto::op::ResponseCode;
use hickory_proto::rr::rdata::{A, AAAA, NS, SOA, TXT};
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::config::DnsConfig;
use crate::error::DnsError;
use crate::metrics;
use crate::state::{Snapshot, SnapshotCache};

/// SOA refresh interval in seconds.
pub const SOA_REFRESH: i32 = 3600;
/// SOA retry interval in seconds.
pub const SOA_RETRY: i32 = 600;
/// SOA expire interval in seconds.
pub const SOA_EXPIRE: i32 = 86400;

/// Owner name of the DNS-SD browse-domain TXT record, relative to the zone.
const DNS_SD_LABELS: &str = "_dns-sd._udp";

/// A single DNS question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    /// Queried name.
    pub name: Name,
    /// Queried type.
    pub query_type: RecordType,
}

impl Question {
    /// Build a question.
    pub fn new(name: Name, query_type: RecordType) -> Self {
        Self { name, query_type }
    }
}

/// Outcome of resolving one question.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// NOERROR with a non-empty answer section.
    Answer(Vec<Record>),
    /// NOERROR with an empty answer section; the name exists.
    NoData,
    /// NXDOMAIN with the zone SOA for the authority section.
    NxDomain(Record),
    /// REFUSED with no answer or authority data.
    Refused,
    /// SERVFAIL (no question to answer).
    ServFail,
    /// Not answered here; hand the query to the next handler unchanged.
    Passthrough,
}

impl Resolution {
    /// Response code for terminal outcomes, `None` for passthrough.
    pub fn response_code(&self) -> Option<ResponseCode> {
        match self {
            Resolution::Answer(_) | Resolution::NoData => Some(ResponseCode::NoError),
            Resolution::NxDomain(_) => Some(ResponseCode::NXDomain),
            Resolution::Refused => Some(ResponseCode::Refused),
            Resolution::ServFail => Some(ResponseCode::ServFail),
            Resolution::Passthrough => None,
        }
    }
}

/// The name actually looked up for a question.
struct Target {
    owner: Name,
    key: String,
    rewritten: bool,
}

/// Authoritative resolver for one zone.
#[derive(Debug, Clone)]
pub struct ZoneResolver {
    cache: Arc<SnapshotCache>,
    zone: Name,
    zone_key: String,
    dns_sd: Name,
    mname: Name,
    rname: Name,
    search_domain: Option<String>,
    ttl: u32,
    strict_start: bool,
    allow_short_names: bool,
}

impl ZoneResolver {
    /// Create a resolver for the zone in `config`, reading from `cache`.
    pub fn new(config: &DnsConfig, cache: Arc<SnapshotCache>) -> Result<Self, DnsError> {
        let zone_key = config.zone_fqdn();
        let zone = Name::from_ascii(&zone_key)?;
        let search_domain = config.search_domain_fqdn();

        Ok(Self {
            cache,
            dns_sd: Name::from_ascii(format!("{DNS_SD_LABELS}.{zone_key}"))?,
            mname: Name::from_ascii(format!("ns1.{zone_key}"))?,
            rname: Name::from_ascii(format!("hostmaster.{zone_key}"))?,
            search_domain: (search_domain != ".").then_some(search_domain),
            zone,
            zone_key,
            ttl: config.ttl,
            strict_start: config.strict_start,
            allow_short_names: config.allow_short_names,
        })
    }

    /// The zone apex.
    pub fn zone(&self) -> &Name {
        &self.zone
    }

    /// Resolve `question` for a client at `src`.
    pub fn resolve(&self, question: Option<&Question>, src: Option<IpAddr>) -> Resolution {
        let resolution = match question {
            Some(question) => self.resolve_question(question, src),
            None => {
                debug!(zone = %self.zone_key, "query without question");
                Resolution::ServFail
            }
        };

        if let Some(rcode) = resolution.response_code() {
            metrics::record_request(&self.zone_key, rcode);
        }
        resolution
    }

    fn resolve_question(&self, question: &Question, src: Option<IpAddr>) -> Resolution {
        let name = question.name.to_lowercase();
        let query_type = question.query_type;

        let Some(target) = self.target(&name) else {
            trace!(name = %name, "out of zone, passing through");
            return Resolution::Passthrough;
        };

        let snapshot = self.cache.snapshot();
        let allowed = match snapshot.as_deref() {
            Some(snapshot) => snapshot.allows(src),
            None => !self.strict_start,
        };
        if !allowed {
            warn!(name = %name, query_type = %query_type, src = ?src, "REFUSED query");
            metrics::record_refused(&self.zone_key);
            return Resolution::Refused;
        }

        if query_type == RecordType::TXT && target.owner == self.dns_sd {
            if let Some(search_domain) = &self.search_domain {
                let txt = TXT::new(vec![format!("path={search_domain}")]);
                return Resolution::Answer(vec![self.record(&target.owner, RData::TXT(txt))]);
            }
        }

        let serial = snapshot.as_deref().map_or(0, |s| s.serial);
        let answers = self.answers(snapshot.as_deref(), &target, query_type, serial);
        if !answers.is_empty() {
            debug!(
                name = %target.owner,
                query_type = %query_type,
                count = answers.len(),
                "answering"
            );
            return Resolution::Answer(answers);
        }

        let known = target.key == self.zone_key
            || snapshot
                .as_deref()
                .is_some_and(|s| s.records.contains_name(&target.key));
        if known {
            debug!(name = %target.owner, query_type = %query_type, "NODATA");
            Resolution::NoData
        } else if target.rewritten {
            debug!(name = %name, "bare name not found, passing through");
            Resolution::Passthrough
        } else {
            debug!(name = %target.owner, "NXDOMAIN");
            Resolution::NxDomain(self.soa_record(serial))
        }
    }

    /// Map `name` into the zone, rewriting bare names when enabled.
    fn target(&self, name: &Name) -> Option<Target> {
        if self.zone.zone_of(name) {
            return Some(Target {
                key: name.to_ascii(),
                owner: name.clone(),
                rewritten: false,
            });
        }

        if self.allow_short_names && name.num_labels() == 1 && !name.is_wildcard() {
            let owner = name.clone().append_domain(&self.zone).ok()?;
            return Some(Target {
                key: owner.to_ascii(),
                owner,
                rewritten: true,
            });
        }

        None
    }

    fn answers(
        &self,
        snapshot: Option<&Snapshot>,
        target: &Target,
        query_type: RecordType,
        serial: u32,
    ) -> Vec<Record> {
        let Some(snapshot) = snapshot else {
            return Vec::new();
        };
        let a = || {
            snapshot
                .records
                .a(&target.key)
                .iter()
                .map(|ip| self.record(&target.owner, RData::A(A::from(*ip))))
        };
        let aaaa = || {
            snapshot
                .records
                .aaaa(&target.key)
                .iter()
                .map(|ip| self.record(&target.owner, RData::AAAA(AAAA::from(*ip))))
        };

        match query_type {
            RecordType::A => a().collect(),
            RecordType::AAAA => aaaa().collect(),
            RecordType::ANY => a().chain(aaaa()).collect(),
            RecordType::SOA if target.key == self.zone_key => vec![self.soa_record(serial)],
            _ => Vec::new(),
        }
    }

    /// The zone SOA carrying `serial`.
    pub fn soa_record(&self, serial: u32) -> Record {
        let soa = SOA::new(
            self.mname.clone(),
            self.rname.clone(),
            serial,
            SOA_REFRESH,
            SOA_RETRY,
            SOA_EXPIRE,
            self.ttl,
        );
        self.record(&self.zone, RData::SOA(soa))
    }

    /// The zone SOA with the cache's current serial.
    pub fn current_soa(&self) -> Record {
        self.soa_record(self.cache.serial())
    }

    /// NS record naming the SOA primary.
    pub fn ns_record(&self) -> Record {
        self.record(&self.zone, RData::NS(NS(self.mname.clone())))
    }

    fn record(&self, owner: &Name, rdata: RData) -> Record {
        let mut record = Record::from_rdata(owner.clone(), self.ttl, rdata);
        record.set_dns_class(DNSClass::IN);
        record
    }
}
