//! Hickory DNS authority backed by the ZTNET snapshot cache.

use async_trait::async_trait;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::{LowerName, Name, Record, RecordSet, RecordType};
use hickory_server::authority::{
    Authority, LookupControlFlow, LookupError, LookupOptions, LookupRecords, MessageRequest,
    UpdateResult, ZoneType,
};
use hickory_server::server::RequestInfo;
use std::sync::Arc;
use tracing::trace;

use crate::resolver::{Question, Resolution, ZoneResolver};

/// Authority for the ZTNET zone.
///
/// Every query is decided by [`ZoneResolver`]; passthrough is reported as
/// [`LookupControlFlow::Skip`] so the catalog tries the next authority.
pub struct ZtnetAuthority {
    origin: LowerName,
    resolver: ZoneResolver,
}

impl ZtnetAuthority {
    /// Create an authority answering through `resolver`.
    pub fn new(resolver: ZoneResolver) -> Self {
        Self {
            origin: LowerName::new(resolver.zone()),
            resolver,
        }
    }

    fn single(&self, record: Record, lookup_options: LookupOptions) -> LookupRecords {
        let mut record_set = RecordSet::new(record.name().clone(), record.record_type(), 0);
        record_set.insert(record, 0);
        LookupRecords::new(lookup_options, Arc::new(record_set))
    }
}

/// Group answer records into one record set per owner and type, keeping order.
fn into_record_sets(records: Vec<Record>) -> Vec<Arc<RecordSet>> {
    let mut sets: Vec<RecordSet> = Vec::new();
    for record in records {
        let position = sets.iter().position(|set| {
            set.name() == record.name() && set.record_type() == record.record_type()
        });
        let set = match position {
            Some(index) => &mut sets[index],
            None => {
                sets.push(RecordSet::new(record.name().clone(), record.record_type(), 0));
                let last = sets.len() - 1;
                &mut sets[last]
            }
        };
        set.insert(record, 0);
    }
    sets.into_iter().map(Arc::new).collect()
}

fn to_control_flow(
    resolution: Resolution,
    lookup_options: LookupOptions,
) -> LookupControlFlow<LookupRecords> {
    match resolution {
        Resolution::Answer(records) => LookupControlFlow::Break(Ok(LookupRecords::ManyRecords(
            lookup_options,
            into_record_sets(records),
        ))),
        Resolution::NoData => LookupControlFlow::Break(Err(LookupError::NameExists)),
        // The catalog fills the authority section from `lookup(origin, SOA)`.
        Resolution::NxDomain(_) => {
            LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NXDomain)))
        }
        Resolution::Refused => {
            LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::Refused)))
        }
        Resolution::ServFail => {
            LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::ServFail)))
        }
        Resolution::Passthrough => LookupControlFlow::Skip,
    }
}

#[async_trait]
impl Authority for ZtnetAuthority {
    type Lookup = LookupRecords;

    fn zone_type(&self) -> ZoneType {
        ZoneType::Primary
    }

    fn is_axfr_allowed(&self) -> bool {
        false
    }

    fn origin(&self) -> &LowerName {
        &self.origin
    }

    /// Zone metadata lookups used by the catalog when assembling responses.
    async fn lookup(
        &self,
        name: &LowerName,
        rtype: RecordType,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        trace!(name = %name, rtype = ?rtype, "metadata lookup");

        if *name != self.origin {
            return LookupControlFlow::Skip;
        }

        match rtype {
            RecordType::SOA => LookupControlFlow::Break(Ok(
                self.single(self.resolver.current_soa(), lookup_options)
            )),
            RecordType::NS => LookupControlFlow::Break(Ok(
                self.single(self.resolver.ns_record(), lookup_options)
            )),
            _ => LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NoError))),
        }
    }

    async fn search(
        &self,
        request_info: RequestInfo<'_>,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        let question = Question::new(
            Name::from(request_info.query.name().clone()),
            request_info.query.query_type(),
        );
        let resolution = self
            .resolver
            .resolve(Some(&question), Some(request_info.src.ip()));
        to_control_flow(resolution, lookup_options)
    }

    async fn get_nsec_records(
        &self,
        _name: &LowerName,
        _lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        // DNSSEC not supported
        LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NoError)))
    }

    async fn update(&self, _update: &MessageRequest) -> UpdateResult<bool> {
        // Dynamic updates not supported
        Err(ResponseCode::NotImp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allowlist::Allowlist;
    use crate::config::DnsConfig;
    use crate::state::{RecordSet as Records, SnapshotCache};
    use hickory_proto::op::{Header, LowerQuery, Query};
    use hickory_proto::rr::RData;
    use hickory_server::authority::LookupObject;
    use hickory_server::proto::xfer::Protocol;
    use std::net::SocketAddr;

    fn authority() -> ZtnetAuthority {
        let config = DnsConfig {
            listen_addr: "127.0.0.1:5353".parse().unwrap(),
            zone: "zt.example.com".to_string(),
            ttl: 60,
            strict_start: false,
            search_domain: None,
            allow_short_names: true,
            auto_allow_routes: true,
            allowed_networks: Vec::new(),
            synthesize_rfc4193: false,
            synthesize_6plane: false,
        };
        let cache = Arc::new(SnapshotCache::new());
        let mut records = Records::new();
        records.push("srv.zt.example.com.", "10.0.0.2".parse().unwrap());
        records.push("srv.zt.example.com.", "fd00::2".parse().unwrap());
        cache.publish(records, Allowlist::new(&["10.0.0.0/24"]).unwrap());
        ZtnetAuthority::new(ZoneResolver::new(&config, cache).unwrap())
    }

    async fn search(
        authority: &ZtnetAuthority,
        name: &str,
        rtype: RecordType,
        src: &str,
    ) -> LookupControlFlow<LookupRecords> {
        let query = Query::query(Name::from_ascii(name).unwrap(), rtype);
        let lower_query = LowerQuery::from(query);
        let header = Header::new();
        let src: SocketAddr = src.parse().unwrap();
        let info = RequestInfo::new(src, Protocol::Udp, &header, &lower_query);
        authority.search(info, LookupOptions::default()).await
    }

    #[tokio::test]
    async fn test_origin_is_zone() {
        let authority = authority();
        assert_eq!(
            authority.origin(),
            &LowerName::from(Name::from_ascii("zt.example.com.").unwrap())
        );
    }

    #[tokio::test]
    async fn test_search_any_groups_by_type() {
        let authority = authority();
        match search(&authority, "srv.zt.example.com.", RecordType::ANY, "10.0.0.5:5000").await {
            LookupControlFlow::Break(Ok(lookup)) => {
                let types: Vec<RecordType> = lookup.iter().map(|r| r.record_type()).collect();
                assert_eq!(types.len(), 2);
                assert!(types.contains(&RecordType::A));
                assert!(types.contains(&RecordType::AAAA));
            }
            _ => panic!("expected answer"),
        }
    }

    #[tokio::test]
    async fn test_search_refused() {
        let authority = authority();
        let result = search(&authority, "srv.zt.example.com.", RecordType::A, "8.8.8.8:5000").await;
        assert!(matches!(
            result,
            LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::Refused)))
        ));
    }

    #[tokio::test]
    async fn test_search_nxdomain_and_nodata() {
        let authority = authority();
        let result = search(
            &authority,
            "nope.zt.example.com.",
            RecordType::A,
            "10.0.0.5:5000",
        )
        .await;
        assert!(matches!(
            result,
            LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NXDomain)))
        ));

        let result = search(
            &authority,
            "srv.zt.example.com.",
            RecordType::TXT,
            "10.0.0.5:5000",
        )
        .await;
        assert!(matches!(
            result,
            LookupControlFlow::Break(Err(LookupError::NameExists))
        ));
    }

    #[tokio::test]
    async fn test_search_passthrough_is_skip() {
        let authority = authority();
        let result = search(&authority, "example.org.", RecordType::A, "10.0.0.5:5000").await;
        assert!(matches!(result, LookupControlFlow::Skip));

        let result = search(&authority, "unknown.", RecordType::A, "10.0.0.5:5000").await;
        assert!(matches!(result, LookupControlFlow::Skip));
    }

    #[tokio::test]
    async fn test_lookup_soa_carries_serial() {
        let authority = authority();
        let name = LowerName::from(Name::from_ascii("zt.example.com.").unwrap());
        match authority
            .lookup(&name, RecordType::SOA, LookupOptions::default())
            .await
        {
            LookupControlFlow::Break(Ok(lookup)) => {
                let record = lookup.iter().next().expect("soa record");
                match record.data() {
                    RData::SOA(soa) => assert_eq!(soa.serial(), 1),
                    other => panic!("unexpected {other:?}"),
                }
            }
            _ => panic!("expected SOA"),
        }
    }

    #[tokio::test]
    async fn test_lookup_below_apex_skips() {
        let authority = authority();
        let name = LowerName::from(Name::from_ascii("srv.zt.example.com.").unwrap());
        let result = authority
            .lookup(&name, RecordType::A, LookupOptions::default())
            .await;
        assert!(matches!(result, LookupControlFlow::Skip));
    }
}
