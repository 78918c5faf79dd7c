//! Shared test infrastructure for catalog and refresh integration tests.

#![allow(dead_code)]

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{DNSClass, LowerName, Name, RData, RecordSet, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncoder};
use hickory_server::authority::{
    Authority, AuthorityObject, Catalog, LookupControlFlow, LookupError, LookupOptions,
    LookupRecords, MessageRequest, MessageResponse, UpdateResult, ZoneType,
};
use hickory_server::proto::rr::Record;
use hickory_server::proto::xfer::Protocol;
use hickory_server::server::{Request, RequestHandler, RequestInfo, ResponseHandler, ResponseInfo};

use ztnet_dns::allowlist::Allowlist;
use ztnet_dns::authority::ZtnetAuthority;
use ztnet_dns::config::DnsConfig;
use ztnet_dns::resolver::ZoneResolver;
use ztnet_dns::server;
use ztnet_dns::state::{RecordSet as Records, SnapshotCache};

// --- Constants ---

pub const ZONE: &str = "zt.example.com.";

/// Address every query reaching [`NextAuthority`] resolves to.
pub const NEXT_ANSWER: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 53);

// --- TestResponseHandler ---

/// Captures the serialized DNS response for inspection in tests.
///
/// Implements `ResponseHandler` so it can be passed to `Catalog::handle_request()`.
/// The response is serialized via `MessageResponse::destructive_emit()` and stored
/// as raw wire-format bytes, which can then be parsed with `Message::from_vec()`.
#[derive(Clone)]
pub struct TestResponseHandler {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl TestResponseHandler {
    pub fn new() -> Self {
        Self {
            buf: Arc::new(Mutex::new(Vec::with_capacity(512))),
        }
    }

    /// Parse the captured wire bytes into a `Message` for assertions.
    pub fn into_message(self) -> Message {
        let buf = self.buf.lock().unwrap();
        assert!(!buf.is_empty(), "no response was captured");
        Message::from_vec(&buf).expect("failed to parse captured DNS response")
    }
}

#[async_trait]
impl ResponseHandler for TestResponseHandler {
    async fn send_response<'a>(
        &mut self,
        response: MessageResponse<
            '_,
            'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
        >,
    ) -> io::Result<ResponseInfo> {
        let mut buf = self.buf.lock().unwrap();
        buf.clear();
        let mut encoder = BinEncoder::new(&mut *buf);
        encoder.set_max_size(u16::MAX);
        let info = response
            .destructive_emit(&mut encoder)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(info)
    }
}

// --- NextAuthority ---

/// Stand-in for the next handler: answers every A query with [`NEXT_ANSWER`].
pub struct NextAuthority {
    origin: LowerName,
}

impl NextAuthority {
    pub fn new() -> Self {
        Self {
            origin: LowerName::from(Name::root()),
        }
    }
}

#[async_trait]
impl Authority for NextAuthority {
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

    async fn lookup(
        &self,
        _name: &LowerName,
        _rtype: RecordType,
        _lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NoError)))
    }

    async fn search(
        &self,
        request_info: RequestInfo<'_>,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        let name = Name::from(request_info.query.name().clone());
        let mut record_set = RecordSet::new(name.clone(), RecordType::A, 0);
        let mut record = Record::from_rdata(name, 30, RData::A(A::from(NEXT_ANSWER)));
        record.set_dns_class(DNSClass::IN);
        record_set.insert(record, 0);
        LookupControlFlow::Break(Ok(LookupRecords::new(
            lookup_options,
            Arc::new(record_set),
        )))
    }

    async fn get_nsec_records(
        &self,
        _name: &LowerName,
        _lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NoError)))
    }

    async fn update(&self, _update: &MessageRequest) -> UpdateResult<bool> {
        Err(ResponseCode::NotImp)
    }
}

// --- Source addresses ---

/// A source inside the default allowed range.
pub fn allowed_src() -> SocketAddr {
    "10.0.0.5:12345".parse().unwrap()
}

/// A source outside every allowed range.
pub fn disallowed_src() -> SocketAddr {
    "198.51.100.7:12345".parse().unwrap()
}

// --- Config builders ---

pub fn test_dns_config() -> DnsConfig {
    DnsConfig {
        listen_addr: "127.0.0.1:5353".parse().unwrap(),
        zone: ZONE.to_string(),
        ttl: 60,
        strict_start: false,
        search_domain: None,
        allow_short_names: false,
        auto_allow_routes: true,
        allowed_networks: Vec::new(),
        synthesize_rfc4193: false,
        synthesize_6plane: false,
    }
}

pub fn test_dns_config_with_short_names() -> DnsConfig {
    DnsConfig {
        allow_short_names: true,
        ..test_dns_config()
    }
}

// --- Cache builder ---

pub struct TestCacheBuilder {
    records: Records,
    cidrs: Vec<String>,
}

impl TestCacheBuilder {
    /// Starts with `10.0.0.0/24` allowed.
    pub fn new() -> Self {
        Self {
            records: Records::new(),
            cidrs: vec!["10.0.0.0/24".to_string()],
        }
    }

    /// Add an address for `<label>.<zone>`.
    pub fn add(mut self, label: &str, ip: &str) -> Self {
        let ip: IpAddr = ip.parse().unwrap();
        self.records.push(&format!("{label}.{ZONE}"), ip);
        self
    }

    /// Publish once and return the cache.
    pub fn build(self) -> Arc<SnapshotCache> {
        let cache = Arc::new(SnapshotCache::new());
        cache.publish(self.records, Allowlist::new(&self.cidrs).unwrap());
        cache
    }
}

/// The standard fixture: `srv` with one address per family, `v6only` with AAAA only.
pub fn standard_cache() -> Arc<SnapshotCache> {
    TestCacheBuilder::new()
        .add("srv", "10.0.0.2")
        .add("srv", "fd00::2")
        .add("v6only", "fd00::3")
        .build()
}

// --- Query/Request construction ---

/// Build wire-format bytes for a DNS query.
pub fn build_query_bytes(name: &str, record_type: RecordType, id: u16) -> Vec<u8> {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    let mut query = Query::new();
    query.set_name(Name::from_ascii(name).unwrap());
    query.set_query_type(record_type);
    query.set_query_class(DNSClass::IN);
    msg.add_query(query);
    msg.to_vec().unwrap()
}

/// Parse wire bytes into a MessageRequest.
pub fn parse_message_request(bytes: &[u8]) -> MessageRequest {
    let mut decoder = BinDecoder::new(bytes);
    MessageRequest::read(&mut decoder).expect("failed to parse MessageRequest")
}

/// Build a full `Request` with a crafted source address.
pub fn build_request(name: &str, record_type: RecordType, src: SocketAddr, id: u16) -> Request {
    let bytes = build_query_bytes(name, record_type, id);
    let msg = parse_message_request(&bytes);
    Request::new(msg, src, Protocol::Udp)
}

/// Build a Catalog with a ZtnetAuthority and a [`NextAuthority`] behind it.
pub fn build_catalog(config: DnsConfig, cache: Arc<SnapshotCache>) -> Catalog {
    let resolver = ZoneResolver::new(&config, cache).expect("failed to create ZoneResolver");
    let authority: Arc<dyn AuthorityObject> = Arc::new(ZtnetAuthority::new(resolver));
    let next: Arc<dyn AuthorityObject> = Arc::new(NextAuthority::new());
    server::build_catalog(authority, config.allow_short_names, vec![next])
}

// --- Response helpers ---

/// Execute a query through the catalog and return the parsed response.
pub async fn execute_query(
    catalog: &Catalog,
    name: &str,
    record_type: RecordType,
    src: SocketAddr,
    id: u16,
) -> Message {
    let request = build_request(name, record_type, src, id);
    let handler = TestResponseHandler::new();
    catalog.handle_request(&request, handler.clone()).await;
    handler.into_message()
}

/// Extract A addresses from a response.
pub fn extract_a_ips(msg: &Message) -> Vec<Ipv4Addr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(Ipv4Addr::from(*a)),
            _ => None,
        })
        .collect()
}

/// Extract AAAA addresses from a response.
pub fn extract_aaaa_ips(msg: &Message) -> Vec<Ipv6Addr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::AAAA(aaaa) => Some(Ipv6Addr::from(*aaaa)),
            _ => None,
        })
        .collect()
}

/// SOA records in the authority section.
pub fn authority_soas(msg: &Message) -> Vec<&Record> {
    msg.name_servers()
        .iter()
        .filter(|r| r.record_type() == RecordType::SOA)
        .collect()
}

/// Assert response code.
pub fn assert_response_code(msg: &Message, expected: ResponseCode) {
    assert_eq!(
        msg.response_code(),
        expected,
        "expected {:?}, got {:?}",
        expected,
        msg.response_code()
    );
}
