//! Shared test infrastructure for handler-level integration tests.

#![allow(dead_code)]

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hickory_proto::op::{Header, Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncoder};
use hickory_server::authority::{MessageRequest, MessageResponse, MessageResponseBuilder};
use hickory_server::proto::xfer::Protocol;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};

use hostport_dns::config::DnsConfig;
use hostport_dns::filter::Selector;
use hostport_dns::handler::HostportHandler;
use hostport_dns::index::LiveIndex;
use hostport_dns::instance::{Condition, ConditionStatus, ContainerPort, Instance, Phase};
use hostport_dns::resolver::Resolver;

// --- Constants ---

pub const ZONE: &str = "cluster.local";
pub const LABEL_KEY: &str = "app";
pub const TTL: u32 = 15;

/// Address the stub next handler answers with.
pub const NEXT_MARKER: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 53);

// --- TestResponseHandler ---

/// Captures the serialized DNS response for inspection in tests.
///
/// The response is serialized via `MessageResponse::destructive_emit()` and
/// stored as raw wire-format bytes, parsed back with `Message::from_vec()`.
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

// --- Next handler stub ---

/// Stands in for the next plugin: answers every query with [`NEXT_MARKER`].
pub struct NextHandler;

#[async_trait]
impl RequestHandler for NextHandler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        let info = request.request_info().expect("next handler needs a question");
        let record = Record::from_rdata(
            info.query.original().name().clone(),
            30,
            RData::A(A::from(NEXT_MARKER)),
        );

        let mut header = Header::response_from_request(request.header());
        header.set_response_code(ResponseCode::NoError);
        let response = MessageResponseBuilder::from_message_request(request).build(
            header,
            std::iter::once(&record),
            std::iter::empty(),
            std::iter::empty(),
            std::iter::empty(),
        );

        response_handle
            .send_response(response)
            .await
            .expect("next handler failed to respond")
    }
}

// --- Config and index builders ---

pub fn test_dns_config() -> DnsConfig {
    DnsConfig {
        ttl: TTL,
        label_key: LABEL_KEY.to_string(),
        ..DnsConfig::new(
            "127.0.0.1:5353".parse().unwrap(),
            vec![
                ZONE.to_string(),
                "in-addr.arpa".to_string(),
                "ip6.arpa".to_string(),
            ],
        )
    }
}

/// A running, ready pod labelled `app=<value>`.
pub fn make_instance(namespace: &str, name: &str, value: &str, host_ip: &str) -> Instance {
    Instance {
        namespace: namespace.to_string(),
        name: name.to_string(),
        labels: [(LABEL_KEY.to_string(), value.to_string())].into(),
        host_ip: host_ip.to_string(),
        phase: Phase::Running,
        conditions: vec![Condition {
            kind: "Ready".to_string(),
            status: ConditionStatus::True,
        }],
        deleting: false,
        ports: vec![ContainerPort {
            container_port: 8080,
            host_port: Some(18080),
        }],
    }
}

/// A synced index over `instances` using the selection rules of `config`.
pub fn build_index(config: &DnsConfig, instances: Vec<Instance>) -> LiveIndex {
    let index = LiveIndex::new(Selector::from_config(config));
    index.replace_all(instances);
    index.mark_synced();
    index
}

/// Handler over `index` delegating to [`NextHandler`].
pub fn build_handler(config: &DnsConfig, index: &LiveIndex) -> HostportHandler<NextHandler> {
    let resolver = Resolver::from_config(config, Arc::new(index.clone()))
        .expect("failed to create Resolver");
    HostportHandler::with_next(Arc::new(resolver), NextHandler)
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

pub fn client_addr() -> SocketAddr {
    "10.0.0.1:12345".parse().unwrap()
}

/// Build a full `Request` for a single question.
pub fn build_request(name: &str, record_type: RecordType, id: u16) -> Request {
    let bytes = build_query_bytes(name, record_type, id);
    Request::new(parse_message_request(&bytes), client_addr(), Protocol::Udp)
}

/// Execute a query through `handler` and return the parsed response.
pub async fn execute_query<H: RequestHandler>(
    handler: &H,
    name: &str,
    record_type: RecordType,
    id: u16,
) -> Message {
    let request = build_request(name, record_type, id);
    execute_request(handler, &request).await
}

/// Execute a prepared request through `handler` and return the parsed response.
pub async fn execute_request<H: RequestHandler>(handler: &H, request: &Request) -> Message {
    let response = TestResponseHandler::new();
    handler.handle_request(request, response.clone()).await;
    response.into_message()
}

// --- Response helpers ---

pub fn extract_a_ips(msg: &Message) -> Vec<Ipv4Addr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(Ipv4Addr::from(*a)),
            _ => None,
        })
        .collect()
}

pub fn extract_aaaa_ips(msg: &Message) -> Vec<Ipv6Addr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::AAAA(aaaa) => Some(Ipv6Addr::from(*aaaa)),
            _ => None,
        })
        .collect()
}

pub fn extract_ptr_names(msg: &Message) -> Vec<String> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::PTR(ptr) => Some(ptr.0.to_string()),
            _ => None,
        })
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

/// Assert a single SOA for the first zone in the authority section.
pub fn assert_soa_authority(msg: &Message) {
    let authority = msg.name_servers();
    assert_eq!(authority.len(), 1, "expected exactly one authority record");
    assert_eq!(authority[0].record_type(), RecordType::SOA);
    assert_eq!(authority[0].name().to_string(), format!("{ZONE}."));
}

/// Assert the answer came from the stub next handler.
pub fn assert_from_next(msg: &Message) {
    assert_response_code(msg, ResponseCode::NoError);
    assert_eq!(extract_a_ips(msg), vec![NEXT_MARKER]);
}
