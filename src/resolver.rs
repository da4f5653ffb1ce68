//! Query resolution against the live index.
//!
//! ```text
//! svc1.ns1.cluster.local. A
//!   → longest configured zone: cluster.local.
//!   → label key: svc1.ns1
//!   → running instances under that key with an IPv4 host address
//!   → A records, TTL from config, owner name in the query's letter case
//!
//! 5.0.0.10.in-addr.arpa. PTR
//!   → reverse key: 10.0.0.5
//!   → PTR <labelValue>.<namespace>.<first zone> per matching instance
//! ```

use hickory_proto::op::{Query, ResponseCode};
use hickory_proto::rr::rdata::{A, AAAA, PTR, SOA};
use hickory_proto::rr::{DNSClass, LowerName, Name, RData, Record, RecordType};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, trace, warn};

use crate::config::{parse_zones, DnsConfig};
use crate::error::HostportError;
use crate::filter::Selector;
use crate::index::InstanceIndex;
use crate::instance::Phase;

const SOA_REFRESH: i32 = 7200;
const SOA_RETRY: i32 = 1800;
const SOA_EXPIRE: i32 = 86400;

/// Outcome of resolving a single query.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Not ours: outside every zone or an unsupported type.
    PassThrough,
    /// Ours, nothing found, and fallthrough applies to the name.
    Fallthrough,
    /// An authoritative answer.
    Answer(Answer),
}

/// Authoritative answer content.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    /// Response code to send.
    pub response_code: ResponseCode,
    /// Answer section.
    pub answers: Vec<Record>,
    /// Authority section.
    pub authority: Vec<Record>,
}

/// Names for which negative answers are delegated instead of returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fallthrough {
    zones: Option<Vec<LowerName>>,
}

impl Fallthrough {
    /// Never fall through.
    pub fn disabled() -> Self {
        Self { zones: None }
    }

    /// Fall through for every name.
    pub fn all() -> Self {
        Self {
            zones: Some(Vec::new()),
        }
    }

    /// Fall through for names inside the given zones.
    pub fn zones(zones: Vec<LowerName>) -> Self {
        Self { zones: Some(zones) }
    }

    /// Build from the configured zone list.
    pub fn from_config(zones: Option<&[String]>) -> Result<Self, HostportError> {
        match zones {
            None => Ok(Self::disabled()),
            Some(zones) => Ok(Self::zones(parse_zones(zones)?)),
        }
    }

    /// True if a negative answer for `name` should go to the next handler.
    pub fn through(&self, name: &LowerName) -> bool {
        match &self.zones {
            None => false,
            Some(zones) if zones.is_empty() => true,
            Some(zones) => zones.iter().any(|zone| zone.zone_of(name)),
        }
    }
}

#[derive(Debug, Clone)]
struct Zone {
    name: LowerName,
    text: String,
}

impl Zone {
    fn new(name: LowerName) -> Self {
        let text = ascii(&name);
        Self { name, text }
    }

    fn is_root(&self) -> bool {
        self.text == "."
    }

    /// `<prefix>.<zone>` as a fully qualified name.
    fn join(&self, prefix: &str) -> Result<Name, HostportError> {
        let joined = if self.is_root() {
            format!("{prefix}.")
        } else {
            format!("{prefix}.{}", self.text)
        };
        Ok(Name::from_ascii(joined)?)
    }
}

/// Resolves A, AAAA and PTR queries from an [`InstanceIndex`].
pub struct Resolver {
    zones: Vec<Zone>,
    ttl: u32,
    fallthrough: Fallthrough,
    selector: Selector,
    index: Arc<dyn InstanceIndex>,
}

impl Resolver {
    /// Create a resolver for the given zones.
    pub fn new(
        zones: Vec<LowerName>,
        ttl: u32,
        fallthrough: Fallthrough,
        selector: Selector,
        index: Arc<dyn InstanceIndex>,
    ) -> Result<Self, HostportError> {
        if zones.is_empty() {
            return Err(HostportError::Config("at least one zone is required".into()));
        }
        Ok(Self {
            zones: zones.into_iter().map(Zone::new).collect(),
            ttl,
            fallthrough,
            selector,
            index,
        })
    }

    /// Create a resolver from a validated configuration.
    pub fn from_config(
        config: &DnsConfig,
        index: Arc<dyn InstanceIndex>,
    ) -> Result<Self, HostportError> {
        config.validate()?;
        Self::new(
            config.zone_names()?,
            config.ttl,
            Fallthrough::from_config(config.fallthrough.as_deref())?,
            Selector::from_config(config),
            index,
        )
    }

    /// Configured TTL.
    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    /// Resolve one query. The query name keeps its original letter case.
    ///
    /// Errors are server failures for this query only.
    pub fn resolve(&self, query: &Query) -> Result<Resolution, HostportError> {
        let qtype = query.query_type();
        let mut fqdn = query.name().clone();
        fqdn.set_fqdn(true);
        let qname = LowerName::from(fqdn);

        let Some(zone) = self.find_zone(&qname) else {
            trace!(name = %qname, "outside configured zones");
            return Ok(Resolution::PassThrough);
        };
        if !Self::supported(qtype) {
            trace!(name = %qname, rtype = ?qtype, "unsupported record type");
            return Ok(Resolution::PassThrough);
        }

        if qname == zone.name {
            debug!(zone = %zone.text, "apex query");
            return Ok(Resolution::Answer(Answer {
                response_code: ResponseCode::NoError,
                answers: Vec::new(),
                authority: vec![self.soa()?],
            }));
        }

        if qtype == RecordType::PTR {
            if let Some(addr) = address_from_reverse(&qname) {
                return self.resolve_reverse(query, &qname, addr);
            }
            trace!(name = %qname, "PTR query is not a full reverse name");
        }

        self.resolve_forward(query, &qname, zone)
    }

    fn supported(qtype: RecordType) -> bool {
        matches!(qtype, RecordType::A | RecordType::AAAA | RecordType::PTR)
    }

    fn find_zone(&self, qname: &LowerName) -> Option<&Zone> {
        self.zones
            .iter()
            .filter(|zone| zone.name.zone_of(qname))
            .max_by_key(|zone| zone.text.len())
    }

    fn resolve_reverse(
        &self,
        query: &Query,
        qname: &LowerName,
        addr: IpAddr,
    ) -> Result<Resolution, HostportError> {
        let key = addr.to_string();
        let instances = self.index.by_reverse_key(&key)?;
        if instances.is_empty() {
            debug!(name = %qname, address = %key, "PTR lookup: no instances");
            return self.negative(qname);
        }

        let first_zone = &self.zones[0];
        let mut answers = Vec::with_capacity(instances.len());
        for instance in &instances {
            let Some(label) = self.selector.label_name(instance) else {
                continue;
            };
            match first_zone.join(&label) {
                Ok(target) => answers.push(self.record(query.name(), RData::PTR(PTR(target)))),
                Err(e) => {
                    warn!(instance = %instance.id(), label = %label, "cannot form PTR target: {}", e)
                }
            }
        }

        debug!(name = %qname, count = answers.len(), "PTR lookup: returning records");
        Ok(Self::success(answers))
    }

    fn resolve_forward(
        &self,
        query: &Query,
        qname: &LowerName,
        zone: &Zone,
    ) -> Result<Resolution, HostportError> {
        let key = Self::label_key(qname, zone);
        let instances = self.index.by_label_key(&key)?;
        if instances.is_empty() {
            debug!(name = %qname, key = %key, "lookup: no instances");
            return self.negative(qname);
        }

        let qtype = query.query_type();
        let mut answers = Vec::new();
        for instance in &instances {
            if instance.phase != Phase::Running {
                continue;
            }

            let rdata = match qtype {
                RecordType::A if !instance.is_ipv6_host() => instance
                    .host_ip
                    .parse::<Ipv4Addr>()
                    .ok()
                    .map(|ip| RData::A(A::from(ip))),
                RecordType::AAAA if instance.is_ipv6_host() => instance
                    .host_ip
                    .parse::<Ipv6Addr>()
                    .ok()
                    .map(|ip| RData::AAAA(AAAA::from(ip))),
                _ => None,
            };

            if let Some(rdata) = rdata {
                answers.push(self.record(query.name(), rdata));
            }
        }

        debug!(name = %qname, rtype = ?qtype, count = answers.len(), "lookup: returning records");
        Ok(Self::success(answers))
    }

    /// Query name with the zone and its separating dot removed.
    fn label_key(qname: &LowerName, zone: &Zone) -> String {
        let name = ascii(qname);
        let prefix = &name[..name.len() - zone.text.len()];
        if zone.is_root() {
            prefix.to_string()
        } else {
            prefix.strip_suffix('.').unwrap_or(prefix).to_string()
        }
    }

    fn negative(&self, qname: &LowerName) -> Result<Resolution, HostportError> {
        if self.fallthrough.through(qname) {
            return Ok(Resolution::Fallthrough);
        }
        Ok(Resolution::Answer(Answer {
            response_code: ResponseCode::NXDomain,
            answers: Vec::new(),
            authority: vec![self.soa()?],
        }))
    }

    fn success(answers: Vec<Record>) -> Resolution {
        Resolution::Answer(Answer {
            response_code: ResponseCode::NoError,
            answers,
            authority: Vec::new(),
        })
    }

    fn record(&self, name: &Name, rdata: RData) -> Record {
        let mut record = Record::from_rdata(name.clone(), self.ttl, rdata);
        record.set_dns_class(DNSClass::IN);
        record
    }

    /// SOA of the first configured zone.
    fn soa(&self) -> Result<Record, HostportError> {
        let zone = &self.zones[0];
        let serial = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or_default();

        let soa = SOA::new(
            zone.join("ns.dns")?,
            zone.join("hostmaster.dns")?,
            serial,
            SOA_REFRESH,
            SOA_RETRY,
            SOA_EXPIRE,
            self.ttl,
        );

        Ok(self.record(&Name::from(zone.name.clone()), RData::SOA(soa)))
    }
}

/// Fully qualified presentation form with IDN labels kept in `xn--` form.
fn ascii(name: &LowerName) -> String {
    Name::from(name.clone()).to_ascii()
}

/// Decimal octet without sign or leading zeros.
fn octet(label: &str) -> Option<u8> {
    if label.is_empty() || !label.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if label.len() > 1 && label.starts_with('0') {
        return None;
    }
    label.parse().ok()
}

/// Address encoded by a full `in-addr.arpa.` or `ip6.arpa.` name.
///
/// Partial reverse names (whole networks) yield `None`.
pub fn address_from_reverse(name: &LowerName) -> Option<IpAddr> {
    let text = ascii(name);
    let text = text.strip_suffix('.').unwrap_or(&text);

    if let Some(rest) = text.strip_suffix(".in-addr.arpa") {
        let labels: Vec<&str> = rest.split('.').collect();
        if labels.len() != 4 {
            return None;
        }
        let mut octets = [0u8; 4];
        for (octet, label) in octets.iter_mut().zip(labels.iter().rev()) {
            *octet = self::octet(label)?;
        }
        return Some(IpAddr::V4(Ipv4Addr::from(octets)));
    }

    if let Some(rest) = text.strip_suffix(".ip6.arpa") {
        let labels: Vec<&str> = rest.split('.').collect();
        if labels.len() != 32 {
            return None;
        }
        let mut bits = 0u128;
        for label in labels.iter().rev() {
            let mut chars = label.chars();
            let (Some(c), None) = (chars.next(), chars.next()) else {
                return None;
            };
            bits = (bits << 4) | u128::from(c.to_digit(16)?);
        }
        return Some(IpAddr::V6(Ipv6Addr::from(bits)));
    }

    None
}
