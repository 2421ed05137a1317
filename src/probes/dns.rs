//! DNS probe
//!
//! The resolver server is part of every call instead of a process-wide
//! setting, so concurrent monitors pointing at different servers never see
//! each other's choice.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::proto::rr::{RData, Record, RecordType};
use serde::Serialize;
use tracing::{debug, trace, warn};

use super::ProbeError;

const DEFAULT_DNS_PORT: u16 = 53;

/// Record types the DNS probe knows how to query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DnsRecordType {
    A,
    Aaaa,
    Soa,
    Cname,
}

impl FromStr for DnsRecordType {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(DnsRecordType::A),
            "AAAA" => Ok(DnsRecordType::Aaaa),
            "SOA" => Ok(DnsRecordType::Soa),
            "CNAME" => Ok(DnsRecordType::Cname),
            other => Err(ProbeError::InvalidConfig(format!(
                "unsupported record type: {other}"
            ))),
        }
    }
}

impl fmt::Display for DnsRecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DnsRecordType::A => "A",
            DnsRecordType::Aaaa => "AAAA",
            DnsRecordType::Soa => "SOA",
            DnsRecordType::Cname => "CNAME",
        })
    }
}

impl From<DnsRecordType> for RecordType {
    fn from(record_type: DnsRecordType) -> Self {
        match record_type {
            DnsRecordType::A => RecordType::A,
            DnsRecordType::Aaaa => RecordType::AAAA,
            DnsRecordType::Soa => RecordType::SOA,
            DnsRecordType::Cname => RecordType::CNAME,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressRecord {
    pub address: IpAddr,
    pub ttl: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SoaRecord {
    pub nsname: String,
    pub hostmaster: String,
    pub serial: u32,
    pub refresh: i32,
    pub retry: i32,
    pub expire: i32,
    pub minttl: u32,
}

/// Resolved records, shaped by record type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DnsRecords {
    /// A / AAAA answers with their TTLs
    Addresses(Vec<AddressRecord>),

    /// CNAME targets
    Names(Vec<String>),

    Soa(SoaRecord),
}

/// Normalized DNS probe result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsReport {
    pub record_type: String,
    pub domain: String,

    /// Server used for the lookup, `"default"` for the system resolver
    pub server: String,
    pub records: DnsRecords,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostmaster: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<u32>,
}

/// Record-type-dispatched DNS resolution
#[async_trait]
pub trait DnsResolver: Send + Sync {
    /// Resolve `domain`, against `server` when given, otherwise the default resolver
    async fn resolve(
        &self,
        record_type: DnsRecordType,
        domain: &str,
        server: Option<SocketAddr>,
    ) -> Result<DnsRecords, ProbeError>;
}

/// Run one DNS check and normalize the answer
pub(crate) async fn probe(
    resolver: &dyn DnsResolver,
    record_type: &str,
    domain: &str,
    server: Option<&str>,
) -> Result<DnsReport, ProbeError> {
    let parsed_type: DnsRecordType = record_type.parse()?;
    let server_addr = server.map(parse_server).transpose()?;

    debug!(
        "resolving {parsed_type} for {domain} using server {}",
        server.unwrap_or("default")
    );

    let records = resolver.resolve(parsed_type, domain, server_addr).await?;

    let (hostmaster, serial) = match &records {
        DnsRecords::Soa(soa) => (Some(soa.hostmaster.clone()), Some(soa.serial)),
        _ => (None, None),
    };

    let report = DnsReport {
        record_type: parsed_type.to_string(),
        domain: domain.to_string(),
        server: server.unwrap_or("default").to_string(),
        records,
        hostmaster,
        serial,
    };
    trace!("DNS result: {report:?}");
    Ok(report)
}

/// Accepts `ip` or `ip:port` (`[v6]:port` for IPv6)
pub fn parse_server(server: &str) -> Result<SocketAddr, ProbeError> {
    let server = server.trim();
    if let Ok(addr) = server.parse::<SocketAddr>() {
        return Ok(addr);
    }
    server
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, DEFAULT_DNS_PORT))
        .map_err(|_| ProbeError::InvalidConfig(format!("invalid resolver server: {server}")))
}

/// [`DnsResolver`] backed by hickory
///
/// Lookups without a server go through the system configuration. Each override
/// server gets its own resolver, built on first use and then reused.
pub struct HickoryResolver {
    default: TokioAsyncResolver,
    overrides: Mutex<HashMap<SocketAddr, TokioAsyncResolver>>,
}

impl HickoryResolver {
    pub fn from_system() -> Self {
        let default = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            warn!("failed to read system resolver configuration, using defaults: {e}");
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });

        Self {
            default,
            overrides: Mutex::new(HashMap::new()),
        }
    }

    fn resolver_for(&self, server: Option<SocketAddr>) -> TokioAsyncResolver {
        let Some(addr) = server else {
            return self.default.clone();
        };

        let mut overrides = self.overrides.lock().unwrap_or_else(PoisonError::into_inner);
        overrides
            .entry(addr)
            .or_insert_with(|| {
                trace!("creating resolver for {addr}");
                let group = NameServerConfigGroup::from_ips_clear(&[addr.ip()], addr.port(), true);
                TokioAsyncResolver::tokio(
                    ResolverConfig::from_parts(None, vec![], group),
                    ResolverOpts::default(),
                )
            })
            .clone()
    }
}

#[async_trait]
impl DnsResolver for HickoryResolver {
    async fn resolve(
        &self,
        record_type: DnsRecordType,
        domain: &str,
        server: Option<SocketAddr>,
    ) -> Result<DnsRecords, ProbeError> {
        let resolver = self.resolver_for(server);
        let lookup = resolver
            .lookup(domain, record_type.into())
            .await
            .map_err(|e| ProbeError::Lookup(e.to_string()))?;

        collect_records(record_type, lookup.record_iter())
    }
}

/// Keep the answers matching the queried type (lookups may carry CNAME chains)
fn collect_records<'a>(
    record_type: DnsRecordType,
    records: impl Iterator<Item = &'a Record>,
) -> Result<DnsRecords, ProbeError> {
    let mut addresses = Vec::new();
    let mut names = Vec::new();

    for record in records {
        let ttl = record.ttl();
        match (record_type, record.data()) {
            (DnsRecordType::A, Some(RData::A(a))) => addresses.push(AddressRecord {
                address: IpAddr::V4(a.0),
                ttl,
            }),
            (DnsRecordType::Aaaa, Some(RData::AAAA(aaaa))) => addresses.push(AddressRecord {
                address: IpAddr::V6(aaaa.0),
                ttl,
            }),
            (DnsRecordType::Cname, Some(RData::CNAME(cname))) => names.push(cname.0.to_string()),
            (DnsRecordType::Soa, Some(RData::SOA(soa))) => {
                return Ok(DnsRecords::Soa(SoaRecord {
                    nsname: soa.mname().to_string(),
                    hostmaster: soa.rname().to_string(),
                    serial: soa.serial(),
                    refresh: soa.refresh(),
                    retry: soa.retry(),
                    expire: soa.expire(),
                    minttl: soa.minimum(),
                }));
            }
            _ => {}
        }
    }

    match record_type {
        DnsRecordType::A | DnsRecordType::Aaaa => Ok(DnsRecords::Addresses(addresses)),
        DnsRecordType::Cname => Ok(DnsRecords::Names(names)),
        DnsRecordType::Soa => Err(ProbeError::Lookup("no SOA record in answer".to_string())),
    }
}
