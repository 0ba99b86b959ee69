//! A backend reading services from a hierarchical key/value store.
//!
//! Services are kept as JSON values under keys derived from their domain
//! name by reversing the labels: `www.example.org.` lives at
//! `/skydns/org/example/www`. All keys below a name belong to that name, so
//! a name can have any number of services. A label of `*` or `any` in the
//! queried name matches any label.
//!
//! The store itself is reached through a [`KvClient`]. Identical reads that
//! happen concurrently are collapsed into a single request.

use core::str::FromStr;
use std::boxed::Box;
use std::collections::BTreeMap;
use std::error;
use std::fmt;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::string::String;
use std::vec::Vec;

use bytes::Bytes;
use chrono::Utc;
use domain::base::iana::{Class, Rtype};
use domain::base::{Serial, Ttl};
use domain::rdata::{Aaaa, Cname, Mx, Ns, Ptr, Srv, Txt, A};
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::debug;

use crate::config::DEFAULT_PATH;
use crate::plugin::Zones;
use crate::singleflight::Group;
use crate::stub::{StubFuture, StubSource, StubZone};
use crate::types::{StoredName, StoredRecord, StoredRecordData};

use super::{
    child_name, synthetic_soa, Backend, BackendError, LookupFuture,
};

/// The TTL of records if neither key nor service have one.
const DEFAULT_TTL: u32 = 300;

/// The label below a zone holding its name servers.
const NS_LABELS: [&str; 2] = ["ns", "dns"];

/// The label below a zone holding its stub zones.
const STUB_LABELS: [&str; 2] = ["stub", "dns"];

/// The port of stub zone name servers that don't name one.
const STUB_PORT: u16 = 53;

//------------ KvNode --------------------------------------------------------

/// A leaf of the key/value store.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KvNode {
    pub key: String,
    pub value: String,

    /// The remaining lifetime of the key in seconds if it expires.
    pub ttl: Option<u32>,
}

//------------ KvClient ------------------------------------------------------

/// The future returned by [`KvClient::get`].
pub type KvFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<KvNode>, StoreError>> + Send + 'a>>;

/// Access to a hierarchical key/value store.
pub trait KvClient: Send + Sync {
    /// Reads `key`.
    ///
    /// If `recursive` is true, all leaves below `key` are returned as well.
    /// A key that only has keys below it yields no nodes when read without
    /// `recursive`. If there is neither the key nor anything below it,
    /// returns [`StoreError::KeyNotFound`].
    fn get<'a>(&'a self, key: &'a str, recursive: bool) -> KvFuture<'a>;
}

//------------ MemoryKv ------------------------------------------------------

/// A key/value store kept in memory.
#[derive(Debug, Default)]
pub struct MemoryKv {
    nodes: RwLock<BTreeMap<String, (String, Option<u32>)>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.nodes.write().insert(key.into(), (value.into(), None));
    }

    pub fn set_with_ttl(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
        ttl: u32,
    ) {
        self.nodes
            .write()
            .insert(key.into(), (value.into(), Some(ttl)));
    }

    pub fn delete(&self, key: &str) -> bool {
        self.nodes.write().remove(key).is_some()
    }
}

impl KvClient for MemoryKv {
    fn get<'a>(&'a self, key: &'a str, recursive: bool) -> KvFuture<'a> {
        let nodes = self.nodes.read();
        let dir = format!("{}/", key.trim_end_matches('/'));
        let found: Vec<_> = nodes
            .iter()
            .filter(|(k, _)| {
                k.as_str() == key || (recursive && k.starts_with(&dir))
            })
            .map(|(k, (value, ttl))| KvNode {
                key: k.clone(),
                value: value.clone(),
                ttl: *ttl,
            })
            .collect();
        // A key with only children is a directory. It exists but has no
        // value of its own.
        let res = if !found.is_empty() {
            Ok(found)
        } else if nodes.keys().any(|k| k.starts_with(&dir)) {
            Ok(Vec::new())
        } else {
            Err(StoreError::KeyNotFound)
        };
        Box::pin(async move { res })
    }
}

//------------ Service -------------------------------------------------------

/// A service as stored in a value.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct Service {
    pub host: String,
    pub port: u16,
    pub priority: u16,
    pub weight: u16,
    pub text: String,
    pub mail: bool,
    pub ttl: u32,

    /// Labels to strip from the service's own name to form a target name.
    #[serde(rename = "targetstrip")]
    pub target_strip: usize,
    pub group: String,

    /// The key the service was found under.
    #[serde(skip)]
    pub key: String,
}

impl Service {
    /// Parses a service from a store leaf.
    ///
    /// The TTL becomes the smaller of key and service TTL, ignoring zero
    /// values, or [`DEFAULT_TTL`] if both are zero.
    pub fn from_node(node: &KvNode) -> Result<Self, BackendError> {
        let mut service: Service = serde_json::from_str(&node.value)
            .map_err(|err| {
                BackendError::Malformed(format!("{}: {err}", node.key))
            })?;
        service.key = node.key.clone();
        service.ttl = effective_ttl(node.ttl.unwrap_or(0), service.ttl);
        Ok(service)
    }

    fn host_type(&self) -> HostType {
        match self.host.parse::<IpAddr>() {
            Ok(addr) => HostType::Addr(addr),
            Err(_) => match host_name(&self.host) {
                Ok(name) => HostType::Name(name),
                Err(_) => HostType::Invalid,
            },
        }
    }

    fn ttl(&self) -> Ttl {
        Ttl::from_secs(self.ttl)
    }
}

fn effective_ttl(key_ttl: u32, service_ttl: u32) -> u32 {
    match (key_ttl, service_ttl) {
        (0, 0) => DEFAULT_TTL,
        (0, ttl) | (ttl, 0) => ttl,
        (key, service) => key.min(service),
    }
}

fn host_name(host: &str) -> Result<StoredName, BackendError> {
    if host.is_empty() {
        return Err(BackendError::Malformed("empty host".into()));
    }
    let host = if host.ends_with('.') {
        host.into()
    } else {
        format!("{host}.")
    };
    Ok(StoredName::from_str(&host)?)
}

enum HostType {
    Addr(IpAddr),
    Name(StoredName),
    Invalid,
}

/// Keeps only the services of the first group found.
///
/// Services without a group are always kept.
fn select_group(services: Vec<Service>) -> Vec<Service> {
    let group = match services.iter().find(|serv| !serv.group.is_empty()) {
        Some(serv) => serv.group.clone(),
        None => return services,
    };
    services
        .into_iter()
        .filter(|serv| serv.group.is_empty() || serv.group == group)
        .collect()
}

//------------ Store ---------------------------------------------------------

type Inflight = Group<(String, bool), Result<Vec<KvNode>, StoreError>>;

/// A backend serving services from a key/value store.
pub struct Store<C> {
    client: C,
    prefix: String,
    inflight: Inflight,
}

impl<C: KvClient> Store<C> {
    pub fn new(client: C) -> Self {
        Self::with_prefix(client, DEFAULT_PATH)
    }

    pub fn with_prefix(client: C, prefix: impl Into<String>) -> Self {
        let prefix: String = prefix.into();
        Store {
            client,
            prefix: prefix.trim_matches('/').into(),
            inflight: Group::new(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the key path of a name.
    pub fn path(&self, name: &StoredName) -> String {
        let mut path = format!("/{}", self.prefix);
        for label in labels(name).iter().rev() {
            path.push('/');
            path.push_str(label);
        }
        path
    }

    /// Returns the key to read for a name and whether it had wildcards.
    ///
    /// For a wildcard name this is the path of the closest parent without
    /// wildcard labels.
    fn wildcard_path(&self, name: &StoredName) -> (String, bool) {
        let mut path = format!("/{}", self.prefix);
        for label in labels(name).iter().rev() {
            if label == "*" || label == "any" {
                return (path, true);
            }
            path.push('/');
            path.push_str(label);
        }
        (path, false)
    }

    /// Returns the domain name a key belongs to.
    pub fn domain(&self, key: &str) -> Result<StoredName, BackendError> {
        let rel = key
            .strip_prefix('/')
            .and_then(|key| key.strip_prefix(self.prefix.as_str()))
            .unwrap_or(key);
        let labels: Vec<&str> =
            rel.split('/').filter(|label| !label.is_empty()).collect();
        let mut name: String =
            labels.iter().rev().map(|label| format!("{label}.")).collect();
        if name.is_empty() {
            name.push('.');
        }
        Ok(StoredName::from_str(&name)?)
    }

    async fn get(
        &self,
        key: String,
        recursive: bool,
    ) -> Result<Vec<KvNode>, StoreError> {
        let client = &self.client;
        let read_key = key.clone();
        self.inflight
            .run((key, recursive), || async move {
                client.get(&read_key, recursive).await
            })
            .await
    }

    /// Returns the services for `name`.
    ///
    /// If `exact` is true, only a service stored at the name's own key
    /// qualifies.
    pub async fn services(
        &self,
        name: &StoredName,
        exact: bool,
    ) -> Result<Vec<Service>, BackendError> {
        let (path, star) = self.wildcard_path(name);
        let full_path = self.path(name);
        let nodes = self.get(path, !exact).await?;

        let segments: Vec<&str> = full_path.split('/').collect();
        let mut services = Vec::new();
        'nodes: for node in &nodes {
            if exact && node.key != full_path {
                continue;
            }
            if star {
                let key_parts: Vec<&str> = node.key.split('/').collect();
                if key_parts.len() < segments.len() {
                    continue;
                }
                for (idx, segment) in segments.iter().enumerate() {
                    if *segment == "*" || *segment == "any" {
                        continue;
                    }
                    if key_parts.get(idx) != Some(segment) {
                        continue 'nodes;
                    }
                }
            }
            services.push(Service::from_node(node)?);
        }
        Ok(select_group(services))
    }

    /// Returns the name a service's target is known by.
    ///
    /// This is the service's own name with `targetstrip` labels removed
    /// from the left.
    fn target_name(&self, serv: &Service) -> Result<StoredName, BackendError> {
        let mut target = self.domain(&serv.key)?;
        for _ in 0..serv.target_strip {
            match target.parent() {
                Some(parent) => target = parent,
                None => break,
            }
        }
        Ok(target)
    }

    async fn address(
        &self,
        qname: &StoredName,
        qtype: Rtype,
    ) -> Result<Vec<StoredRecord>, BackendError> {
        let mut records = Vec::new();
        for serv in self.services(qname, false).await? {
            let data: StoredRecordData = match serv.host_type() {
                HostType::Addr(IpAddr::V4(addr)) if qtype == Rtype::A => {
                    A::new(addr).into()
                }
                HostType::Addr(IpAddr::V6(addr)) if qtype == Rtype::AAAA => {
                    Aaaa::new(addr).into()
                }
                HostType::Name(target) if &target != qname => {
                    Cname::new(target).into()
                }
                _ => continue,
            };
            records.push(record(qname.clone(), serv.ttl(), data));
        }
        Ok(records)
    }

    async fn txt(
        &self,
        qname: &StoredName,
    ) -> Result<Vec<StoredRecord>, BackendError> {
        let mut records = Vec::new();
        for serv in self.services(qname, false).await? {
            if serv.text.is_empty() {
                continue;
            }
            let txt = Txt::<Bytes>::build_from_slice(serv.text.as_bytes())
                .map_err(|_| {
                    BackendError::Malformed(format!("{}: text", serv.key))
                })?;
            records.push(record(qname.clone(), serv.ttl(), txt.into()));
        }
        Ok(records)
    }

    async fn cname(
        &self,
        qname: &StoredName,
    ) -> Result<Vec<StoredRecord>, BackendError> {
        let services = self.services(qname, true).await?;
        let Some(serv) = services.first() else {
            return Ok(Vec::new());
        };
        match serv.host_type() {
            HostType::Name(target) => Ok(vec![record(
                qname.clone(),
                serv.ttl(),
                Cname::new(target).into(),
            )]),
            _ => Ok(Vec::new()),
        }
    }

    async fn srv(
        &self,
        qname: &StoredName,
    ) -> Result<Vec<StoredRecord>, BackendError> {
        let services: Vec<_> = self
            .services(qname, false)
            .await?
            .into_iter()
            .filter(|serv| serv.port != 0)
            .collect();

        // Weights are spread over 100 within each priority.
        let mut totals: BTreeMap<u16, u32> = BTreeMap::new();
        for serv in &services {
            *totals.entry(serv.priority).or_default() += srv_weight(serv);
        }

        let mut records = Vec::new();
        for serv in &services {
            let total = totals.get(&serv.priority).copied().unwrap_or(1);
            let weight = (100 * srv_weight(serv) / total.max(1)) as u16;
            let target = match serv.host_type() {
                HostType::Name(name) => name,
                HostType::Addr(_) => self.target_name(serv)?,
                HostType::Invalid => continue,
            };
            let srv = Srv::new(serv.priority, weight, serv.port, target);
            records.push(record(qname.clone(), serv.ttl(), srv.into()));
        }
        Ok(records)
    }

    async fn mx(
        &self,
        qname: &StoredName,
    ) -> Result<Vec<StoredRecord>, BackendError> {
        let mut records = Vec::new();
        for serv in self.services(qname, false).await? {
            if !serv.mail {
                continue;
            }
            let exchange = match serv.host_type() {
                HostType::Name(name) => name,
                HostType::Addr(_) => self.target_name(&serv)?,
                HostType::Invalid => continue,
            };
            let mx = Mx::new(serv.priority, exchange);
            records.push(record(qname.clone(), serv.ttl(), mx.into()));
        }
        Ok(records)
    }

    async fn ns(
        &self,
        zone: &StoredName,
    ) -> Result<Vec<StoredRecord>, BackendError> {
        let ns_name = child_name(&NS_LABELS, zone)?;
        let mut records = Vec::new();
        for serv in self.services(&ns_name, false).await? {
            if let HostType::Invalid = serv.host_type() {
                continue;
            }
            let target = self.domain(&serv.key)?;
            let ns = Ns::new(target);
            records.push(record(zone.clone(), serv.ttl(), ns.into()));
        }
        Ok(records)
    }

    fn soa(&self, zone: &StoredName) -> Result<StoredRecord, BackendError> {
        synthetic_soa(zone, Serial(Utc::now().timestamp() as u32))
    }

    async fn ptr(
        &self,
        qname: &StoredName,
    ) -> Result<Vec<StoredRecord>, BackendError> {
        let mut records = Vec::new();
        for serv in self.services(qname, true).await? {
            if let HostType::Name(target) = serv.host_type() {
                records.push(record(
                    qname.clone(),
                    serv.ttl(),
                    Ptr::new(target).into(),
                ));
            }
        }
        Ok(records)
    }

    async fn find(
        &self,
        zone: &StoredName,
        qname: &StoredName,
        qtype: Rtype,
    ) -> Result<Vec<StoredRecord>, BackendError> {
        match qtype {
            Rtype::A | Rtype::AAAA => self.address(qname, qtype).await,
            Rtype::TXT => self.txt(qname).await,
            Rtype::CNAME => self.cname(qname).await,
            Rtype::SRV => self.srv(qname).await,
            Rtype::MX => self.mx(qname).await,
            Rtype::PTR => self.ptr(qname).await,
            Rtype::NS if qname == zone => self.ns(zone).await,
            Rtype::SOA if qname == zone => Ok(vec![self.soa(zone)?]),
            _ => self.services(qname, false).await.map(|_| Vec::new()),
        }
    }
}

fn srv_weight(serv: &Service) -> u32 {
    match serv.weight {
        0 => 100,
        weight => u32::from(weight),
    }
}

fn record(owner: StoredName, ttl: Ttl, data: StoredRecordData) -> StoredRecord {
    StoredRecord::new(owner, Class::IN, ttl, data)
}

fn labels(name: &StoredName) -> Vec<String> {
    name.iter()
        .filter(|label| !label.is_root())
        .map(|label| label.to_string().to_ascii_lowercase())
        .collect()
}

//--- Backend

impl<C: KvClient> Backend for Store<C> {
    fn lookup<'a>(
        &'a self,
        zone: &'a StoredName,
        qname: &'a StoredName,
        qtype: Rtype,
    ) -> LookupFuture<'a> {
        Box::pin(self.find(zone, qname, qtype))
    }

    fn reverse<'a>(
        &'a self,
        _zone: &'a StoredName,
        qname: &'a StoredName,
    ) -> LookupFuture<'a> {
        Box::pin(self.ptr(qname))
    }
}

//--- StubSource

impl<C: KvClient> StubSource for Store<C> {
    fn stub_zones<'a>(&'a self, zones: &'a Zones) -> StubFuture<'a> {
        Box::pin(async move {
            let mut found: BTreeMap<StoredName, Vec<SocketAddr>> =
                BTreeMap::new();
            for zone in zones {
                let stub_name = child_name(&STUB_LABELS, zone)?;
                let services = match self.services(&stub_name, false).await {
                    Ok(services) => services,
                    Err(BackendError::NameError) => continue,
                    Err(err) => return Err(err),
                };
                for serv in services {
                    let addr = match serv.host_type() {
                        HostType::Addr(addr) => addr,
                        _ => {
                            debug!(
                                "Stub name server {} is not an address",
                                serv.host
                            );
                            continue;
                        }
                    };
                    let port = match serv.port {
                        0 => STUB_PORT,
                        port => port,
                    };
                    // The leftmost label is a placeholder for the server.
                    let Some(stub_zone) = self
                        .domain(&serv.key)?
                        .parent()
                        .and_then(|name| strip_zone(&name, &stub_name))
                    else {
                        continue;
                    };
                    found
                        .entry(stub_zone)
                        .or_default()
                        .push(SocketAddr::new(addr, port));
                }
            }
            Ok(found
                .into_iter()
                .map(|(zone, upstreams)| StubZone { zone, upstreams })
                .collect())
        })
    }
}

/// Removes `suffix` from `name`, turning the remainder into an absolute name.
fn strip_zone(name: &StoredName, suffix: &StoredName) -> Option<StoredName> {
    if name == suffix || !name.ends_with(suffix) {
        return None;
    }
    let keep = name.label_count() - suffix.label_count();
    let labels: Vec<String> = labels(name).into_iter().take(keep).collect();
    StoredName::from_str(&format!("{}.", labels.join("."))).ok()
}

//------------ StoreError ----------------------------------------------------

/// Reading from the key/value store failed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StoreError {
    /// Neither the key nor anything below it exists.
    KeyNotFound,

    /// The store could not be reached.
    Unavailable(String),
}

//--- From<StoreError>

impl From<StoreError> for BackendError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::KeyNotFound => BackendError::NameError,
            StoreError::Unavailable(reason) => {
                BackendError::Unavailable(reason)
            }
        }
    }
}

//--- Display

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyNotFound => f.write_str("key not found"),
            Self::Unavailable(reason) => {
                write!(f, "store unavailable: {reason}")
            }
        }
    }
}

//--- Error

impl error::Error for StoreError {}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use domain::rdata::ZoneRecordData;
    use rstest::rstest;

    use super::*;

    fn n(s: &str) -> StoredName {
        StoredName::from_str(s).unwrap()
    }

    fn store() -> Store<MemoryKv> {
        let kv = MemoryKv::new();
        kv.set("/skydns/org/example/www/x1", r#"{"host":"10.0.0.1"}"#);
        kv.set("/skydns/org/example/www/x2", r#"{"host":"10.0.0.2","ttl":60}"#);
        kv.set("/skydns/org/example/v6", r#"{"host":"2001:db8::1"}"#);
        kv.set("/skydns/org/example/alias", r#"{"host":"www.example.net"}"#);
        kv.set(
            "/skydns/org/example/txt",
            r#"{"text":"hello world"}"#,
        );
        kv.set(
            "/skydns/org/example/_tcp/_http/web1",
            r#"{"host":"10.0.1.1","port":8080,"weight":30}"#,
        );
        kv.set(
            "/skydns/org/example/_tcp/_http/web2",
            r#"{"host":"web.example.net","port":8080,"weight":10}"#,
        );
        kv.set(
            "/skydns/org/example/mail/mx1",
            r#"{"host":"10.0.2.1","mail":true,"priority":10}"#,
        );
        kv.set("/skydns/org/example/dns/ns/ns1", r#"{"host":"10.0.3.1"}"#);
        kv.set(
            "/skydns/org/example/dns/stub/net/stubbed/ns1",
            r#"{"host":"192.0.2.53","port":5353}"#,
        );
        kv.set(
            "/skydns/org/example/dns/stub/org/example/ns1",
            r#"{"host":"192.0.2.54"}"#,
        );
        kv.set("/skydns/org/example/a/bad", "not json");
        kv.set("/skydns/arpa/in-addr/10/0/0/1", r#"{"host":"www.example.org"}"#);
        Store::new(kv)
    }

    #[rstest]
    #[case(0, 0, 300)]
    #[case(0, 60, 60)]
    #[case(30, 0, 30)]
    #[case(30, 60, 30)]
    #[case(90, 60, 60)]
    fn ttl_rule(#[case] key: u32, #[case] service: u32, #[case] ttl: u32) {
        assert_eq!(effective_ttl(key, service), ttl);
    }

    #[test]
    fn paths_and_domains() {
        let store = store();
        assert_eq!(
            store.path(&n("WWW.example.org.")),
            "/skydns/org/example/www"
        );
        assert_eq!(
            store.wildcard_path(&n("x.*.example.org.")),
            ("/skydns/org/example".to_string(), true)
        );
        assert_eq!(
            store.domain("/skydns/org/example/www/x1").unwrap(),
            n("x1.www.example.org.")
        );
    }

    #[tokio::test]
    async fn address_records() {
        let store = store();
        let zone = n("example.org.");
        let records = store
            .find(&zone, &n("www.example.org."), Rtype::A)
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        let ttls: Vec<_> = records.iter().map(|rr| rr.ttl().as_secs()).collect();
        assert_eq!(ttls, [300, 60]);

        let records = store
            .find(&zone, &n("v6.example.org."), Rtype::AAAA)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        let records = store
            .find(&zone, &n("v6.example.org."), Rtype::A)
            .await
            .unwrap();
        assert!(records.is_empty());

        let records = store
            .find(&zone, &n("alias.example.org."), Rtype::A)
            .await
            .unwrap();
        assert_eq!(records[0].rtype(), Rtype::CNAME);
    }

    #[tokio::test]
    async fn missing_key_is_a_name_error() {
        let store = store();
        let res = store
            .find(&n("example.org."), &n("nope.example.org."), Rtype::A)
            .await;
        assert_eq!(res, Err(BackendError::NameError));
    }

    #[tokio::test]
    async fn directories_exist_for_exact_reads() {
        let kv = MemoryKv::new();
        kv.set("/skydns/org/example/www/x1", r#"{"host":"10.0.0.1"}"#);
        let res = kv.get("/skydns/org/example/www", false).await;
        assert_eq!(res, Ok(vec![]));
        assert_eq!(
            kv.get("/skydns/org/example/nope", false).await,
            Err(StoreError::KeyNotFound)
        );

        let store = Store::new(kv);
        let zone = n("example.org.");
        let www = n("www.example.org.");
        let res = store.find(&zone, &www, Rtype::CNAME).await;
        assert_eq!(res, Ok(vec![]));
        let nope = n("nope.example.org.");
        let res = store.find(&zone, &nope, Rtype::CNAME);
        assert_eq!(res.await, Err(BackendError::NameError));
    }

    #[tokio::test]
    async fn malformed_value_is_not_a_name_error() {
        let store = store();
        let res = store
            .find(&n("example.org."), &n("a.example.org."), Rtype::A)
            .await;
        assert!(matches!(res, Err(BackendError::Malformed(_))));
    }

    #[tokio::test]
    async fn wildcard_names() {
        let store = store();
        let records = store
            .find(&n("example.org."), &n("*.www.example.org."), Rtype::A)
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        let records = store
            .find(&n("example.org."), &n("x1.any.example.org."), Rtype::A)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn srv_records() {
        let store = store();
        let records = store
            .find(&n("example.org."), &n("_http._tcp.example.org."), Rtype::SRV)
            .await
            .unwrap();
        let mut srvs: Vec<_> = records
            .iter()
            .map(|rr| match rr.data() {
                ZoneRecordData::Srv(srv) => {
                    (srv.weight(), srv.port(), srv.target().to_string())
                }
                _ => panic!("not an SRV record"),
            })
            .collect();
        srvs.sort();
        assert_eq!(
            srvs,
            [
                (25, 8080, "web.example.net".to_string()),
                (75, 8080, "web1._http._tcp.example.org".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn mx_ns_and_soa() {
        let store = store();
        let zone = n("example.org.");
        let mx = store.find(&zone, &n("mail.example.org."), Rtype::MX).await;
        assert_eq!(mx.unwrap().len(), 1);

        let ns = store.find(&zone, &zone, Rtype::NS).await.unwrap();
        assert_eq!(ns.len(), 1);
        match ns[0].data() {
            ZoneRecordData::Ns(ns) => {
                assert_eq!(ns.nsdname(), &n("ns1.ns.dns.example.org."))
            }
            _ => panic!("not an NS record"),
        }

        let soa = store.find(&zone, &zone, Rtype::SOA).await.unwrap();
        match soa[0].data() {
            ZoneRecordData::Soa(soa) => {
                assert_eq!(soa.mname(), &n("ns.dns.example.org."));
                assert_eq!(soa.rname(), &n("hostmaster.example.org."));
                assert_eq!(soa.minimum().as_secs(), 60);
            }
            _ => panic!("not an SOA record"),
        }
    }

    #[tokio::test]
    async fn text_and_reverse() {
        let store = store();
        let zone = n("example.org.");
        let txt = store.find(&zone, &n("txt.example.org."), Rtype::TXT).await;
        assert_eq!(txt.unwrap().len(), 1);

        let rev = n("1.0.0.10.in-addr.arpa.");
        let ptr = store.reverse(&n("in-addr.arpa."), &rev).await.unwrap();
        assert_eq!(ptr.len(), 1);
        assert_eq!(ptr[0].rtype(), Rtype::PTR);
    }

    #[tokio::test]
    async fn stub_zones_are_found() {
        let store = store();
        let zones = Zones::from_strs(&["example.org."]).unwrap();
        let stubs = store.stub_zones(&zones).await.unwrap();
        assert_eq!(
            stubs,
            [
                StubZone {
                    zone: n("stubbed.net."),
                    upstreams: vec!["192.0.2.53:5353".parse().unwrap()],
                },
                StubZone {
                    zone: n("example.org."),
                    upstreams: vec!["192.0.2.54:53".parse().unwrap()],
                },
            ]
        );
    }

    #[rstest]
    #[case(&[("a", "x"), ("b", "")], &["a", "b"])]
    #[case(&[("a", ""), ("b", "x"), ("c", "y"), ("d", "x")], &["a", "b", "d"])]
    #[case(&[("a", ""), ("b", "")], &["a", "b"])]
    fn groups(#[case] services: &[(&str, &str)], #[case] keys: &[&str]) {
        let services = services
            .iter()
            .map(|(key, group)| Service {
                key: key.to_string(),
                group: group.to_string(),
                ..Default::default()
            })
            .collect();
        let selected: Vec<_> = select_group(services)
            .into_iter()
            .map(|serv| serv.key)
            .collect();
        assert_eq!(selected, keys);
    }

    /// Counts reads and answers them slowly.
    struct SlowKv(Arc<AtomicUsize>);

    impl KvClient for SlowKv {
        fn get<'a>(&'a self, _key: &'a str, _recursive: bool) -> KvFuture<'a> {
            Box::pin(async move {
                self.0.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(vec![KvNode {
                    key: "/skydns/org/example/www".into(),
                    value: r#"{"host":"10.0.0.1"}"#.into(),
                    ttl: None,
                }])
            })
        }
    }

    #[tokio::test]
    async fn concurrent_reads_are_collapsed() {
        let reads = Arc::new(AtomicUsize::new(0));
        let store = Store::new(SlowKv(reads.clone()));
        let zone = n("example.org.");
        let qname = n("www.example.org.");
        let (a, b) = tokio::join!(
            store.find(&zone, &qname, Rtype::A),
            store.find(&zone, &qname, Rtype::A),
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(reads.load(Ordering::SeqCst), 1);
    }
}
