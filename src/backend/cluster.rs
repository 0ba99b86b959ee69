//! A backend serving the services of a cluster service registry.
//!
//! The registry is observed through watch events for services and their
//! endpoints which are kept in memory. Records are derived from that state
//! on demand:
//!
//! * a service with a cluster IP gets an address record at
//!   `<svc>.<ns>.<zone>` and an SRV record at `_<port>._<proto>.<svc>.<ns>.<zone>`
//!   for every named port,
//! * a headless service gets an address record for each endpoint at the
//!   service name, one at `<host>.<svc>.<ns>.<zone>`, and an SRV record per
//!   port and endpoint pointing there,
//! * an external-name service becomes a CNAME.
//!
//! Every change moves the epoch forward. It serves as the zone's SOA serial.

use core::str::FromStr;
use std::boxed::Box;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::string::String;
use std::vec::Vec;

use chrono::{DateTime, Utc};
use domain::base::iana::{Class, Rtype};
use domain::base::{Serial, Ttl};
use domain::rdata::{Aaaa, Cname, Ptr, Srv, A};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::transfer::TransferSource;
use crate::types::{StoredName, StoredRecord, StoredRecordData};

use super::{
    child_name, reverse_addr, synthetic_soa, Backend, BackendError,
    LookupFuture,
};

/// The TTL of all derived records.
const DEFAULT_TTL: u32 = 5;

//------------ Registry Objects ----------------------------------------------

/// A port of a service or endpoint.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServicePort {
    pub name: String,
    pub protocol: String,
    pub port: u16,
}

impl ServicePort {
    pub fn new(
        name: impl Into<String>,
        protocol: impl Into<String>,
        port: u16,
    ) -> Self {
        ServicePort {
            name: name.into(),
            protocol: protocol.into(),
            port,
        }
    }
}

/// How a service is reached.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ServiceKind {
    /// Through a single virtual address.
    ClusterIp(IpAddr),

    /// Directly through the addresses of its endpoints.
    Headless,

    /// Through a name outside the cluster.
    ExternalName(String),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServiceObject {
    pub name: String,
    pub namespace: String,
    pub kind: ServiceKind,
    pub ports: Vec<ServicePort>,
}

impl ServiceObject {
    fn key(&self) -> ObjectKey {
        (self.namespace.clone(), self.name.clone())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EndpointAddress {
    pub ip: IpAddr,
    pub hostname: Option<String>,
}

impl EndpointAddress {
    /// Returns the label the endpoint is known by.
    ///
    /// This is its hostname if it has one or else its address with dots
    /// and colons replaced by dashes.
    pub fn label(&self) -> String {
        match self.hostname {
            Some(ref hostname) if !hostname.is_empty() => hostname.clone(),
            _ => self.ip.to_string().replace(['.', ':'], "-"),
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EndpointSubset {
    pub addresses: Vec<EndpointAddress>,
    pub ports: Vec<ServicePort>,
}

/// The endpoints backing the service of the same name and namespace.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EndpointsObject {
    pub name: String,
    pub namespace: String,
    pub subsets: Vec<EndpointSubset>,
}

impl EndpointsObject {
    fn key(&self) -> ObjectKey {
        (self.namespace.clone(), self.name.clone())
    }
}

type ObjectKey = (String, String);

//------------ Events --------------------------------------------------------

/// A change of a watched object.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WatchEvent<T> {
    Added(T),
    Updated { old: T, new: T },
    Deleted(T),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ClusterEvent {
    Service(WatchEvent<ServiceObject>),
    Endpoints(WatchEvent<EndpointsObject>),
}

//------------ Epoch ---------------------------------------------------------

/// The time of the last change.
#[derive(Debug)]
pub struct Epoch {
    changed: RwLock<DateTime<Utc>>,
}

impl Epoch {
    pub fn new() -> Self {
        Epoch {
            changed: RwLock::new(Utc::now()),
        }
    }

    /// Records a change now. The epoch never moves backwards.
    pub fn touch(&self) {
        let now = Utc::now();
        let mut changed = self.changed.write();
        if now > *changed {
            *changed = now;
        }
    }

    pub fn changed(&self) -> DateTime<Utc> {
        *self.changed.read()
    }

    /// Returns the epoch in seconds as used for SOA serials.
    pub fn serial(&self) -> Serial {
        Serial(self.changed().timestamp() as u32)
    }
}

impl Default for Epoch {
    fn default() -> Self {
        Self::new()
    }
}

//------------ Cluster -------------------------------------------------------

#[derive(Debug, Default)]
struct State {
    services: BTreeMap<ObjectKey, ServiceObject>,
    endpoints: BTreeMap<ObjectKey, EndpointsObject>,
}

/// A backend kept current from registry watch events.
#[derive(Debug)]
pub struct Cluster {
    /// The zone reverse lookups produce names in.
    domain: StoredName,
    state: RwLock<State>,
    epoch: Epoch,
    ttl: Ttl,
}

impl Cluster {
    pub fn new(domain: StoredName) -> Self {
        Cluster {
            domain,
            state: Default::default(),
            epoch: Epoch::new(),
            ttl: Ttl::from_secs(DEFAULT_TTL),
        }
    }

    pub fn with_ttl(mut self, ttl: Ttl) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn domain(&self) -> &StoredName {
        &self.domain
    }

    pub fn epoch(&self) -> &Epoch {
        &self.epoch
    }

    /// Applies a watch event.
    pub fn handle(&self, event: ClusterEvent) {
        let mut state = self.state.write();
        match event {
            ClusterEvent::Service(event) => {
                apply(&mut state.services, event, ServiceObject::key)
            }
            ClusterEvent::Endpoints(event) => {
                apply(&mut state.endpoints, event, EndpointsObject::key)
            }
        }
        drop(state);
        self.epoch.touch();
    }

    /// Applies events until the sending side goes away.
    pub async fn run(&self, mut events: mpsc::Receiver<ClusterEvent>) {
        while let Some(event) = events.recv().await {
            trace!("Cluster event: {event:?}");
            self.handle(event);
        }
        debug!("Cluster event stream closed");
    }

    /// Derives all records of `zone` from the current state.
    pub fn records(
        &self,
        zone: &StoredName,
    ) -> Result<Vec<StoredRecord>, BackendError> {
        let state = self.state.read();
        let mut res = Vec::new();
        for svc in state.services.values() {
            let name = service_name(svc, zone)?;
            match svc.kind {
                ServiceKind::ClusterIp(addr) => {
                    res.push(self.record(name.clone(), address(addr)));
                    let ports = svc.ports.iter().filter(|p| !p.name.is_empty());
                    for port in ports {
                        let owner = srv_name(port, &name)?;
                        let srv = Srv::new(0, 100, port.port, name.clone());
                        res.push(self.record(owner, srv.into()));
                    }
                }
                ServiceKind::Headless => {
                    let Some(endpoints) = state.endpoints.get(&svc.key())
                    else {
                        continue;
                    };
                    for subset in &endpoints.subsets {
                        self.endpoint_records(&name, subset, &mut res)?;
                    }
                }
                ServiceKind::ExternalName(ref target) => {
                    let target = if target.ends_with('.') {
                        StoredName::from_str(target)?
                    } else {
                        StoredName::from_str(&format!("{target}."))?
                    };
                    res.push(self.record(name, Cname::new(target).into()));
                }
            }
        }
        Ok(res)
    }

    fn endpoint_records(
        &self,
        name: &StoredName,
        subset: &EndpointSubset,
        res: &mut Vec<StoredRecord>,
    ) -> Result<(), BackendError> {
        for addr in &subset.addresses {
            let host = child_name(&[addr.label().as_str()], name)?;
            res.push(self.record(name.clone(), address(addr.ip)));
            res.push(self.record(host.clone(), address(addr.ip)));
            for port in subset.ports.iter().filter(|p| !p.name.is_empty()) {
                let owner = srv_name(port, name)?;
                let srv = Srv::new(0, 100, port.port, host.clone());
                res.push(self.record(owner, srv.into()));
            }
        }
        Ok(())
    }

    fn record(&self, owner: StoredName, data: StoredRecordData) -> StoredRecord {
        StoredRecord::new(owner, Class::IN, self.ttl, data)
    }

    fn find(
        &self,
        zone: &StoredName,
        qname: &StoredName,
        qtype: Rtype,
    ) -> Result<Vec<StoredRecord>, BackendError> {
        if !qname.ends_with(zone) {
            return Err(BackendError::NameError);
        }
        if qname == zone {
            if qtype != Rtype::SOA {
                return Ok(Vec::new());
            }
            return Ok(vec![synthetic_soa(zone, self.epoch.serial())?]);
        }
        let records = self.records(zone)?;
        let mut exists = false;
        let mut res = Vec::new();
        for record in records {
            if record.owner() == qname {
                exists = true;
                let rtype = record.rtype();
                if rtype == qtype
                    || (rtype == Rtype::CNAME
                        && (qtype == Rtype::A || qtype == Rtype::AAAA))
                {
                    res.push(record);
                }
            } else if record.owner().ends_with(qname) {
                exists = true;
            }
        }
        if exists {
            Ok(res)
        } else {
            Err(BackendError::NameError)
        }
    }

    /// Returns the names an address is known by.
    ///
    /// Endpoints of headless services are named by their host name.
    fn names_of(&self, ip: IpAddr) -> Result<Vec<StoredName>, BackendError> {
        let state = self.state.read();
        let mut res = Vec::new();
        for svc in state.services.values() {
            let name = service_name(svc, &self.domain)?;
            match svc.kind {
                ServiceKind::ClusterIp(addr) if addr == ip => res.push(name),
                ServiceKind::Headless => {
                    let Some(endpoints) = state.endpoints.get(&svc.key())
                    else {
                        continue;
                    };
                    let hosts = endpoints
                        .subsets
                        .iter()
                        .flat_map(|subset| subset.addresses.iter())
                        .filter(|addr| addr.ip == ip);
                    for addr in hosts {
                        res.push(child_name(&[addr.label().as_str()], &name)?);
                    }
                }
                _ => {}
            }
        }
        Ok(res)
    }

    fn find_reverse(
        &self,
        qname: &StoredName,
    ) -> Result<Vec<StoredRecord>, BackendError> {
        let ip = reverse_addr(qname).ok_or(BackendError::NameError)?;
        let names = self.names_of(ip)?;
        if names.is_empty() {
            return Err(BackendError::NameError);
        }
        Ok(names
            .into_iter()
            .map(|name| self.record(qname.clone(), Ptr::new(name).into()))
            .collect())
    }
}

fn apply<T, F>(map: &mut BTreeMap<ObjectKey, T>, event: WatchEvent<T>, key: F)
where
    F: Fn(&T) -> ObjectKey,
{
    match event {
        WatchEvent::Added(obj) => {
            map.insert(key(&obj), obj);
        }
        WatchEvent::Updated { old, new } => {
            map.remove(&key(&old));
            map.insert(key(&new), new);
        }
        WatchEvent::Deleted(obj) => {
            map.remove(&key(&obj));
        }
    }
}

fn address(addr: IpAddr) -> StoredRecordData {
    match addr {
        IpAddr::V4(addr) => A::new(addr).into(),
        IpAddr::V6(addr) => Aaaa::new(addr).into(),
    }
}

fn srv_name(
    port: &ServicePort,
    name: &StoredName,
) -> Result<StoredName, BackendError> {
    let port_label = format!("_{}", port.name.to_ascii_lowercase());
    let proto_label = format!("_{}", port.protocol.to_ascii_lowercase());
    Ok(child_name(&[port_label.as_str(), proto_label.as_str()], name)?)
}

fn service_name(
    svc: &ServiceObject,
    zone: &StoredName,
) -> Result<StoredName, BackendError> {
    Ok(child_name(&[svc.name.as_str(), svc.namespace.as_str()], zone)?)
}

//--- Backend

impl Backend for Cluster {
    fn lookup<'a>(
        &'a self,
        zone: &'a StoredName,
        qname: &'a StoredName,
        qtype: Rtype,
    ) -> LookupFuture<'a> {
        let res = self.find(zone, qname, qtype);
        Box::pin(async move { res })
    }

    fn reverse<'a>(
        &'a self,
        _zone: &'a StoredName,
        qname: &'a StoredName,
    ) -> LookupFuture<'a> {
        let res = self.find_reverse(qname);
        Box::pin(async move { res })
    }
}

//--- TransferSource

impl TransferSource for Cluster {
    fn transfer_records<'a>(
        &'a self,
        zone: &'a StoredName,
    ) -> LookupFuture<'a> {
        let res = synthetic_soa(zone, self.epoch.serial()).and_then(|soa| {
            let mut records = vec![soa];
            records.extend(self.records(zone)?);
            Ok(records)
        });
        Box::pin(async move { res })
    }
}

//------------ Tests ---------------------------------------------------------
