//! Stub zones.
//!
//! A stub zone is a suffix whose queries are not answered from the local
//! backend but forwarded to a fixed set of upstream servers. The map of stub
//! zones is shared by all requests and replaced from time to time by a
//! background task that reads it from a [`StubSource`].

use std::boxed::Box;
use std::collections::HashMap;
use std::error;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use std::vec::Vec;

use domain::base::iana::Rcode;
use domain::base::Message;
use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use crate::backend::BackendError;
use crate::error::PluginError;
use crate::plugin::{
    client_write, Handler, HandlerFuture, Next, ResponseWriter, Zones,
};
use crate::request::Request;
use crate::types::StoredName;

/// The largest datagram we are prepared to receive from an upstream.
const RECV_SIZE: usize = 65_535;

//------------ Type Aliases --------------------------------------------------

/// The future returned by [`Forwarder::forward`].
pub type ForwardFuture<'a> = Pin<
    Box<dyn Future<Output = Result<Message<Vec<u8>>, ForwardError>> + Send + 'a>,
>;

/// The future returned by [`StubSource::stub_zones`].
pub type StubFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<StubZone>, BackendError>> + Send + 'a>>;

//------------ Forwarder -----------------------------------------------------

/// Something that can get an answer for a request from elsewhere.
pub trait Forwarder: Send + Sync {
    fn forward<'a>(&'a self, request: &'a Request) -> ForwardFuture<'a>;
}

//------------ UdpForwarder --------------------------------------------------

/// Forwards requests over UDP to a list of upstream servers.
///
/// The upstreams are tried in order. The first answer that matches the
/// request is returned.
#[derive(Clone, Debug)]
pub struct UdpForwarder {
    upstreams: Vec<SocketAddr>,
    timeout: Duration,
}

impl UdpForwarder {
    pub fn new(upstreams: Vec<SocketAddr>, timeout: Duration) -> Self {
        UdpForwarder { upstreams, timeout }
    }

    pub fn upstreams(&self) -> &[SocketAddr] {
        &self.upstreams
    }

    async fn query(
        &self,
        upstream: SocketAddr,
        request: &Request,
    ) -> Result<Message<Vec<u8>>, ForwardError> {
        let local: SocketAddr = match upstream {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let sock = UdpSocket::bind(local).await?;
        sock.connect(upstream).await?;

        let query = request.message();
        let dgram = query.as_slice();
        if sock.send(dgram).await? != dgram.len() {
            return Err(ForwardError::ShortSend);
        }

        let start = Instant::now();
        loop {
            let remain = self
                .timeout
                .checked_sub(start.elapsed())
                .ok_or(ForwardError::Timeout)?;
            let mut buf = vec![0; RECV_SIZE];
            let len = timeout(remain, sock.recv(&mut buf))
                .await
                .map_err(|_| ForwardError::Timeout)??;
            buf.truncate(len);

            // Garbage is ignored, the timer covers the whole exchange.
            let answer = match Message::from_octets(buf) {
                Ok(answer) => answer,
                Err(_) => continue,
            };
            if answer.is_answer(query) {
                return Ok(answer);
            }
        }
    }
}

impl Forwarder for UdpForwarder {
    fn forward<'a>(&'a self, request: &'a Request) -> ForwardFuture<'a> {
        Box::pin(async move {
            let mut last = ForwardError::NoUpstream;
            for upstream in &self.upstreams {
                match self.query(*upstream, request).await {
                    Ok(answer) => return Ok(answer),
                    Err(err) => {
                        debug!("Upstream {upstream} failed: {err}");
                        last = err;
                    }
                }
            }
            Err(last)
        })
    }
}

//------------ StubZone ------------------------------------------------------

/// A stub zone as found in a [`StubSource`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StubZone {
    pub zone: StoredName,
    pub upstreams: Vec<SocketAddr>,
}

//------------ StubSource ----------------------------------------------------

/// A place stub zones can be read from.
pub trait StubSource: Send + Sync {
    /// Returns the stub zones defined below the given authoritative zones.
    fn stub_zones<'a>(&'a self, zones: &'a Zones) -> StubFuture<'a>;
}

impl<T: StubSource + ?Sized> StubSource for Arc<T> {
    fn stub_zones<'a>(&'a self, zones: &'a Zones) -> StubFuture<'a> {
        T::stub_zones(self, zones)
    }
}

//------------ StubZones -----------------------------------------------------

/// The shared map of stub zones.
#[derive(Default)]
pub struct StubZones {
    map: RwLock<HashMap<StoredName, Arc<dyn Forwarder>>>,
}

impl StubZones {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn insert(&self, zone: StoredName, forwarder: Arc<dyn Forwarder>) {
        self.map.write().insert(zone, forwarder);
    }

    /// Replaces all stub zones at once.
    pub fn replace(&self, map: HashMap<StoredName, Arc<dyn Forwarder>>) {
        *self.map.write() = map;
    }

    /// Returns the stub zone `qname` falls under, if any.
    ///
    /// Of nested stub zones, the longest wins.
    pub fn matching(&self, qname: &StoredName) -> Option<Stub> {
        let map = self.map.read();
        map.iter()
            .filter(|(zone, _)| qname.ends_with(*zone))
            .max_by_key(|(zone, _)| zone.label_count())
            .map(|(zone, forwarder)| Stub::new(zone.clone(), forwarder.clone()))
    }

    /// Rereads the stub zones from `source`.
    ///
    /// Stub zones that are one of our own `zones` are skipped. Returns the
    /// number of stub zones now in place.
    pub async fn update_from(
        &self,
        source: &dyn StubSource,
        zones: &Zones,
        upstream_timeout: Duration,
    ) -> Result<usize, BackendError> {
        let found = source.stub_zones(zones).await?;
        let mut map: HashMap<StoredName, Arc<dyn Forwarder>> = HashMap::new();
        for stub in found {
            if zones.contains(&stub.zone) {
                debug!("Ignoring stub zone {} which is our own", stub.zone);
                continue;
            }
            if stub.upstreams.is_empty() {
                continue;
            }
            let forwarder = UdpForwarder::new(stub.upstreams, upstream_timeout);
            map.insert(stub.zone, Arc::new(forwarder));
        }
        let len = map.len();
        self.replace(map);
        Ok(len)
    }
}

//------------ spawn_updater() -----------------------------------------------

/// Starts a task rereading the stub zones every `every`.
///
/// The first update happens right away. Failed updates keep the previous
/// stub zones in place.
pub fn spawn_updater(
    stubs: Arc<StubZones>,
    source: Arc<dyn StubSource>,
    zones: Zones,
    every: Duration,
    upstream_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            match stubs.update_from(&*source, &zones, upstream_timeout).await
            {
                Ok(len) => debug!("Stub zones updated, {len} in place"),
                Err(err) => warn!("Unable to update stub zones: {err}"),
            }
        }
    })
}

//------------ Stub ----------------------------------------------------------

/// A handler forwarding requests for a single stub zone.
#[derive(Clone)]
pub struct Stub {
    zone: StoredName,
    forwarder: Arc<dyn Forwarder>,
}

impl Stub {
    pub fn new(zone: StoredName, forwarder: Arc<dyn Forwarder>) -> Self {
        Stub { zone, forwarder }
    }

    pub fn zone(&self) -> &StoredName {
        &self.zone
    }

    /// Forwards the request and writes the upstream's answer.
    ///
    /// Returns the upstream's rcode. Rcodes the chain would answer on its
    /// own are returned as NOERROR since the answer has been written
    /// already.
    pub async fn forward(
        &self,
        request: &Request,
        writer: &mut dyn ResponseWriter,
    ) -> Result<Rcode, PluginError> {
        debug!("Forwarding {} to stub zone {}", request.qname(), self.zone);
        let answer = self.forwarder.forward(request).await?;
        let rcode = answer.header().rcode();
        if let Err(err) = writer.write(answer).await {
            debug!("Unable to write stub answer: {err}");
        }
        if client_write(rcode) {
            return Ok(Rcode::NOERROR);
        }
        Ok(rcode)
    }
}

impl Handler for Stub {
    fn name(&self) -> &str {
        "stub"
    }

    fn serve<'a>(
        &'a self,
        request: &'a Request,
        writer: &'a mut dyn ResponseWriter,
        _next: Next<'a>,
    ) -> HandlerFuture<'a> {
        Box::pin(self.forward(request, writer))
    }
}

//------------ ForwardError --------------------------------------------------

/// Forwarding a request to a stub zone's upstreams failed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ForwardError {
    /// There are no upstreams.
    NoUpstream,

    /// The upstream did not answer in time.
    Timeout,

    /// The request was only partially sent.
    ShortSend,

    /// Network I/O failed.
    Io(io::ErrorKind),
}

//--- From<io::Error>

impl From<io::Error> for ForwardError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.kind())
    }
}

//--- Display

impl fmt::Display for ForwardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoUpstream => f.write_str("no upstream servers"),
            Self::Timeout => f.write_str("upstream timed out"),
            Self::ShortSend => f.write_str("short send"),
            Self::Io(kind) => write!(f, "I/O error: {kind}"),
        }
    }
}

//--- Error

impl error::Error for ForwardError {}

//------------ Tests ---------------------------------------------------------
