#![allow(dead_code)]

use core::str::FromStr;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use domain::base::iana::{Class, Rcode, Rtype};
use domain::base::{Message, Serial, Ttl};
use domain::rdata::{Soa, A};
use tracing_subscriber::EnvFilter;

use domain_plugin::backend::memory::StaticBackend;
use domain_plugin::backend::{Backend, BackendError, LookupFuture};
use domain_plugin::plugin::{Handler, HandlerFuture, Next, ResponseWriter};
use domain_plugin::request::{mk_query, Request, Transport};
use domain_plugin::stub::{ForwardError, ForwardFuture, Forwarder};
use domain_plugin::types::{StoredName, StoredRecord, StoredRecordData};

/// Setup logging of events reported by the plugins and the test suite.
///
/// Use the RUST_LOG environment variable to override the defaults.
///
/// E.g. To enable debug level logging:
///   RUST_LOG=DEBUG
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_thread_ids(true)
        .without_time()
        .try_init()
        .ok();
}

pub fn name(s: &str) -> StoredName {
    StoredName::from_str(s).unwrap()
}

pub fn record(owner: &str, data: StoredRecordData) -> StoredRecord {
    StoredRecord::new(name(owner), Class::IN, Ttl::from_secs(300), data)
}

pub fn a(owner: &str, addr: [u8; 4]) -> StoredRecord {
    record(owner, A::new(Ipv4Addr::from(addr)).into())
}

pub fn soa(zone: &str, serial: u32) -> StoredRecord {
    record(
        zone,
        Soa::new(
            name(&format!("ns.{zone}")),
            name(&format!("hostmaster.{zone}")),
            Serial(serial),
            Ttl::from_secs(7200),
            Ttl::from_secs(1800),
            Ttl::from_secs(86400),
            Ttl::from_secs(60),
        )
        .into(),
    )
}

pub fn request(qname: &str, qtype: Rtype) -> Request {
    request_with(qname, qtype, Class::IN, Transport::Udp)
}

pub fn request_with(
    qname: &str,
    qtype: Rtype,
    qclass: Class,
    transport: Transport,
) -> Request {
    let msg = mk_query(&name(qname), qtype, qclass).unwrap();
    Request::new(msg, "192.0.2.1:53000".parse().unwrap(), transport).unwrap()
}

//------------ CountingBackend -----------------------------------------------

/// A backend counting the lookups it receives.
#[derive(Default)]
pub struct CountingBackend {
    pub inner: StaticBackend,
    lookups: AtomicUsize,
}

impl CountingBackend {
    pub fn new(records: impl IntoIterator<Item = StoredRecord>) -> Self {
        let res = Self::default();
        res.inner.extend(records);
        res
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl Backend for CountingBackend {
    fn lookup<'a>(
        &'a self,
        zone: &'a StoredName,
        qname: &'a StoredName,
        qtype: Rtype,
    ) -> LookupFuture<'a> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.lookup(zone, qname, qtype)
    }

    fn reverse<'a>(
        &'a self,
        zone: &'a StoredName,
        qname: &'a StoredName,
    ) -> LookupFuture<'a> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.reverse(zone, qname)
    }
}

//------------ FailingBackend ------------------------------------------------

/// A backend failing every lookup with the same error.
pub struct FailingBackend(pub BackendError);

impl Backend for FailingBackend {
    fn lookup<'a>(
        &'a self,
        _zone: &'a StoredName,
        _qname: &'a StoredName,
        _qtype: Rtype,
    ) -> LookupFuture<'a> {
        let err = self.0.clone();
        Box::pin(async move { Err(err) })
    }

    fn reverse<'a>(
        &'a self,
        _zone: &'a StoredName,
        _qname: &'a StoredName,
    ) -> LookupFuture<'a> {
        let err = self.0.clone();
        Box::pin(async move { Err(err) })
    }
}

//------------ SlowBackend ---------------------------------------------------

/// A backend that takes a long time to answer.
pub struct SlowBackend(pub Duration);

impl Backend for SlowBackend {
    fn lookup<'a>(
        &'a self,
        _zone: &'a StoredName,
        _qname: &'a StoredName,
        _qtype: Rtype,
    ) -> LookupFuture<'a> {
        let delay = self.0;
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            Ok(Vec::new())
        })
    }

    fn reverse<'a>(
        &'a self,
        zone: &'a StoredName,
        qname: &'a StoredName,
    ) -> LookupFuture<'a> {
        self.lookup(zone, qname, Rtype::PTR)
    }
}

//------------ Fixed ---------------------------------------------------------

/// A handler returning the same rcode without writing anything.
pub struct Fixed {
    pub rcode: Rcode,
    pub calls: Arc<AtomicUsize>,
}

impl Fixed {
    pub fn new(rcode: Rcode) -> Self {
        Fixed {
            rcode,
            calls: Default::default(),
        }
    }
}

impl Handler for Fixed {
    fn name(&self) -> &str {
        "fixed"
    }

    fn serve<'a>(
        &'a self,
        _request: &'a Request,
        _writer: &'a mut dyn ResponseWriter,
        _next: Next<'a>,
    ) -> HandlerFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let rcode = self.rcode;
        Box::pin(async move { Ok(rcode) })
    }
}

//------------ CannedForwarder -----------------------------------------------

/// A forwarder answering every request with a fixed address record.
#[derive(Default)]
pub struct CannedForwarder {
    pub calls: AtomicUsize,
}

impl Forwarder for CannedForwarder {
    fn forward<'a>(&'a self, request: &'a Request) -> ForwardFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            let mut answer = domain::base::MessageBuilder::new_vec()
                .start_answer(request.message(), Rcode::NOERROR)
                .map_err(|_| ForwardError::NoUpstream)?;
            let record = StoredRecord::new(
                request.qname().clone(),
                Class::IN,
                Ttl::from_secs(60),
                A::new(Ipv4Addr::new(192, 0, 2, 53)).into(),
            );
            answer
                .push(&record)
                .map_err(|_| ForwardError::NoUpstream)?;
            let msg: Message<Vec<u8>> = answer.into_message();
            Ok(msg)
        })
    }
}
