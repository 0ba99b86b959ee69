//! Answering queries from a backend.
//!
//! A [`Resolver`] is the plugin that makes a [`Backend`] authoritative for
//! a set of zones. For each request it
//!
//! 1. refuses anything but class IN,
//! 2. forwards requests for names in a stub zone to that zone's upstreams,
//! 3. passes requests outside its zones on to the next plugin,
//! 4. hands zone transfer requests to its transfer handler,
//! 5. otherwise asks the backend through the [`Synthesis`] selected for the
//!    query type and writes the answer.
//!
//! Names the backend doesn't know are answered with NXDOMAIN or, with
//! fallthrough enabled, passed on to the next plugin. Any other backend
//! failure results in SERVFAIL. Negative answers carry the zone's SOA
//! record in the authority section if the backend has one.

pub mod response;
pub mod synth;

pub use self::synth::{Synthesis, Synthesized};

use std::boxed::Box;
use std::string::String;
use std::sync::Arc;

use arc_swap::ArcSwap;
use domain::base::iana::{Class, Rcode, Rtype};
use domain::base::Message;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use crate::backend::{Backend, BackendError};
use crate::config::ResolverConfig;
use crate::error::PluginError;
use crate::plugin::{
    next_or_failure, Handler, HandlerFuture, HandlerResult, Next,
    ResponseWriter,
};
use crate::request::Request;
use crate::stub::StubZones;
use crate::types::StoredName;

//------------ Resolver ------------------------------------------------------

/// A plugin serving the zones of a backend.
pub struct Resolver<B> {
    name: String,
    backend: B,
    config: ArcSwap<ResolverConfig>,
    stubs: Option<Arc<StubZones>>,
    xfr: Option<Arc<dyn Handler>>,
}

impl<B: Backend> Resolver<B> {
    pub fn new(
        name: impl Into<String>,
        backend: B,
        config: ResolverConfig,
    ) -> Self {
        Resolver {
            name: name.into(),
            backend,
            config: ArcSwap::from_pointee(config),
            stubs: None,
            xfr: None,
        }
    }

    /// Forwards requests for names in these stub zones.
    pub fn with_stubs(mut self, stubs: Arc<StubZones>) -> Self {
        self.stubs = Some(stubs);
        self
    }

    /// Hands AXFR and IXFR requests to `xfr`.
    ///
    /// Without a transfer handler these requests are refused.
    pub fn with_xfr(mut self, xfr: Arc<dyn Handler>) -> Self {
        self.xfr = Some(xfr);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> Arc<ResolverConfig> {
        self.config.load_full()
    }

    /// Replaces the configuration.
    ///
    /// Requests already in progress finish with the old configuration.
    pub fn reconfigure(&self, config: ResolverConfig) {
        self.config.store(Arc::new(config));
    }

    async fn resolve<'a>(
        &'a self,
        request: &'a Request,
        writer: &'a mut dyn ResponseWriter,
        next: Next<'a>,
    ) -> HandlerResult {
        if request.qclass() != Class::IN {
            return Err(PluginError::InvalidClass(request.qclass()));
        }

        let stub = self
            .stubs
            .as_ref()
            .and_then(|stubs| stubs.matching(request.qname()));
        if let Some(stub) = stub {
            return stub.forward(request, writer).await;
        }

        let config = self.config.load_full();
        let Some(zone) = config.zones().matches(request.qname()).cloned()
        else {
            return next_or_failure(&self.name, next, request, writer).await;
        };

        if matches!(request.qtype(), Rtype::AXFR | Rtype::IXFR) {
            return match self.xfr {
                Some(ref xfr) => xfr.serve(request, writer, next).await,
                None => Ok(Rcode::REFUSED),
            };
        }

        let deadline = Instant::now() + config.lookup_timeout();
        let synthesis =
            Synthesis::select(request.qtype(), request.qname() == &zone);
        let res = timeout_at(
            deadline,
            synthesis.run(
                &self.backend,
                &zone,
                request.qname(),
                request.qtype(),
            ),
        )
        .await
        .unwrap_or(Err(BackendError::Timeout));

        match res {
            Ok(records) if !records.is_empty() => {
                write(writer, response::answer(request, records)?).await;
                Ok(Rcode::NOERROR)
            }
            Ok(_) => {
                self.negative(request, writer, &zone, Rcode::NOERROR, deadline)
                    .await
            }
            Err(err) if self.backend.is_name_error(&err) => {
                if config.fallthrough() {
                    debug!(
                        "{} does not exist in {zone}, falling through",
                        request.qname()
                    );
                    return next_or_failure(&self.name, next, request, writer)
                        .await;
                }
                self.negative(request, writer, &zone, Rcode::NXDOMAIN, deadline)
                    .await
            }
            Err(err) => Err(PluginError::Backend {
                plugin: self.name.clone(),
                source: err,
            }),
        }
    }

    /// Writes an answer without records.
    async fn negative(
        &self,
        request: &Request,
        writer: &mut dyn ResponseWriter,
        zone: &StoredName,
        rcode: Rcode,
        deadline: Instant,
    ) -> HandlerResult {
        let lookup = self.backend.lookup(zone, zone, Rtype::SOA);
        let soa = match timeout_at(deadline, lookup).await {
            Ok(Ok(rrs)) => rrs.into_iter().find(|rr| rr.rtype() == Rtype::SOA),
            _ => None,
        };
        write(writer, response::negative(request, rcode, soa.as_ref())?).await;
        Ok(rcode)
    }
}

async fn write(writer: &mut dyn ResponseWriter, msg: Message<Vec<u8>>) {
    if let Err(err) = writer.write(msg).await {
        debug!("Unable to write response: {err}");
    }
}

//--- Handler

impl<B: Backend> Handler for Resolver<B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn serve<'a>(
        &'a self,
        request: &'a Request,
        writer: &'a mut dyn ResponseWriter,
        next: Next<'a>,
    ) -> HandlerFuture<'a> {
        Box::pin(self.resolve(request, writer, next))
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use core::str::FromStr;
    use std::net::Ipv4Addr;

    use domain::base::Ttl;
    use domain::rdata::A;

    use super::*;
    use crate::backend::memory::StaticBackend;
    use crate::plugin::{Recorder, Zones};
    use crate::request::{mk_query, Transport};
    use crate::types::StoredRecord;

    fn n(s: &str) -> StoredName {
        StoredName::from_str(s).unwrap()
    }

    fn resolver(zones: &[&str]) -> Resolver<StaticBackend> {
        let backend = StaticBackend::new();
        backend.insert(StoredRecord::new(
            n("www.example.org."),
            Class::IN,
            Ttl::from_secs(300),
            A::new(Ipv4Addr::new(10, 0, 0, 1)).into(),
        ));
        let mut config = ResolverConfig::new();
        config.set_zones(Zones::from_strs(zones).unwrap());
        Resolver::new("test", backend, config)
    }

    fn request(qname: &str, qtype: Rtype) -> Request {
        let msg = mk_query(&n(qname), qtype, Class::IN).unwrap();
        Request::new(msg, "192.0.2.1:53".parse().unwrap(), Transport::Udp)
            .unwrap()
    }

    #[tokio::test]
    async fn reconfigure_changes_zones() {
        let resolver = resolver(&["example.net."]);
        let req = request("www.example.org.", Rtype::A);

        let mut rec = Recorder::new();
        let res = resolver.serve(&req, &mut rec, Next::end()).await;
        assert!(matches!(res, Err(PluginError::NoNextPlugin(_))));
        assert!(rec.is_empty());

        let mut config = ResolverConfig::new();
        config.set_zones(Zones::from_strs(&["example.org."]).unwrap());
        resolver.reconfigure(config);

        let mut rec = Recorder::new();
        let res = resolver.serve(&req, &mut rec, Next::end()).await;
        assert_eq!(res.unwrap(), Rcode::NOERROR);
        assert_eq!(rec.msg().unwrap().header_counts().ancount(), 1);
    }

    #[tokio::test]
    async fn transfer_without_handler_is_refused() {
        let resolver = resolver(&["example.org."]);
        let req = request("example.org.", Rtype::AXFR);
        let mut rec = Recorder::new();
        let res = resolver.serve(&req, &mut rec, Next::end()).await;
        assert_eq!(res.unwrap(), Rcode::REFUSED);
        assert!(rec.is_empty());
    }
}
