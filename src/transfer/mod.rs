//! Outgoing zone transfers.
//!
//! The [`Xfr`] handler answers AXFR and IXFR queries for the apex of its
//! zones with the complete content of the zone, as provided by a
//! [`TransferSource`]. IXFR is always answered with a full transfer. The
//! records are streamed by [`envelope::out`] and only to clients listed in
//! the [`TransferAcl`].

pub mod acl;
pub mod envelope;

pub use self::acl::{AclError, TransferAcl};

use std::boxed::Box;
use std::error;
use std::fmt;
use std::io;
use std::sync::Arc;

use domain::base::iana::{Rcode, Rtype};
use tracing::{debug, info};

use crate::backend::LookupFuture;
use crate::error::PluginError;
use crate::plugin::{
    next_or_failure, Handler, HandlerFuture, Next, ResponseWriter, Zones,
};
use crate::request::Request;
use crate::types::StoredName;

//------------ TransferSource ------------------------------------------------

/// A source of complete zones.
pub trait TransferSource: Send + Sync {
    /// Returns all records of `zone` with the zone's SOA record first.
    ///
    /// The closing SOA record is added during the transfer and must not be
    /// included.
    fn transfer_records<'a>(&'a self, zone: &'a StoredName)
        -> LookupFuture<'a>;
}

impl<T: TransferSource + ?Sized> TransferSource for Arc<T> {
    fn transfer_records<'a>(
        &'a self,
        zone: &'a StoredName,
    ) -> LookupFuture<'a> {
        T::transfer_records(self, zone)
    }
}

//------------ Xfr -----------------------------------------------------------

/// A handler serving zone transfers.
pub struct Xfr<S> {
    source: S,
    zones: Zones,
    acl: TransferAcl,
}

impl<S> Xfr<S> {
    pub fn new(source: S, zones: Zones, acl: TransferAcl) -> Self {
        Xfr { source, zones, acl }
    }

    pub fn zones(&self) -> &Zones {
        &self.zones
    }

    pub fn acl(&self) -> &TransferAcl {
        &self.acl
    }
}

impl<S: TransferSource> Xfr<S> {
    async fn serve_xfr<'a>(
        &'a self,
        request: &'a Request,
        writer: &'a mut dyn ResponseWriter,
        next: Next<'a>,
    ) -> Result<Rcode, PluginError> {
        if !self.acl.allows(request.client_ip()) {
            debug!(
                "Refusing transfer of {} to {}",
                request.qname(),
                request.client_ip()
            );
            return Ok(Rcode::REFUSED);
        }
        let qtype = request.qtype();
        if qtype != Rtype::AXFR && qtype != Rtype::IXFR {
            return Err(PluginError::NotTransfer(qtype));
        }

        let qname = request.qname();
        let Some(zone) = self.zones.iter().find(|zone| *zone == qname) else {
            return next_or_failure(self.name(), next, request, writer).await;
        };

        let records = self.source.transfer_records(zone).await.map_err(
            |source| PluginError::Backend {
                plugin: self.name().into(),
                source,
            },
        )?;
        match records.first() {
            Some(first) if first.rtype() == Rtype::SOA => {}
            _ => return Ok(Rcode::SERVFAIL),
        }

        info!(
            "Outgoing transfer of {} records of zone {} to {} started",
            records.len(),
            zone,
            request.client_ip()
        );
        let envelopes = envelope::out(request, writer, records).await?;
        debug!("Transfer of zone {zone} done after {envelopes} envelopes");
        Ok(Rcode::NOERROR)
    }
}

impl<S: TransferSource> Handler for Xfr<S> {
    fn name(&self) -> &str {
        "xfr"
    }

    fn serve<'a>(
        &'a self,
        request: &'a Request,
        writer: &'a mut dyn ResponseWriter,
        next: Next<'a>,
    ) -> HandlerFuture<'a> {
        Box::pin(self.serve_xfr(request, writer, next))
    }
}

//------------ TransferError -------------------------------------------------

/// An outgoing transfer was aborted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TransferError {
    /// Writing an envelope to the client failed.
    Write(io::ErrorKind),

    /// An envelope could not be assembled.
    Compose,

    /// The task producing envelopes went away.
    Producer,
}

//--- Display

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Write(kind) => write!(f, "write failed: {kind}"),
            Self::Compose => f.write_str("unable to assemble envelope"),
            Self::Producer => f.write_str("envelope producer failed"),
        }
    }
}

//--- Error

impl error::Error for TransferError {}
