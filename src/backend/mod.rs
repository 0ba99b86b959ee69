//! Data sources for backend-driven plugins.
//!
//! A [`Backend`] turns a name and a record type into typed resource records.
//! How it does so is its own business: it may look into an in-memory map
//! ([`memory`]), a distributed key/value store ([`store`]) or the state of a
//! cluster service registry ([`cluster`]). The resolver only relies on the
//! contract described here.

pub mod memory;

#[cfg(feature = "cluster")]
pub mod cluster;

#[cfg(feature = "store")]
pub mod store;

use core::str::FromStr;
use std::boxed::Box;
use std::error;
use std::fmt;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::pin::Pin;
use std::string::String;
use std::vec::Vec;

use domain::base::iana::{Class, Rtype};
use domain::base::name::FromStrError;
use domain::base::{Serial, Ttl};
use domain::rdata::Soa;

use crate::types::{StoredName, StoredRecord};

//------------ Type Aliases --------------------------------------------------

/// The future returned by backend lookups.
pub type LookupFuture<'a> = Pin<
    Box<dyn Future<Output = Result<Vec<StoredRecord>, BackendError>> + Send + 'a>,
>;

//------------ Backend -------------------------------------------------------

/// A source of authoritative data.
pub trait Backend: Send + Sync {
    /// Looks up the records of type `qtype` for `qname` in `zone`.
    ///
    /// Wildcards are expanded by the backend. For address queries the
    /// backend may return a CNAME record instead of addresses. If the name
    /// exists but has no records of the type, an empty vec is returned.
    /// If the name does not exist, the error must be one for which
    /// [`is_name_error`][Self::is_name_error] returns true.
    fn lookup<'a>(
        &'a self,
        zone: &'a StoredName,
        qname: &'a StoredName,
        qtype: Rtype,
    ) -> LookupFuture<'a>;

    /// Looks up PTR records for a name below `in-addr.arpa` or `ip6.arpa`.
    fn reverse<'a>(
        &'a self,
        zone: &'a StoredName,
        qname: &'a StoredName,
    ) -> LookupFuture<'a>;

    /// Returns whether an error means the queried name does not exist.
    fn is_name_error(&self, err: &BackendError) -> bool {
        err.is_name_error()
    }
}

impl<T: Backend + ?Sized> Backend for std::sync::Arc<T> {
    fn lookup<'a>(
        &'a self,
        zone: &'a StoredName,
        qname: &'a StoredName,
        qtype: Rtype,
    ) -> LookupFuture<'a> {
        T::lookup(self, zone, qname, qtype)
    }

    fn reverse<'a>(
        &'a self,
        zone: &'a StoredName,
        qname: &'a StoredName,
    ) -> LookupFuture<'a> {
        T::reverse(self, zone, qname)
    }

    fn is_name_error(&self, err: &BackendError) -> bool {
        T::is_name_error(self, err)
    }
}

//------------ BackendError --------------------------------------------------

/// A backend lookup failed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BackendError {
    /// The queried name does not exist.
    NameError,

    /// The lookup did not finish before its deadline.
    Timeout,

    /// The data source could not be reached.
    Unavailable(String),

    /// The data source returned something that isn't valid data.
    Malformed(String),
}

impl BackendError {
    pub fn is_name_error(&self) -> bool {
        matches!(self, Self::NameError)
    }
}

//--- Display

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NameError => f.write_str("name does not exist"),
            Self::Timeout => f.write_str("lookup timed out"),
            Self::Unavailable(reason) => {
                write!(f, "backend unavailable: {reason}")
            }
            Self::Malformed(reason) => write!(f, "malformed data: {reason}"),
        }
    }
}

//--- Error

impl error::Error for BackendError {}

//--- From<FromStrError>

impl From<FromStrError> for BackendError {
    fn from(err: FromStrError) -> Self {
        Self::Malformed(format!("invalid domain name: {err}"))
    }
}

//------------ child_name() --------------------------------------------------

/// Builds a name from relative labels and a parent name.
///
/// The labels are given in presentation format and joined with dots.
pub fn child_name(
    labels: &[&str],
    parent: &StoredName,
) -> Result<StoredName, FromStrError> {
    let mut s = labels.join(".");
    if !parent.is_root() {
        s.push('.');
        s.push_str(&parent.to_string());
    }
    s.push('.');
    StoredName::from_str(&s)
}

//------------ synthetic_soa() -----------------------------------------------

/// Creates the SOA record for a zone without stored zone data.
///
/// The primary server is `ns.dns.<zone>` and the mailbox
/// `hostmaster.<zone>`.
pub fn synthetic_soa(
    zone: &StoredName,
    serial: Serial,
) -> Result<StoredRecord, BackendError> {
    let soa = Soa::new(
        child_name(&["ns", "dns"], zone)?,
        child_name(&["hostmaster"], zone)?,
        serial,
        Ttl::from_secs(7200),
        Ttl::from_secs(1800),
        Ttl::from_secs(86400),
        Ttl::from_secs(60),
    );
    Ok(StoredRecord::new(
        zone.clone(),
        Class::IN,
        Ttl::from_secs(300),
        soa.into(),
    ))
}

//------------ reverse_addr() ------------------------------------------------

/// Extracts the address from a name below `in-addr.arpa` or `ip6.arpa`.
///
/// Returns `None` if the name isn't a complete reverse name.
pub fn reverse_addr(qname: &StoredName) -> Option<IpAddr> {
    let labels: Vec<String> = qname
        .iter()
        .filter(|label| !label.is_root())
        .map(|label| label.to_string().to_ascii_lowercase())
        .collect();
    match labels.as_slice() {
        [octets @ .., in_addr, arpa]
            if in_addr == "in-addr" && arpa == "arpa" && octets.len() == 4 =>
        {
            let mut addr = [0u8; 4];
            for (slot, label) in addr.iter_mut().zip(octets.iter().rev()) {
                *slot = label.parse().ok()?;
            }
            Some(Ipv4Addr::from(addr).into())
        }
        [nibbles @ .., ip6, arpa]
            if ip6 == "ip6" && arpa == "arpa" && nibbles.len() == 32 =>
        {
            let mut addr = 0u128;
            for label in nibbles.iter().rev() {
                let nibble = u8::from_str_radix(label, 16).ok()?;
                if label.len() != 1 {
                    return None;
                }
                addr = (addr << 4) | u128::from(nibble);
            }
            Some(Ipv6Addr::from(addr).into())
        }
        _ => None,
    }
}

//------------ Tests ---------------------------------------------------------
