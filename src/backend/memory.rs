//! A backend keeping its records in memory.

use std::boxed::Box;
use std::collections::BTreeMap;
use std::vec::Vec;

use domain::base::iana::Rtype;
use parking_lot::RwLock;

use crate::transfer::TransferSource;
use crate::types::{StoredName, StoredRecord};

use super::{child_name, Backend, BackendError, LookupFuture};

//------------ StaticBackend -------------------------------------------------

/// A static map of records.
///
/// Records are kept per owner name. Lookups understand wildcards and tell
/// empty non-terminals, which exist but have no records, from names that
/// don't exist at all.
#[derive(Debug, Default)]
pub struct StaticBackend {
    names: RwLock<BTreeMap<StoredName, Vec<StoredRecord>>>,
}

impl StaticBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record unless an equal one is present already.
    pub fn insert(&self, record: StoredRecord) {
        let mut names = self.names.write();
        let rrs = names.entry(record.owner().clone()).or_default();
        if !rrs.contains(&record) {
            rrs.push(record);
        }
    }

    pub fn extend<I: IntoIterator<Item = StoredRecord>>(&self, records: I) {
        for record in records {
            self.insert(record)
        }
    }

    /// Removes all records of `name`.
    pub fn remove(&self, name: &StoredName) -> Option<Vec<StoredRecord>> {
        self.names.write().remove(name)
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.names.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.names.read().is_empty()
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
        let names = self.names.read();

        if let Some(rrs) = names.get(qname) {
            return Ok(select(rrs, qtype).cloned().collect());
        }
        if is_non_terminal(&names, qname) {
            return Ok(Vec::new());
        }

        // Only the closest encloser's wildcard applies.
        let mut parent = qname.parent();
        while let Some(encloser) = parent {
            if !encloser.ends_with(zone) {
                break;
            }
            let wildcard = child_name(&["*"], &encloser)?;
            if let Some(rrs) = names.get(&wildcard) {
                return Ok(select(rrs, qtype)
                    .map(|rr| {
                        StoredRecord::new(
                            qname.clone(),
                            rr.class(),
                            rr.ttl(),
                            rr.data().clone(),
                        )
                    })
                    .collect());
            }
            if &encloser == zone
                || names.contains_key(&encloser)
                || is_non_terminal(&names, &encloser)
            {
                break;
            }
            parent = encloser.parent();
        }
        Err(BackendError::NameError)
    }

    fn zone_records(&self, zone: &StoredName) -> Vec<StoredRecord> {
        let names = self.names.read();
        let mut soa = Vec::new();
        let mut rest = Vec::new();
        let in_zone = names.iter().filter(|(name, _)| name.ends_with(zone));
        for (name, rrs) in in_zone {
            for rr in rrs {
                if name == zone && rr.rtype() == Rtype::SOA {
                    soa.push(rr.clone());
                } else {
                    rest.push(rr.clone());
                }
            }
        }
        soa.truncate(1);
        soa.extend(rest);
        soa
    }
}

/// Returns the records of a name that answer a query for `qtype`.
///
/// Address queries are also answered by a CNAME.
fn select(
    rrs: &[StoredRecord],
    qtype: Rtype,
) -> impl Iterator<Item = &StoredRecord> {
    rrs.iter().filter(move |rr| {
        let rtype = rr.rtype();
        rtype == qtype
            || (rtype == Rtype::CNAME
                && (qtype == Rtype::A || qtype == Rtype::AAAA))
    })
}

/// Returns whether there are names below `name`.
fn is_non_terminal(
    names: &BTreeMap<StoredName, Vec<StoredRecord>>,
    name: &StoredName,
) -> bool {
    names
        .keys()
        .any(|key| key != name && key.ends_with(name))
}

//--- Backend

impl Backend for StaticBackend {
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
        zone: &'a StoredName,
        qname: &'a StoredName,
    ) -> LookupFuture<'a> {
        let res = self.find(zone, qname, Rtype::PTR);
        Box::pin(async move { res })
    }
}

//--- TransferSource

impl TransferSource for StaticBackend {
    fn transfer_records<'a>(
        &'a self,
        zone: &'a StoredName,
    ) -> LookupFuture<'a> {
        let records = self.zone_records(zone);
        Box::pin(async move { Ok(records) })
    }
}

//------------ Tests ---------------------------------------------------------
