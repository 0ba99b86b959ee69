//! Turning a query into backend lookups.

use std::vec::Vec;

use domain::base::iana::Rtype;
use domain::rdata::ZoneRecordData;
use futures_util::stream::FuturesOrdered;
use futures_util::StreamExt;
use tracing::trace;

use crate::backend::{Backend, BackendError};
use crate::types::{StoredName, StoredRecord};

//------------ Synthesis -----------------------------------------------------

/// How the records for a query are obtained.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Synthesis {
    /// Look up the queried name and type.
    Records,

    /// Look up the queried name and type, then add addresses of in-zone
    /// targets as additional records.
    RecordsWithGlue,

    /// The NS records of the zone apex with their glue.
    ApexNs,

    /// Look up PTR records through the backend's reverse path.
    Reverse,

    /// Look up addresses only to learn whether the name exists.
    ///
    /// The records are discarded so the answer is either empty or a name
    /// error.
    Probe,
}

impl Synthesis {
    /// Selects the synthesis for a query type.
    ///
    /// NS queries are only answered at the zone apex. Below it and for
    /// every type without special treatment the name is probed.
    pub fn select(qtype: Rtype, at_apex: bool) -> Self {
        match qtype {
            Rtype::A | Rtype::AAAA | Rtype::TXT | Rtype::CNAME | Rtype::SOA => {
                Synthesis::Records
            }
            Rtype::MX | Rtype::SRV => Synthesis::RecordsWithGlue,
            Rtype::PTR => Synthesis::Reverse,
            Rtype::NS if at_apex => Synthesis::ApexNs,
            _ => Synthesis::Probe,
        }
    }

    /// Runs the lookups for `qname` and `qtype`.
    pub async fn run<B: Backend + ?Sized>(
        self,
        backend: &B,
        zone: &StoredName,
        qname: &StoredName,
        qtype: Rtype,
    ) -> Result<Synthesized, BackendError> {
        trace!("Synthesizing {qname} {qtype} in {zone} as {self:?}");
        match self {
            Synthesis::Records => {
                let answer = backend.lookup(zone, qname, qtype).await?;
                Ok(Synthesized::from_answer(answer))
            }
            Synthesis::Reverse => {
                let answer = backend.reverse(zone, qname).await?;
                Ok(Synthesized::from_answer(answer))
            }
            Synthesis::RecordsWithGlue => {
                let answer = backend.lookup(zone, qname, qtype).await?;
                let additional = glue(backend, zone, &answer).await;
                Ok(Synthesized { answer, additional })
            }
            Synthesis::ApexNs => {
                let answer = backend.lookup(zone, zone, Rtype::NS).await?;
                let additional = glue(backend, zone, &answer).await;
                Ok(Synthesized { answer, additional })
            }
            Synthesis::Probe => {
                backend.lookup(zone, qname, Rtype::A).await?;
                Ok(Synthesized::default())
            }
        }
    }
}

//------------ Synthesized ---------------------------------------------------

/// The records making up a positive answer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Synthesized {
    pub answer: Vec<StoredRecord>,
    pub additional: Vec<StoredRecord>,
}

impl Synthesized {
    pub fn from_answer(answer: Vec<StoredRecord>) -> Self {
        Synthesized {
            answer,
            additional: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.answer.is_empty()
    }
}

//------------ glue() --------------------------------------------------------

/// Looks up the addresses of targets within the zone.
///
/// The lookups run concurrently, the result keeps the order of the records.
/// Lookup failures only mean there is no glue.
async fn glue<B: Backend + ?Sized>(
    backend: &B,
    zone: &StoredName,
    records: &[StoredRecord],
) -> Vec<StoredRecord> {
    let mut lookups = FuturesOrdered::new();
    for target in records.iter().filter_map(target) {
        if !target.ends_with(zone) {
            continue;
        }
        for rtype in [Rtype::A, Rtype::AAAA] {
            lookups.push_back(async move {
                match backend.lookup(zone, target, rtype).await {
                    Ok(rrs) => rrs
                        .into_iter()
                        .filter(|rr| rr.rtype() == rtype)
                        .collect::<Vec<_>>(),
                    Err(_) => Vec::new(),
                }
            });
        }
    }
    let mut res = Vec::new();
    while let Some(rrs) = lookups.next().await {
        res.extend(rrs);
    }
    res
}

/// Returns the name a record points to, if it is a type that has glue.
fn target(record: &StoredRecord) -> Option<&StoredName> {
    match record.data() {
        ZoneRecordData::Mx(mx) => Some(mx.exchange()),
        ZoneRecordData::Srv(srv) => Some(srv.target()),
        ZoneRecordData::Ns(ns) => Some(ns.nsdname()),
        _ => None,
    }
}

//------------ Tests ---------------------------------------------------------
