mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use domain::base::iana::{Class, Rcode, Rtype};
use domain::rdata::Txt;

use domain_plugin::backend::memory::StaticBackend;
use domain_plugin::backend::LookupFuture;
use domain_plugin::plugin::{Chain, Recorder, Zones};
use domain_plugin::request::{Request, Transport};
use domain_plugin::transfer::{TransferAcl, TransferSource, Xfr};
use domain_plugin::types::{StoredName, StoredRecord};

use common::*;

fn zones() -> Zones {
    Zones::from_strs(&["example.org."]).unwrap()
}

fn backend(records: impl IntoIterator<Item = StoredRecord>) -> StaticBackend {
    let backend = StaticBackend::new();
    backend.extend(records);
    backend
}

fn chain<S: TransferSource + 'static>(
    source: S,
    acl: TransferAcl,
) -> (Chain, Arc<Fixed>) {
    let next = Arc::new(Fixed::new(Rcode::YXDOMAIN));
    let mut builder = Chain::builder();
    builder.push(Xfr::new(source, zones(), acl));
    builder.push_shared(next.clone());
    (builder.finish(), next)
}

fn axfr(qname: &str) -> Request {
    request_with(qname, Rtype::AXFR, Class::IN, Transport::Tcp)
}

/// Collects the types of all answer records over all messages.
fn rtypes(rec: &Recorder) -> Vec<Rtype> {
    rec.messages()
        .iter()
        .flat_map(|msg| {
            msg.answer()
                .unwrap()
                .map(|rr| rr.unwrap().rtype())
                .collect::<Vec<_>>()
        })
        .collect()
}

/// A source returning a fixed list of records.
struct Canned(Vec<StoredRecord>);

impl TransferSource for Canned {
    fn transfer_records<'a>(
        &'a self,
        _zone: &'a StoredName,
    ) -> LookupFuture<'a> {
        let records = self.0.clone();
        Box::pin(async move { Ok(records) })
    }
}

#[tokio::test]
async fn denied_clients_are_refused() {
    init_logging();
    let acl = TransferAcl::new(&["198.51.100.1"], &[] as &[&str], false)
        .unwrap();
    let (chain, next) = chain(backend([soa("example.org.", 1)]), acl);

    let mut rec = Recorder::new();
    let rcode = chain.serve(&axfr("example.org."), &mut rec).await;
    assert_eq!(rcode, Rcode::REFUSED);
    assert_eq!(rec.rcode(), Some(Rcode::REFUSED));
    assert!(!rec.is_hijacked());
    assert_eq!(next.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn other_types_are_refused() {
    let (chain, _) =
        chain(backend([soa("example.org.", 1)]), TransferAcl::any());

    let req = request("example.org.", Rtype::SOA);
    let mut rec = Recorder::new();
    assert_eq!(chain.serve(&req, &mut rec).await, Rcode::REFUSED);
    assert_eq!(rec.rcode(), Some(Rcode::REFUSED));
}

#[tokio::test]
async fn names_below_the_apex_are_passed_on() {
    let (chain, next) =
        chain(backend([soa("example.org.", 1)]), TransferAcl::any());

    let mut rec = Recorder::new();
    let rcode = chain.serve(&axfr("www.example.org."), &mut rec).await;
    assert_eq!(rcode, Rcode::YXDOMAIN);
    assert!(rec.is_empty());
    assert_eq!(next.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn zones_without_soa_fail() {
    let (empty, _) = chain(Canned(Vec::new()), TransferAcl::any());
    let mut rec = Recorder::new();
    let rcode = empty.serve(&axfr("example.org."), &mut rec).await;
    assert_eq!(rcode, Rcode::SERVFAIL);
    assert_eq!(rec.rcode(), Some(Rcode::SERVFAIL));

    let records = vec![
        a("www.example.org.", [10, 0, 0, 1]),
        soa("example.org.", 1),
    ];
    let (unordered, _) = chain(Canned(records), TransferAcl::any());
    let mut rec = Recorder::new();
    let rcode = unordered.serve(&axfr("example.org."), &mut rec).await;
    assert_eq!(rcode, Rcode::SERVFAIL);
    assert_eq!(rec.len(), 1);
}

#[tokio::test]
async fn ixfr_is_a_full_transfer() {
    let records = vec![
        soa("example.org.", 7),
        a("www.example.org.", [10, 0, 0, 1]),
    ];
    let (chain, _) = chain(backend(records), TransferAcl::any());

    let req =
        request_with("example.org.", Rtype::IXFR, Class::IN, Transport::Tcp);
    let mut rec = Recorder::new();
    assert_eq!(chain.serve(&req, &mut rec).await, Rcode::NOERROR);
    assert_eq!(rtypes(&rec), [Rtype::SOA, Rtype::A, Rtype::SOA]);
}

#[tokio::test]
async fn large_zones_use_several_envelopes() {
    // Around 270 octets per record, so more than one envelope is needed.
    let text = "x".repeat(250);
    let mut records = vec![soa("example.org.", 2024)];
    for idx in 0..300 {
        records.push(record(
            &format!("host{idx}.example.org."),
            Txt::<bytes::Bytes>::build_from_slice(text.as_bytes())
                .unwrap()
                .into(),
        ));
    }
    let source = backend(records);
    let (chain, _) = chain(source, TransferAcl::any());

    let mut rec = Recorder::new();
    let rcode = chain.serve(&axfr("example.org."), &mut rec).await;
    assert_eq!(rcode, Rcode::NOERROR);
    assert!(rec.is_hijacked());
    assert!(rec.len() > 1);
    for msg in rec.messages() {
        assert_eq!(msg.header().rcode(), Rcode::NOERROR);
        assert!(msg.header().aa());
        assert!(msg.as_slice().len() <= 65535);
    }
    let types = rtypes(&rec);
    assert_eq!(types.len(), 302);
    assert_eq!(types.first(), Some(&Rtype::SOA));
    assert_eq!(types.last(), Some(&Rtype::SOA));
    let soas = types.iter().filter(|rtype| **rtype == Rtype::SOA).count();
    assert_eq!(soas, 2);

    // Transferring again yields the same result.
    let mut again = Recorder::new();
    let rcode = chain.serve(&axfr("example.org."), &mut again).await;
    assert_eq!(rcode, Rcode::NOERROR);
    assert_eq!(again.len(), rec.len());
    assert_eq!(rtypes(&again), types);
}
