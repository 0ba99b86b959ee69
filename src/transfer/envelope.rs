//! Streaming a zone in size-bounded envelopes.
//!
//! A zone transfer can be much larger than a single DNS message. The records
//! are therefore split into envelopes, each sent as its own response
//! message. An envelope is closed as soon as adding the next record would
//! push the estimated wire size of its records past [`ENVELOPE_SIZE`]; that
//! record then opens the next envelope.

use std::vec::Vec;

use bytes::Bytes;
use domain::base::iana::Rcode;
use domain::base::{Message, MessageBuilder};
use tokio::sync::mpsc;
use tracing::trace;

use crate::plugin::ResponseWriter;
use crate::request::Request;
use crate::types::{wire_len, StoredRecord};

use super::TransferError;

/// Start a new envelope once the records of the current one exceed this.
pub const ENVELOPE_SIZE: usize = 32_000;

//------------ Envelopes -----------------------------------------------------

/// An iterator over the envelopes of a record set.
///
/// Never produces an empty envelope. A record that is on its own larger than
/// [`ENVELOPE_SIZE`] travels in an envelope by itself.
#[derive(Clone, Debug)]
pub struct Envelopes<'a> {
    records: &'a [StoredRecord],
    limit: usize,
    pos: usize,
}

impl<'a> Envelopes<'a> {
    pub fn new(records: &'a [StoredRecord]) -> Self {
        Self::with_limit(records, ENVELOPE_SIZE)
    }

    pub fn with_limit(records: &'a [StoredRecord], limit: usize) -> Self {
        Envelopes {
            records,
            limit,
            pos: 0,
        }
    }
}

impl<'a> Iterator for Envelopes<'a> {
    type Item = &'a [StoredRecord];

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.pos;
        if start >= self.records.len() {
            return None;
        }
        let mut size = 0;
        let mut end = start;
        while let Some(record) = self.records.get(end) {
            size += wire_len(record);
            if size > self.limit && end > start {
                break;
            }
            end += 1;
        }
        self.pos = end;
        Some(&self.records[start..end])
    }
}

//------------ out() ---------------------------------------------------------

/// Streams `records` to the client as a zone transfer.
///
/// The first record must be the zone's SOA. It is repeated at the end to
/// close the transfer; this is not checked. Envelopes are assembled by a
/// separate task and handed over through a channel of capacity one so the
/// producer never runs ahead of the transport by more than a single
/// envelope. If writing fails the channel is dropped which stops the
/// producer.
///
/// On success the writer is hijacked, leaving it to the client to close the
/// connection, and the number of envelopes sent is returned.
pub async fn out(
    request: &Request,
    writer: &mut dyn ResponseWriter,
    mut records: Vec<StoredRecord>,
) -> Result<usize, TransferError> {
    if let Some(soa) = records.first().cloned() {
        records.push(soa);
    }

    let (tx, mut rx) = mpsc::channel(1);
    let query = request.message().clone();
    let producer = tokio::spawn(async move {
        for (idx, envelope) in Envelopes::new(&records).enumerate() {
            trace!("Flushing envelope {idx} with {} records", envelope.len());
            let msg = envelope_message(&query, envelope);
            let failed = msg.is_err();
            if tx.send(msg).await.is_err() || failed {
                break;
            }
        }
    });

    let mut sent = 0;
    while let Some(msg) = rx.recv().await {
        writer
            .write(msg?)
            .await
            .map_err(|err| TransferError::Write(err.kind()))?;
        sent += 1;
    }
    producer.await.map_err(|_| TransferError::Producer)?;

    writer.hijack();
    Ok(sent)
}

/// Creates the response message for a single envelope.
fn envelope_message(
    query: &Message<Bytes>,
    records: &[StoredRecord],
) -> Result<Message<Vec<u8>>, TransferError> {
    let mut answer = MessageBuilder::new_vec()
        .start_answer(query, Rcode::NOERROR)
        .map_err(|_| TransferError::Compose)?;
    answer.header_mut().set_aa(true);
    for record in records {
        answer.push(record).map_err(|_| TransferError::Compose)?;
    }
    Ok(answer.into_message())
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use core::str::FromStr;
    use std::io;

    use domain::base::iana::{Class, Rtype};
    use domain::base::{Serial, Ttl};
    use domain::rdata::{Soa, Txt, ZoneRecordData};

    use super::*;
    use crate::plugin::{Recorder, WriteFuture};
    use crate::request::{mk_query, Transport};
    use crate::types::StoredName;

    fn name(s: &str) -> StoredName {
        StoredName::from_str(s).unwrap()
    }

    fn soa() -> StoredRecord {
        StoredRecord::new(
            name("example.org."),
            Class::IN,
            Ttl::from_secs(3600),
            ZoneRecordData::Soa(Soa::new(
                name("ns.example.org."),
                name("hostmaster.example.org."),
                Serial(2024010101),
                Ttl::from_secs(7200),
                Ttl::from_secs(1800),
                Ttl::from_secs(86400),
                Ttl::from_secs(60),
            )),
        )
    }

    /// A TXT record whose estimated wire size is exactly `size`.
    ///
    /// Keeps the text within a single character string, so `size` must
    /// stay below 275 or so.
    fn txt(idx: usize, size: usize) -> StoredRecord {
        let owner = name(&format!("r{idx:05}.example.org."));
        // owner, fixed fields and the length octet of the single string.
        let overhead = owner.len() + 10 + 1;
        let text = vec![b'x'; size - overhead];
        let record = StoredRecord::new(
            owner,
            Class::IN,
            Ttl::from_secs(60),
            ZoneRecordData::Txt(Txt::build_from_slice(&text).unwrap()),
        );
        assert_eq!(wire_len(&record), size);
        record
    }

    fn request() -> Request {
        let msg = mk_query(&name("example.org."), Rtype::AXFR, Class::IN)
            .unwrap();
        Request::new(msg, "192.0.2.1:5353".parse().unwrap(), Transport::Tcp)
            .unwrap()
    }

    #[test]
    fn envelopes_break_where_the_sum_first_exceeds_the_limit() {
        let records: Vec<_> = (0..7).map(|idx| txt(idx, 100)).collect();
        let sizes: Vec<_> = Envelopes::with_limit(&records, 250)
            .map(|envelope| envelope.len())
            .collect();
        // 100 + 100 fits, the third pushes the sum to 300.
        assert_eq!(sizes, [2, 2, 2, 1]);
    }

    #[test]
    fn exact_limit_does_not_break() {
        let records: Vec<_> = (0..4).map(|idx| txt(idx, 100)).collect();
        let sizes: Vec<_> = Envelopes::with_limit(&records, 200)
            .map(|envelope| envelope.len())
            .collect();
        assert_eq!(sizes, [2, 2]);
    }

    #[test]
    fn oversized_record_gets_its_own_envelope() {
        let records = vec![txt(0, 100), txt(1, 200), txt(2, 100)];
        let sizes: Vec<_> = Envelopes::with_limit(&records, 150)
            .map(|envelope| envelope.len())
            .collect();
        assert_eq!(sizes, [1, 1, 1]);
    }

    #[test]
    fn no_envelopes_for_no_records() {
        assert_eq!(Envelopes::new(&[]).count(), 0);
    }

    #[test]
    fn envelopes_are_deterministic() {
        let mut records = vec![soa()];
        records.extend((0..1000).map(|idx| txt(idx, 120)));
        let first: Vec<_> = Envelopes::new(&records).collect();
        let second: Vec<_> = Envelopes::new(&records).collect();
        assert_eq!(first, second);
        assert!(first.len() > 1);
        assert!(first.iter().all(|envelope| {
            envelope.iter().map(wire_len).sum::<usize>() <= ENVELOPE_SIZE
        }));
        let total: usize = first.iter().map(|envelope| envelope.len()).sum();
        assert_eq!(total, records.len());
    }

    #[tokio::test]
    async fn transfer_is_framed_by_soa() {
        let mut records = vec![soa()];
        records.extend((0..600).map(|idx| txt(idx, 120)));

        let mut rec = Recorder::new();
        let sent = out(&request(), &mut rec, records.clone()).await.unwrap();

        assert_eq!(sent, rec.len());
        assert!(sent > 1);
        assert!(rec.is_hijacked());

        let mut answers = Vec::new();
        for msg in rec.messages() {
            assert!(msg.header().aa());
            assert_eq!(msg.header().rcode(), Rcode::NOERROR);
            for rr in msg.answer().unwrap() {
                let rr = rr.unwrap();
                answers.push(rr.rtype());
            }
        }
        assert_eq!(answers.len(), records.len() + 1);
        assert_eq!(answers.first(), Some(&Rtype::SOA));
        assert_eq!(answers.last(), Some(&Rtype::SOA));
        assert_eq!(
            answers.iter().filter(|rtype| **rtype == Rtype::SOA).count(),
            2
        );
    }

    /// A writer whose connection breaks on the write numbered `fail_at`.
    struct Broken {
        writes: usize,
        fail_at: usize,
        hijacked: bool,
    }

    impl ResponseWriter for Broken {
        fn write(&mut self, _msg: Message<Vec<u8>>) -> WriteFuture<'_> {
            self.writes += 1;
            let res = if self.writes >= self.fail_at {
                Err(io::Error::from(io::ErrorKind::BrokenPipe))
            } else {
                Ok(())
            };
            Box::pin(async move { res })
        }

        fn hijack(&mut self) {
            self.hijacked = true;
        }
    }

    #[tokio::test]
    async fn disconnect_stops_the_transfer() {
        let mut records = vec![soa()];
        records.extend((0..1000).map(|idx| txt(idx, 120)));
        assert!(Envelopes::new(&records).count() > 2);

        let mut writer = Broken {
            writes: 0,
            fail_at: 2,
            hijacked: false,
        };
        let res = out(&request(), &mut writer, records).await;
        assert!(matches!(
            res,
            Err(TransferError::Write(io::ErrorKind::BrokenPipe))
        ));
        assert_eq!(writer.writes, 2);
        assert!(!writer.hijacked);
    }
}
