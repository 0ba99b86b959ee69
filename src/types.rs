//! Record types shared by backends, the resolver and zone transfer.

use bytes::Bytes;
use domain::base::rdata::ComposeRecordData;
use domain::base::{Name, Record};
use domain::rdata::ZoneRecordData;

//------------ Type Aliases --------------------------------------------------

pub type StoredName = Name<Bytes>;
pub type StoredRecordData = ZoneRecordData<Bytes, StoredName>;
pub type StoredRecord = Record<StoredName, StoredRecordData>;

//------------ wire_len() ----------------------------------------------------

/// Size of the record without name compression.
///
/// This is the owner name, the fixed type, class, TTL and length fields,
/// and the record data. Because compression can only shrink a record this
/// is an upper bound for what the record occupies in a message.
pub fn wire_len(record: &StoredRecord) -> usize {
    record.owner().len()
        + 10
        + usize::from(record.data().rdlen(false).unwrap_or(0))
}

//------------ Tests ---------------------------------------------------------
