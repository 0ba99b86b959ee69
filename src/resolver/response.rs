//! Assembling response messages.

use std::vec::Vec;

use domain::base::iana::Rcode;
use domain::base::message_builder::{
    AdditionalBuilder, AnswerBuilder, MessageBuilder, StaticCompressor,
};
use domain::base::Message;
use tracing::trace;

use crate::error::PluginError;
use crate::request::{Request, Transport};
use crate::types::{wire_len, StoredRecord};

use super::synth::Synthesized;

/// Size of the message header.
const HEADER_LEN: usize = 12;

/// Size of an OPT record without options.
const OPT_LEN: usize = 11;

type Target = StaticCompressor<Vec<u8>>;

//------------ answer() ------------------------------------------------------

/// Creates a positive authoritative answer.
///
/// Duplicate records are removed. If the records don't fit into the
/// largest response the client accepts, additional records are dropped
/// first, then answer records. Dropping answers sets the TC bit for UDP.
/// The question is always kept.
pub fn answer(
    request: &Request,
    records: Synthesized,
) -> Result<Message<Vec<u8>>, PluginError> {
    let Synthesized {
        mut answer,
        mut additional,
    } = records;
    dedup(&mut answer);
    dedup(&mut additional);
    additional.retain(|rr| !answer.contains(rr));

    let truncated = fit(request, &mut answer, &mut additional);
    if truncated {
        trace!("Truncated answer for {} {}", request.qname(), request.qtype());
    }

    let mut builder = start(request, Rcode::NOERROR)?;
    builder.header_mut().set_tc(truncated);
    for rr in &answer {
        builder.push(rr)?;
    }
    let mut builder = builder.additional();
    for rr in &additional {
        builder.push(rr)?;
    }
    finish(request, builder)
}

//------------ negative() ----------------------------------------------------

/// Creates an authoritative answer without answer records.
///
/// This is used for NXDOMAIN and NODATA. If given, the zone's SOA record is
/// placed in the authority section.
pub fn negative(
    request: &Request,
    rcode: Rcode,
    soa: Option<&StoredRecord>,
) -> Result<Message<Vec<u8>>, PluginError> {
    let mut builder = start(request, rcode)?.authority();
    if let Some(soa) = soa {
        builder.push(soa)?;
    }
    finish(request, builder.additional())
}

//------------ Helpers -------------------------------------------------------

fn start(
    request: &Request,
    rcode: Rcode,
) -> Result<AnswerBuilder<Target>, PluginError> {
    let target = StaticCompressor::new(Vec::new());
    let builder =
        MessageBuilder::from_target(target).map_err(|_| PluginError::Compose)?;
    let mut builder = builder.start_answer(request.message(), rcode)?;
    let header = builder.header_mut();
    header.set_aa(true);
    header.set_ra(true);
    Ok(builder)
}

fn finish(
    request: &Request,
    mut builder: AdditionalBuilder<Target>,
) -> Result<Message<Vec<u8>>, PluginError> {
    if let Some(opt) = request.message().opt() {
        let size = opt.udp_payload_size();
        builder.opt(|opt| {
            opt.set_udp_payload_size(size);
            Ok(())
        })?;
    }
    Message::from_octets(builder.finish().into_target())
        .map_err(|_| PluginError::Compose)
}

/// Removes repeated records keeping the first of each.
fn dedup(records: &mut Vec<StoredRecord>) {
    let mut seen: Vec<StoredRecord> = Vec::with_capacity(records.len());
    records.retain(|rr| {
        if seen.contains(rr) {
            false
        } else {
            seen.push(rr.clone());
            true
        }
    });
}

/// Drops records until the estimated message size fits the request.
///
/// Returns whether answer records had to be dropped on UDP.
fn fit(
    request: &Request,
    answer: &mut Vec<StoredRecord>,
    additional: &mut Vec<StoredRecord>,
) -> bool {
    let limit = request.max_response_size();
    let mut size = HEADER_LEN + request.qname().len() + 4;
    if request.message().opt().is_some() {
        size += OPT_LEN;
    }
    size += answer.iter().map(wire_len).sum::<usize>();
    size += additional.iter().map(wire_len).sum::<usize>();

    while size > limit {
        match additional.pop() {
            Some(rr) => size -= wire_len(&rr),
            None => break,
        }
    }
    let mut dropped = false;
    while size > limit {
        match answer.pop() {
            Some(rr) => {
                size -= wire_len(&rr);
                dropped = true;
            }
            None => break,
        }
    }
    dropped && request.transport() == Transport::Udp
}

//------------ Tests ---------------------------------------------------------
