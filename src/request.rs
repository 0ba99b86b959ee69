//! Incoming requests as seen by plugins.
//!
//! A [`Request`] wraps the received message together with what the
//! transport knows about the client. The question is parsed once, when the
//! request is created, into an owned [`Query`]. Name comparisons in
//! `domain` are case-insensitive, so no further normalization is needed
//! downstream.

use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;
use domain::base::iana::{Class, Rtype};
use domain::base::message_builder::PushError;
use domain::base::{Message, MessageBuilder, ToName};

use crate::error::PluginError;
use crate::types::StoredName;

/// The smallest response size every client must accept over UDP.
const MIN_UDP_SIZE: u16 = 512;

/// The largest message a stream transport can carry.
const MAX_STREAM_SIZE: usize = 65_535;

//------------ Transport -----------------------------------------------------

/// The transport a request was received over.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Transport {
    Udp,
    Tcp,
}

//------------ Query ---------------------------------------------------------

/// The question of a request.
#[derive(Clone, Debug)]
pub struct Query {
    qname: StoredName,
    qtype: Rtype,
    qclass: Class,
}

impl Query {
    pub fn new(qname: StoredName, qtype: Rtype, qclass: Class) -> Self {
        Self {
            qname,
            qtype,
            qclass,
        }
    }

    pub fn qname(&self) -> &StoredName {
        &self.qname
    }

    pub fn qtype(&self) -> Rtype {
        self.qtype
    }

    pub fn qclass(&self) -> Class {
        self.qclass
    }
}

//------------ Request -------------------------------------------------------

/// A DNS request together with its transport context.
#[derive(Clone)]
pub struct Request {
    message: Message<Bytes>,
    client_addr: SocketAddr,
    transport: Transport,
    query: Query,
}

impl Request {
    /// Creates a request from a received message.
    ///
    /// Fails with [`PluginError::FormatError`] unless the message contains
    /// exactly one question.
    pub fn new(
        message: Message<Bytes>,
        client_addr: SocketAddr,
        transport: Transport,
    ) -> Result<Self, PluginError> {
        let query = {
            let question = message
                .sole_question()
                .map_err(|_| PluginError::FormatError)?;
            Query::new(
                question.qname().to_bytes(),
                question.qtype(),
                question.qclass(),
            )
        };
        Ok(Self {
            message,
            client_addr,
            transport,
            query,
        })
    }

    pub fn message(&self) -> &Message<Bytes> {
        &self.message
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn qname(&self) -> &StoredName {
        self.query.qname()
    }

    pub fn qtype(&self) -> Rtype {
        self.query.qtype()
    }

    pub fn qclass(&self) -> Class {
        self.query.qclass()
    }

    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    pub fn client_ip(&self) -> IpAddr {
        self.client_addr.ip()
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// The largest response the client is able to receive.
    ///
    /// For UDP this is the advertised EDNS payload size, but never less
    /// than 512 octets. Stream transports are only limited by the length
    /// prefix.
    pub fn max_response_size(&self) -> usize {
        match self.transport {
            Transport::Tcp => MAX_STREAM_SIZE,
            Transport::Udp => {
                let size = self
                    .message
                    .opt()
                    .map(|opt| opt.udp_payload_size())
                    .unwrap_or(MIN_UDP_SIZE);
                usize::from(size.max(MIN_UDP_SIZE))
            }
        }
    }
}

//------------ mk_query() ----------------------------------------------------

/// Creates a query message with a single question.
pub fn mk_query(
    qname: &impl ToName,
    qtype: Rtype,
    qclass: Class,
) -> Result<Message<Bytes>, PushError> {
    let mut builder = MessageBuilder::new_bytes().question();
    builder.push((qname, qtype, qclass))?;
    Ok(builder.into_message())
}

//------------ Tests ---------------------------------------------------------
