//! Errors returned by plugin handlers.

use std::error;
use std::fmt;

use domain::base::iana::{Class, Rcode, Rtype};
use domain::base::message_builder::PushError;

use crate::backend::BackendError;
use crate::stub::ForwardError;
use crate::transfer::TransferError;

//------------ PluginError ---------------------------------------------------

/// An error that terminated the handling of a single request.
///
/// A handler that returns an error has not written a response. The entry
/// point of the chain answers the client with [`PluginError::rcode`].
#[derive(Clone, Debug)]
pub enum PluginError {
    /// The request did not contain exactly one parseable question.
    FormatError,

    /// The query class is not supported.
    InvalidClass(Class),

    /// A transfer handler was called for a non-transfer query type.
    NotTransfer(Rtype),

    /// Control reached the end of the chain.
    NoNextPlugin(String),

    /// The backend failed for a reason other than a missing name.
    Backend {
        /// The plugin that called the backend.
        plugin: String,

        /// The backend error.
        source: BackendError,
    },

    /// A stub zone upstream could not be reached.
    Forward(ForwardError),

    /// An outgoing zone transfer was aborted.
    Transfer(TransferError),

    /// The response message could not be assembled.
    Compose,
}

impl PluginError {
    /// The response code to send back to the client for this error.
    pub fn rcode(&self) -> Rcode {
        match self {
            Self::FormatError => Rcode::FORMERR,
            Self::NotTransfer(_) => Rcode::REFUSED,
            _ => Rcode::SERVFAIL,
        }
    }
}

//--- Display

impl fmt::Display for PluginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FormatError => f.write_str("malformed request"),
            Self::InvalidClass(class) => {
                write!(f, "can only deal with class IN, not {class}")
            }
            Self::NotTransfer(rtype) => {
                write!(f, "xfr called with non transfer type: {rtype}")
            }
            Self::NoNextPlugin(name) => {
                write!(f, "plugin/{name}: no next plugin found")
            }
            Self::Backend { plugin, source } => {
                write!(f, "plugin/{plugin}: {source}")
            }
            Self::Forward(err) => write!(f, "stub forward failed: {err}"),
            Self::Transfer(err) => write!(f, "transfer aborted: {err}"),
            Self::Compose => f.write_str("unable to assemble response"),
        }
    }
}

//--- Error

impl error::Error for PluginError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Backend { source, .. } => Some(source),
            Self::Forward(err) => Some(err),
            Self::Transfer(err) => Some(err),
            _ => None,
        }
    }
}

//--- From

impl From<PushError> for PluginError {
    fn from(_: PushError) -> Self {
        Self::Compose
    }
}

impl From<ForwardError> for PluginError {
    fn from(err: ForwardError) -> Self {
        Self::Forward(err)
    }
}

impl From<TransferError> for PluginError {
    fn from(err: TransferError) -> Self {
        Self::Transfer(err)
    }
}
