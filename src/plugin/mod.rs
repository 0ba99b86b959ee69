//! Composable request handlers.
//!
//! A server is assembled from an ordered list of [`Handler`]s, each of them
//! a plugin. A request enters the first handler of a [`Chain`]. A handler
//! either answers the request itself by writing to the [`ResponseWriter`]
//! or hands it on to the rest of the chain through its [`Next`] value and
//! returns whatever that produced.
//!
//! # Who writes the response
//!
//! Handlers return a [`HandlerResult`]. If a handler returns `Ok` with an
//! rcode for which [`client_write`] is true, or returns an error, it has not
//! written anything and the chain's entry point answers the client with
//! that rcode. For every other rcode the handler has written the response
//! itself.

mod chain;
mod recorder;
mod zones;

pub use self::chain::{Chain, ChainBuilder};
pub use self::recorder::Recorder;
pub use self::zones::Zones;

use std::boxed::Box;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use domain::base::iana::Rcode;
use domain::base::Message;

use crate::error::PluginError;
use crate::request::Request;

//------------ Type Aliases --------------------------------------------------

/// The outcome of handling a request.
pub type HandlerResult = Result<Rcode, PluginError>;

/// The future returned by [`Handler::serve`].
pub type HandlerFuture<'a> =
    Pin<Box<dyn Future<Output = HandlerResult> + Send + 'a>>;

/// The future returned by [`ResponseWriter::write`].
pub type WriteFuture<'a> =
    Pin<Box<dyn Future<Output = Result<(), io::Error>> + Send + 'a>>;

//------------ Handler -------------------------------------------------------

/// A plugin that takes part in answering requests.
pub trait Handler: Send + Sync {
    /// The name of the plugin, used in log and error messages.
    fn name(&self) -> &str;

    /// Handles a request.
    ///
    /// The handler may call `next` to pass the request on down the chain.
    fn serve<'a>(
        &'a self,
        request: &'a Request,
        writer: &'a mut dyn ResponseWriter,
        next: Next<'a>,
    ) -> HandlerFuture<'a>;
}

impl<T: Handler + ?Sized> Handler for Arc<T> {
    fn name(&self) -> &str {
        T::name(self)
    }

    fn serve<'a>(
        &'a self,
        request: &'a Request,
        writer: &'a mut dyn ResponseWriter,
        next: Next<'a>,
    ) -> HandlerFuture<'a> {
        T::serve(self, request, writer, next)
    }
}

//------------ ResponseWriter ------------------------------------------------

/// The transport side of a request.
pub trait ResponseWriter: Send {
    /// Sends a response message to the client.
    fn write(&mut self, msg: Message<Vec<u8>>) -> WriteFuture<'_>;

    /// Hands control over the connection to the handler.
    ///
    /// After a zone transfer the server must not close or reuse the
    /// connection on its own; the client decides when it is done.
    fn hijack(&mut self) {}
}

//------------ Next ----------------------------------------------------------

/// The remainder of a chain behind the handler currently running.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    handlers: &'a [Arc<dyn Handler>],
}

impl<'a> Next<'a> {
    pub(crate) fn new(handlers: &'a [Arc<dyn Handler>]) -> Self {
        Next { handlers }
    }

    /// An empty remainder, i.e., the last handler of a chain.
    pub fn end() -> Self {
        Next { handlers: &[] }
    }

    /// Returns whether there is another handler.
    pub fn is_end(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Passes the request on to the next handler.
    ///
    /// Returns `None` if this is the end of the chain.
    pub fn serve(
        self,
        request: &'a Request,
        writer: &'a mut dyn ResponseWriter,
    ) -> Option<HandlerFuture<'a>> {
        let (first, rest) = self.handlers.split_first()?;
        Some(first.serve(request, writer, Next::new(rest)))
    }
}

//------------ next_or_failure() ---------------------------------------------

/// Passes the request down the chain or fails if there is nothing left.
pub async fn next_or_failure<'a>(
    name: &str,
    next: Next<'a>,
    request: &'a Request,
    writer: &'a mut dyn ResponseWriter,
) -> HandlerResult {
    match next.serve(request, writer) {
        Some(fut) => fut.await,
        None => Err(PluginError::NoNextPlugin(name.into())),
    }
}

//------------ client_write() ------------------------------------------------

/// Returns whether a returned rcode still needs to be written to the client.
pub fn client_write(rcode: Rcode) -> bool {
    matches!(
        rcode,
        Rcode::SERVFAIL | Rcode::REFUSED | Rcode::FORMERR | Rcode::NOTIMP
    )
}
