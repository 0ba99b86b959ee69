use std::sync::Arc;
use std::vec::Vec;

use domain::base::iana::Rcode;
use domain::base::MessageBuilder;
use tracing::{debug, error};

use crate::error::PluginError;
use crate::request::Request;

use super::{client_write, Handler, Next, ResponseWriter};

//------------ ChainBuilder --------------------------------------------------

/// Assembles a [`Chain`] from handlers in the order they are pushed.
#[derive(Default)]
pub struct ChainBuilder {
    handlers: Vec<Arc<dyn Handler>>,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<T>(&mut self, handler: T)
    where
        T: Handler + 'static,
    {
        self.handlers.push(Arc::new(handler));
    }

    pub fn push_shared(&mut self, handler: Arc<dyn Handler>) {
        self.handlers.push(handler);
    }

    pub fn finish(self) -> Chain {
        Chain {
            handlers: Arc::new(self.handlers),
        }
    }
}

//------------ Chain ---------------------------------------------------------

/// An ordered list of handlers.
///
/// The chain is the entry point for requests. It runs the first handler
/// and, if that did not produce a response, writes one on its behalf.
#[derive(Clone)]
pub struct Chain {
    handlers: Arc<Vec<Arc<dyn Handler>>>,
}

impl Chain {
    pub fn builder() -> ChainBuilder {
        ChainBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Handles a request and makes sure the client receives an answer.
    ///
    /// Returns the rcode of the answer.
    pub async fn serve(
        &self,
        request: &Request,
        writer: &mut dyn ResponseWriter,
    ) -> Rcode {
        let res = match Next::new(&self.handlers).serve(request, writer) {
            Some(fut) => fut.await,
            None => Err(PluginError::NoNextPlugin("chain".into())),
        };

        let rcode = match res {
            Ok(rcode) if !client_write(rcode) => return rcode,
            Ok(rcode) => rcode,
            Err(err) => {
                error!(
                    "Failed to serve {} {} from {}: {err}",
                    request.qname(),
                    request.qtype(),
                    request.client_addr()
                );
                err.rcode()
            }
        };

        match error_response(request, rcode) {
            Ok(msg) => {
                if let Err(err) = writer.write(msg).await {
                    debug!("Unable to write error response: {err}");
                }
            }
            Err(err) => error!("Unable to build error response: {err}"),
        }
        rcode
    }
}

//------------ error_response() ----------------------------------------------

/// Creates a response with the given rcode and no records.
pub(crate) fn error_response(
    request: &Request,
    rcode: Rcode,
) -> Result<domain::base::Message<Vec<u8>>, PluginError> {
    let builder = MessageBuilder::new_vec();
    let answer = builder.start_answer(request.message(), rcode)?;
    Ok(answer.into_message())
}

//------------ Tests ---------------------------------------------------------
