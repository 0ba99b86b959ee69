use std::boxed::Box;
use std::vec::Vec;

use domain::base::iana::Rcode;
use domain::base::Message;

use super::{ResponseWriter, WriteFuture};

//------------ Recorder ------------------------------------------------------

/// A response writer that keeps everything written to it.
///
/// Useful for handlers that need to inspect what a nested handler produced
/// and for tests.
#[derive(Default)]
pub struct Recorder {
    messages: Vec<Message<Vec<u8>>>,
    hijacked: bool,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The rcode of the first message written, if any.
    pub fn rcode(&self) -> Option<Rcode> {
        self.messages.first().map(|msg| msg.header().rcode())
    }

    /// The first message written, if any.
    pub fn msg(&self) -> Option<&Message<Vec<u8>>> {
        self.messages.first()
    }

    pub fn messages(&self) -> &[Message<Vec<u8>>] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn is_hijacked(&self) -> bool {
        self.hijacked
    }
}

impl ResponseWriter for Recorder {
    fn write(&mut self, msg: Message<Vec<u8>>) -> WriteFuture<'_> {
        self.messages.push(msg);
        Box::pin(async { Ok(()) })
    }

    fn hijack(&mut self) {
        self.hijacked = true;
    }
}
