use std::{fmt, sync::Arc};

use crate::value::Payload;

/// One-shot reply channel handed to a [`MessageHandler`] alongside a request.
///
/// Consuming `self` in [`Replier::reply`] makes "at most one reply per request" a
/// compile-time property. Dropping a replier without replying leaves the requester
/// without an answer; on a network port the listener then closes the connection.
pub struct Replier {
    reply: Box<dyn FnOnce(Payload) + Send>,
}

impl Replier {
    pub fn new<F>(reply: F) -> Self
    where
        F: FnOnce(Payload) + Send + 'static,
    {
        Self {
            reply: Box::new(reply),
        }
    }

    pub fn reply(self, payload: Payload) {
        (self.reply)(payload)
    }
}

impl fmt::Debug for Replier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Replier")
    }
}

/// Receive callback of a port.
///
/// Called with the incoming payload and, when the peer expects an answer, a
/// [`Replier`]. Without a replier the delivery is the terminal leg of a round trip.
/// Any `Fn(Payload, Option<Replier>)` closure is a handler.
#[cfg_attr(test, mockall::automock)]
pub trait MessageHandler: Send + Sync {
    fn handle(&self, payload: Payload, reply: Option<Replier>);
}

impl<F> MessageHandler for F
where
    F: Fn(Payload, Option<Replier>) + Send + Sync,
{
    fn handle(&self, payload: Payload, reply: Option<Replier>) {
        self(payload, reply)
    }
}

/// Secondary callback of a network-receive port, invoked with the reply just before it
/// is written back to the requester.
pub type AckHandler = Arc<dyn Fn(&Payload) + Send + Sync>;
