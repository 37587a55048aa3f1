//! Typed events flowing from the stream decoder and the client forwarder to
//! the mapper.
//!
//! Delivery is FIFO and non-lossy: the channel is unbounded and the decoder
//! posts events in the order the bytes that produced them were read.

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_util::bytes::Bytes;

/// An event consumed by the mapper.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Event {
    /// A non-empty plain text line (without its line ending) seen outside any
    /// markup element.
    Line(Bytes),

    /// The direction extracted from a self-closing `<movement dir=…/>` tag.
    Movement(Bytes),

    /// The text of a `<name>` element.
    Name(Bytes),

    /// The text of a `<description>` element.
    Description(Bytes),

    /// The text of an `<exits>` element.
    Exits(Bytes),

    /// The text of a `<prompt>` element.
    Prompt(Bytes),

    /// The accumulated text of a whole `<room>` element, delivered at
    /// `</room>`.
    Dynamic(Bytes),

    /// A prompt terminator (IAC-GA) was received.
    IacGa,

    /// A client payload whose leading token matched a registered user
    /// command.
    UserData(Bytes),

    /// The session is ending; the mapper drains and exits.
    Shutdown,
}

pub type EventSender = UnboundedSender<Event>;
pub type EventReceiver = UnboundedReceiver<Event>;

#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    unbounded_channel()
}
