use std::io::{Read, Write};

use anyhow::Error;

use crate::event::Event;

/// Shared iterator item type for [`Parser`] and [`Encoder`] implementations.
pub type EventResult = Result<Event, Error>;

/// Common trait for parsers of event traces
pub trait Parser {
    type Iter<R: Read>: Iterator<Item = EventResult>;

    /// Parses an event trace of some specific format.
    fn parse<R: Read>(&mut self, input: R) -> Result<Self::Iter<R>, Error>;

    /// Returns a string identifying the trace format of this parser.
    fn format(&self) -> &'static str;
}

/// Common trait for encoders of event traces
pub trait Encoder {
    /// A constant that indicates the approximate space in bytes an event will occupy.
    const EVENT_SIZE_HINT: usize;

    /// Encodes an event trace into some specific format.
    fn encode<W: Write, I: IntoIterator<Item = EventResult>>(
        &mut self,
        input: I,
        output: W,
    ) -> Result<(), Error>;

    /// Returns a string identifying the trace format of this encoder.
    fn format(&self) -> &'static str;
}
