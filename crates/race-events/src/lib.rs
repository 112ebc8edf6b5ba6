use std::io::{Read, Write};

use anyhow::Error;

use crate::generic::{Encoder, Parser};

/// The event data model shared with the simulator
pub mod event;

/// Generic traits for parsing and encoding of event traces
pub mod generic;

/// Name tables that accompany a binary trace
pub mod metadata;
mod simbin;
mod std_format;

/// In-memory collection of events
pub mod tracing;

pub use event::{Event, EventKind, SourceSite, ThreadId};
pub use simbin::{encoder::SimBinEncoder, parser::SimBinParser};
pub use std_format::StdFormatEncoder;
pub use tracing::EventSink;

/// Converts an event trace from one format into another
pub fn convert<P: Parser, E: Encoder, I: Read, O: Write>(
    parser: &mut P,
    encoder: &mut E,
    input: I,
    mut output: O,
) -> Result<(), Error> {
    log::debug!("Converting {} trace to {}", parser.format(), encoder.format());

    encoder.encode(parser.parse(input)?, &mut output)?;

    output.flush()?;

    Ok(())
}
