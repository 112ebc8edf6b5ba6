use std::io::Write;

use anyhow::Error;

use crate::{
    event::Event,
    generic::{Encoder, EventResult},
    simbin::{FLAG_ATOMIC, FLAG_IGNORED, FLAG_STACK, RECORD_LEN},
};

/// An encoder to emit event traces in the _SimBin_ format read by the simulator
pub struct SimBinEncoder {
    record: Vec<u8>,
}

impl SimBinEncoder {
    pub fn new() -> Self {
        Self {
            record: Vec::with_capacity(RECORD_LEN),
        }
    }

    fn encode_event(&mut self, event: &Event) -> Result<&[u8], Error> {
        let mut flags = 0;
        if event.stack {
            flags |= FLAG_STACK;
        }
        if event.atomic {
            flags |= FLAG_ATOMIC;
        }
        if event.ignored {
            flags |= FLAG_IGNORED;
        }

        let record = &mut self.record;
        record.clear();
        record.push(event.kind.id());
        record.push(event.semantics.id());
        record.extend(i16::try_from(event.tid.get())?.to_be_bytes());
        record.extend(event.addr.to_be_bytes());
        record.extend(i32::try_from(event.size)?.to_be_bytes());
        record.push(flags);
        record.extend(event.value.to_be_bytes());
        record.extend(i32::try_from(event.instructions)?.to_be_bytes());
        record.extend(i16::try_from(event.site.line)?.to_be_bytes());
        record.extend(i16::try_from(event.site.file)?.to_be_bytes());
        record.extend(i16::try_from(event.routine)?.to_be_bytes());
        record.extend(i32::try_from(event.seq)?.to_be_bytes());
        record.extend(i16::try_from(event.last_site.line)?.to_be_bytes());
        record.extend(i16::try_from(event.last_site.file)?.to_be_bytes());

        debug_assert_eq!(record.len(), RECORD_LEN);

        Ok(&self.record)
    }
}

impl Default for SimBinEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for SimBinEncoder {
    const EVENT_SIZE_HINT: usize = RECORD_LEN;

    fn encode<W: Write, I: IntoIterator<Item = EventResult>>(
        &mut self,
        input: I,
        mut output: W,
    ) -> Result<(), Error> {
        for event in input {
            output.write_all(self.encode_event(&event?)?)?;
        }

        Ok(())
    }

    fn format(&self) -> &'static str {
        "SimBin"
    }
}
