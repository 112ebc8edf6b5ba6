use std::io::{ErrorKind, Read};

use anyhow::{Error, bail, ensure};

use crate::{
    event::{Event, EventKind, SourceSite, ThreadId},
    generic::{EventResult, Parser},
    simbin::{FLAG_ATOMIC, FLAG_IGNORED, FLAG_MASK, FLAG_STACK, RECORD_LEN},
};

/// A parser for event traces in _SimBin_ format.
pub struct SimBinParser;

impl SimBinParser {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for SimBinParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for SimBinParser {
    type Iter<R: Read> = SimBinIterator<R>;

    fn parse<R: Read>(&mut self, input: R) -> Result<Self::Iter<R>, Error> {
        Ok(SimBinIterator::new(input))
    }

    fn format(&self) -> &'static str {
        "SimBin"
    }
}

pub struct SimBinIterator<R: Read> {
    input: R,
    buffer: [u8; RECORD_LEN],
    cursor: usize,
    failed: bool,
}

impl<R: Read> SimBinIterator<R> {
    fn new(input: R) -> Self {
        Self {
            input,
            buffer: [0; RECORD_LEN],
            cursor: 0,
            failed: false,
        }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut bytes = [0; N];
        bytes.copy_from_slice(&self.buffer[self.cursor..self.cursor + N]);
        self.cursor += N;
        bytes
    }

    fn take_u8(&mut self) -> u8 {
        let [byte] = self.take::<1>();
        byte
    }

    fn take_i16(&mut self) -> Result<u32, Error> {
        Ok(u32::try_from(i16::from_be_bytes(self.take()))?)
    }

    fn take_i32(&mut self) -> Result<u32, Error> {
        Ok(u32::try_from(i32::from_be_bytes(self.take()))?)
    }

    fn take_u64(&mut self) -> u64 {
        u64::from_be_bytes(self.take())
    }

    /// Fills the record buffer. Returns `false` on a clean end of stream.
    fn fill(&mut self) -> Result<bool, Error> {
        let mut filled = 0;
        while filled < RECORD_LEN {
            match self.input.read(&mut self.buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => bail!(e),
            }
        }

        match filled {
            0 => Ok(false),
            RECORD_LEN => Ok(true),
            _ => bail!("Trace ended inside a record ({filled} of {RECORD_LEN} bytes)"),
        }
    }

    fn inner_next(&mut self) -> Result<Option<Event>, Error> {
        if !self.fill()? {
            return Ok(None);
        }
        self.cursor = 0;

        let kind = EventKind::try_from_id(self.take_u8())?;
        let semantics = EventKind::try_from_id(self.take_u8())?;
        let tid = ThreadId::try_from(self.take_i16()?)?;

        let mut event = Event::new(kind, tid).with_semantics(semantics);
        event.addr = self.take_u64();
        event.size = self.take_i32()?;

        let flags = self.take_u8();
        ensure!(flags & !FLAG_MASK == 0, "Unknown flag bits: {flags:#010b}");
        event.stack = flags & FLAG_STACK != 0;
        event.atomic = flags & FLAG_ATOMIC != 0;
        event.ignored = flags & FLAG_IGNORED != 0;

        event.value = self.take_u64();
        event.instructions = self.take_i32()?;
        let line = self.take_i16()?;
        let file = self.take_i16()?;
        event.site = SourceSite::new(file, line);
        event.routine = self.take_i16()?;
        event.seq = self.take_i32()?;
        let last_line = self.take_i16()?;
        let last_file = self.take_i16()?;
        event.last_site = SourceSite::new(last_file, last_line);

        Ok(Some(event))
    }
}

impl<R: Read> Iterator for SimBinIterator<R> {
    type Item = EventResult;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let next = self.inner_next().transpose();
        if matches!(next, Some(Err(_))) {
            self.failed = true;
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use anyhow::Error;
    use rand_xoshiro::{
        Xoshiro256PlusPlus,
        rand_core::{RngCore, SeedableRng},
    };

    use super::SimBinParser;
    use crate::{
        event::{Event, EventKind, SourceSite, ThreadId},
        generic::{Encoder, Parser},
        simbin::{RECORD_LEN, encoder::SimBinEncoder},
    };

    fn example_trace() -> Vec<Event> {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);
        let small = |rng: &mut Xoshiro256PlusPlus| rng.next_u32() % (i16::MAX as u32 + 1);

        (0..200)
            .map(|seq| {
                let kind = EventKind::try_from_id((rng.next_u32() % 15) as u8).unwrap();
                let tid = ThreadId::from_host_index(rng.next_u32() % 64);
                let mut event = Event::new(kind, tid)
                    .with_memory(rng.next_u64(), 1 + rng.next_u32() % 64, rng.next_u32() % 2 == 0)
                    .with_opcode(0, rng.next_u32() % 2 == 0)
                    .with_site(
                        SourceSite::new(small(&mut rng), small(&mut rng)),
                        small(&mut rng),
                    )
                    .with_value(rng.next_u64())
                    .with_instructions(rng.next_u32() % 1024);
                event.ignored = rng.next_u32() % 3 == 0;
                event.seq = seq;
                event.last_site = SourceSite::new(small(&mut rng), small(&mut rng));
                event
            })
            .collect()
    }

    #[test]
    fn simbin_trace_roundtrip() -> Result<(), Error> {
        let trace = example_trace();

        let mut buffer = Cursor::new(Vec::new());
        SimBinEncoder::new().encode(trace.iter().cloned().map(Ok), &mut buffer)?;
        let bytes = buffer.into_inner();
        assert_eq!(bytes.len(), trace.len() * RECORD_LEN);

        let parsed: Result<Vec<Event>, Error> =
            SimBinParser::new().parse(bytes.as_slice())?.collect();
        assert_eq!(parsed?, trace);

        Ok(())
    }

    #[test]
    fn parse_empty_trace() -> Result<(), Error> {
        let empty: &[u8] = &[];
        assert_eq!(SimBinParser::new().parse(empty)?.count(), 0);

        Ok(())
    }

    #[test]
    fn fail_on_truncated_record() -> Result<(), Error> {
        let mut buffer = Cursor::new(Vec::new());
        SimBinEncoder::new().encode(example_trace().into_iter().take(2).map(Ok), &mut buffer)?;
        let mut bytes = buffer.into_inner();
        bytes.truncate(RECORD_LEN + 10);

        let mut iter = SimBinParser::new().parse(bytes.as_slice())?;
        iter.next().unwrap()?;
        iter.next().unwrap().unwrap_err();
        assert!(iter.next().is_none());

        Ok(())
    }

    #[test]
    fn fail_on_zero_thread_id() -> Result<(), Error> {
        let mut bytes = vec![0_u8; RECORD_LEN];
        // kind and semantics are valid (MemoryRead), tid stays zero
        let mut iter = SimBinParser::new().parse(bytes.as_slice())?;
        iter.next().unwrap().unwrap_err();

        bytes[3] = 1;
        let mut iter = SimBinParser::new().parse(bytes.as_slice())?;
        iter.next().unwrap()?;

        Ok(())
    }
}
