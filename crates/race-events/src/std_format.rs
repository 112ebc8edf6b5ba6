use std::io::Write;

use crate::{
    event::{Event, EventKind, SourceSite},
    generic::{Encoder, EventResult},
    metadata::TraceMetadata,
};

/// An encoder to emit event traces as human readable lines
pub struct StdFormatEncoder {
    names: Option<TraceMetadata>,
}

impl StdFormatEncoder {
    pub fn new() -> Self {
        Self { names: None }
    }

    /// Prints file and routine names instead of their identifiers wherever
    /// `names` knows them.
    pub fn with_names(names: TraceMetadata) -> Self {
        Self { names: Some(names) }
    }

    fn site(&self, site: SourceSite) -> String {
        match self.names.as_ref().and_then(|names| names.file_name(site.file)) {
            Some(file) => format!("{file}:{}", site.line),
            None => format!("f{}:l{}", site.file, site.line),
        }
    }

    fn routine(&self, routine: u32) -> String {
        match self.names.as_ref().and_then(|names| names.routine_name(routine)) {
            Some(name) => name.to_owned(),
            None => format!("r{routine}"),
        }
    }

    fn encode_event(&self, event: &Event) -> String {
        let op = match event.kind {
            EventKind::MemoryRead => format!("r({:#x},{})", event.addr, event.size),
            EventKind::MemoryWriteBegin => format!("w+({:#x},{})", event.addr, event.size),
            EventKind::MemoryWriteCommit => {
                format!("w-({:#x},{})={:#x}", event.addr, event.size, event.value)
            }
            EventKind::LockAcquire => format!("acq(L{:#x})", event.addr),
            EventKind::LockRelease => format!("rel(L{:#x})", event.addr),
            EventKind::LockAcquireAndRelease => format!("relacq(L{:#x})", event.addr),
            EventKind::ThreadStart => format!("start(H{:#x})", event.addr),
            EventKind::ThreadFinish => "finish".into(),
            EventKind::ThreadSpawn => "fork".into(),
            EventKind::ThreadJoin => format!("join(T{},H{:#x})", event.value, event.addr),
            EventKind::RegionOfInterestStart => "roi-begin".into(),
            EventKind::RegionOfInterestEnd => "roi-end".into(),
            EventKind::ServerRegionStart => "server-roi-begin".into(),
            EventKind::ServerRegionEnd => "server-roi-end".into(),
            EventKind::BasicBlockEnter => format!("bb({})", event.instructions),
        };

        let mut flags = Vec::new();
        if event.stack {
            flags.push("stack");
        }
        if event.atomic {
            flags.push("atomic");
        }
        if event.ignored {
            flags.push("ignored");
        }
        if event.semantics != event.kind {
            flags.push("composite");
        }

        let mut line = format!(
            "{}|{}|{}|{}",
            event.tid,
            op,
            self.site(event.site),
            self.routine(event.routine)
        );
        if !flags.is_empty() {
            line.push_str(&format!("|{}", flags.join(",")));
        }

        line
    }
}

impl Default for StdFormatEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for StdFormatEncoder {
    const EVENT_SIZE_HINT: usize = 32;

    fn encode<W: Write, I: IntoIterator<Item = EventResult>>(
        &mut self,
        input: I,
        mut output: W,
    ) -> Result<(), anyhow::Error> {
        for event in input {
            writeln!(output, "{}", self.encode_event(&event?))?
        }

        Ok(())
    }

    fn format(&self) -> &'static str {
        "STD"
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use anyhow::Error;

    use crate::{
        event::{Event, EventKind, SourceSite, ThreadId},
        generic::{Encoder, EventResult},
        metadata::{NameRecord, TraceMetadata},
    };

    use super::StdFormatEncoder;

    #[test]
    fn encode_valid_trace() -> Result<(), Error> {
        let t1 = ThreadId::new(1).unwrap();
        let t2 = ThreadId::new(2).unwrap();
        let site = SourceSite::new(2, 17);

        let trace: Vec<EventResult> = vec![
            Event::new(EventKind::ThreadSpawn, t1),
            Event::new(EventKind::BasicBlockEnter, t2).with_instructions(4),
            Event::new(EventKind::LockAcquire, t2).with_addr(0x40),
            Event::new(EventKind::MemoryRead, t2)
                .with_memory(0x1000, 8, false)
                .with_site(site, 3),
            Event::new(EventKind::MemoryWriteBegin, t2)
                .with_memory(0x1000, 8, true)
                .with_opcode(9, true),
            Event::new(EventKind::MemoryWriteCommit, t2)
                .with_memory(0x1000, 8, true)
                .with_site(site, 3)
                .with_value(0x2a),
            Event::new(EventKind::LockRelease, t2)
                .with_addr(0x40)
                .with_semantics(EventKind::LockAcquireAndRelease),
            Event::new(EventKind::ThreadJoin, t1).with_addr(0x7f00).with_value(2),
        ]
        .into_iter()
        .map(Ok)
        .collect();

        let mut buffer = Cursor::new(Vec::new());
        let mut encoder = StdFormatEncoder::new();
        encoder.encode(trace, &mut buffer)?;

        let encoded_trace = String::from_utf8(buffer.into_inner())?;
        let std_trace: String = [
            "T1|fork|f0:l0|r0",
            "T2|bb(4)|f0:l0|r0",
            "T2|acq(L0x40)|f0:l0|r0",
            "T2|r(0x1000,8)|f2:l17|r3",
            "T2|w+(0x1000,8)|f0:l0|r0|stack,atomic",
            "T2|w-(0x1000,8)=0x2a|f2:l17|r3|stack",
            "T2|rel(L0x40)|f0:l0|r0|composite",
            "T1|join(T2,H0x7f00)|f0:l0|r0\n",
        ]
        .join("\n");

        assert_eq!(std_trace, encoded_trace);

        Ok(())
    }

    #[test]
    fn names_replace_known_identifiers() -> Result<(), Error> {
        let t1 = ThreadId::new(1).unwrap();
        let names = TraceMetadata::new(
            vec![NameRecord {
                id: 1,
                name: "queue.c".into(),
            }],
            vec![NameRecord {
                id: 1,
                name: "push".into(),
            }],
        );

        let trace: Vec<EventResult> = vec![
            Ok(Event::new(EventKind::MemoryRead, t1)
                .with_memory(0x10, 4, false)
                .with_site(SourceSite::new(1, 30), 1)),
            Ok(Event::new(EventKind::MemoryRead, t1)
                .with_memory(0x10, 4, false)
                .with_site(SourceSite::new(2, 5), 4)),
        ];

        let mut buffer = Vec::new();
        StdFormatEncoder::with_names(names).encode(trace, &mut buffer)?;

        assert_eq!(
            String::from_utf8(buffer)?,
            "T1|r(0x10,4)|queue.c:30|push\nT1|r(0x10,4)|f2:l5|r4\n"
        );

        Ok(())
    }
}
