use std::{path::Path, sync::Arc};

use anyhow::Error;
use race_events::{
    metadata::TraceMetadata,
    tracing::{BinaryTraceOutput, Tracing},
};
use racegrind_core::knobs::Knobs;

use crate::{program::Program, runtime::ScriptedRuntime};

/// Scripted programs executed by the [`ScriptedRuntime`].
pub mod program;

/// A deterministic, scripted instrumentation host.
pub mod runtime;
mod tmgmt;

/// The events and name tables of a finished run.
pub struct RunOutput {
    pub tracing: Arc<Tracing>,
    pub metadata: TraceMetadata,
}

impl RunOutput {
    /// Encodes the collected events as a binary trace.
    ///
    /// # Errors
    ///
    /// Fails if the trace lock was poisoned or an event does not fit the
    /// binary record layout.
    pub fn generate_binary_trace(&self) -> Result<BinaryTraceOutput, Error> {
        self.tracing.generate_binary_trace(self.metadata.clone())
    }
}

/// Runs a scripted program under the instrumentation front-end and collects
/// every emitted event in memory.
///
/// # Errors
///
/// This function may fail in the following cases:
/// - The program references routines, blocks or threads it does not define.
/// - An image provides `pthread_self` at an invalid address, or a thread
///   starts before any image provided it at all.
/// - Every remaining thread waits for another one.
///
/// # Examples
/// ```no_run
/// # use anyhow::Error;
/// # fn main() -> Result<(), Error> {
/// use racegrind::program::Program;
/// use racegrind_core::knobs::Knobs;
///
/// let program = Program::from_file("program.json")?;
/// let output = racegrind::trace(program, Knobs::default())?;
/// for event in output.tracing.events()? {
///     println!("{event:?}");
/// }
/// # Ok(())
/// # }
/// ```
pub fn trace(program: Program, knobs: Knobs) -> Result<RunOutput, Error> {
    let tracing = Arc::new(Tracing::new());
    let mut runtime = ScriptedRuntime::new(program, knobs, tracing.clone())?;
    runtime.run()?;

    Ok(RunOutput {
        tracing,
        metadata: runtime.frontend().metadata(),
    })
}

/// Loads a scripted program from a JSON file, runs it and returns the binary
/// trace together with its name tables.
///
/// Refer to [`trace`] for the possible errors.
pub fn racegrind<P: AsRef<Path>>(program: P, knobs: Knobs) -> Result<BinaryTraceOutput, Error> {
    trace(Program::from_file(program)?, knobs)?.generate_binary_trace()
}

#[cfg(test)]
mod tests {
    use anyhow::Error;
    use race_events::{Event, EventKind, SourceSite, ThreadId};
    use racegrind_core::knobs::Knobs;

    use crate::{RunOutput, program::Program};

    const LOCK: u64 = 0x6000;
    const X: u64 = 0x9000;

    /// Two libraries and the application. Block 0 writes `X` and falls through;
    /// block 1 is a prefetch; block 2 stores and branches away; block 3
    /// touches memory inside the lock implementation.
    fn program(threads: &str) -> String {
        format!(
            r#"{{
            "images": [
                {{ "name": "app", "kind": "MainExecutable", "routines": [
                    {{ "name": "main", "address": 4096 }},
                    {{ "name": "worker", "address": 8192 }},
                    {{ "name": "__parsec_roi_begin", "address": 12288 }}
                ] }},
                {{ "name": "libpthread.so", "kind": "SharedLibrary", "routines": [
                    {{ "name": "pthread_self", "address": 256 }},
                    {{ "name": "pthread_create", "address": 512 }},
                    {{ "name": "pthread_join", "address": 768 }},
                    {{ "name": "pthread_mutex_lock", "address": 1024 }},
                    {{ "name": "pthread_mutex_unlock", "address": 1280 }},
                    {{ "name": "pthread_rwlock_wrlock", "address": 1536 }},
                    {{ "name": "__pthread_rwlock_wrlock_slow", "address": 1792 }},
                    {{ "name": "pthread_cond_wait", "address": 2048 }}
                ] }},
                {{ "name": "libc.so", "kind": "SharedLibrary", "routines": [
                    {{ "name": "strlen", "address": 2304 }}
                ] }}
            ],
            "blocks": [
                {{ "instructions": [
                    {{ "address": 8200, "opcode": 7, "file": "worker.c", "line": 12, "routine": "worker", "write": true }}
                ] }},
                {{ "instructions": [
                    {{ "address": 8208, "file": "worker.c", "line": 13, "routine": "worker", "read": true, "prefetch": true }}
                ] }},
                {{ "instructions": [
                    {{ "address": 8216, "file": "worker.c", "line": 14, "routine": "worker", "write": true, "branch": true, "no_fall_through": true }}
                ] }},
                {{ "instructions": [
                    {{ "address": 1032, "routine": "pthread_mutex_lock", "read": true, "write": true, "atomic": true }}
                ] }}
            ],
            "threads": {threads}
        }}"#
        )
    }

    fn run(threads: &str, knobs: Knobs) -> Result<RunOutput, Error> {
        crate::trace(Program::from_json(&program(threads))?, knobs)
    }

    fn tid(id: u32) -> ThreadId {
        ThreadId::new(id).unwrap()
    }

    /// Drops the events every thread produces regardless of what it runs.
    fn significant(events: Vec<Event>) -> Vec<Event> {
        events
            .into_iter()
            .filter(|event| {
                !matches!(
                    event.kind,
                    EventKind::ThreadStart | EventKind::ThreadFinish | EventKind::BasicBlockEnter
                )
            })
            .collect()
    }

    fn kinds(events: &[Event]) -> Vec<EventKind> {
        events.iter().map(|event| event.kind).collect()
    }

    const LOCKED_WRITE: &str = r#"[
        { "op": "call", "routine": "pthread_mutex_lock", "args": [24576, 0, 0, 0] },
        { "op": "block", "block": 3, "execs": [ { "read_ea": 24576, "read_size": 4, "write_ea": 24576, "write_size": 4, "value": 1 } ] },
        { "op": "return" },
        { "op": "block", "block": 0, "execs": [ { "write_ea": 36864, "write_size": 8, "value": 42 } ] },
        { "op": "call", "routine": "pthread_mutex_unlock", "args": [24576, 0, 0, 0] },
        { "op": "return" }
    ]"#;

    #[test]
    fn two_threads_lock_write_unlock() -> Result<(), Error> {
        let threads = format!(
            r#"[ {{ "native_handle": 4096, "steps": {LOCKED_WRITE} }},
                 {{ "native_handle": 8192, "steps": {LOCKED_WRITE} }} ]"#
        );
        let output = run(&threads, Knobs::default())?;

        for thread in [tid(1), tid(2)] {
            let events: Vec<Event> = significant(output.tracing.thread_events(thread)?)
                .into_iter()
                .filter(|event| !event.ignored)
                .collect();

            assert_eq!(
                kinds(&events),
                vec![
                    EventKind::LockAcquire,
                    EventKind::MemoryWriteBegin,
                    EventKind::MemoryWriteCommit,
                    EventKind::LockRelease,
                ]
            );
            assert_eq!(events[0].addr, LOCK);
            assert_eq!(events[1].addr, X);
            assert_eq!(events[2].addr, X);
            assert_eq!(events[2].value, 42);
            assert_eq!(events[2].site.line, 12);
            assert_eq!(events[3].addr, LOCK);

            let seqs: Vec<u32> = output
                .tracing
                .thread_events(thread)?
                .iter()
                .map(|event| event.seq)
                .collect();
            assert!(seqs.windows(2).all(|pair| pair[0] + 1 == pair[1]));
        }

        Ok(())
    }

    #[test]
    fn lock_internals_are_flagged_as_ignored() -> Result<(), Error> {
        let threads = format!(r#"[ {{ "native_handle": 4096, "steps": {LOCKED_WRITE} }} ]"#);
        let events = significant(run(&threads, Knobs::default())?.tracing.thread_events(tid(1))?);

        let ignored: Vec<EventKind> = events
            .iter()
            .filter(|event| event.ignored)
            .map(|event| event.kind)
            .collect();
        assert_eq!(
            ignored,
            vec![
                EventKind::MemoryRead,
                EventKind::MemoryWriteBegin,
                EventKind::MemoryWriteCommit
            ]
        );
        assert!(events.iter().filter(|event| event.ignored).all(|event| event.atomic));

        Ok(())
    }

    #[test]
    fn lock_internals_are_plain_without_brackets() -> Result<(), Error> {
        let threads = format!(r#"[ {{ "native_handle": 4096, "steps": {LOCKED_WRITE} }} ]"#);
        let knobs = Knobs {
            ignore_sync_internals: false,
            ..Knobs::default()
        };
        let events = run(&threads, knobs)?.tracing.thread_events(tid(1))?;
        assert!(events.iter().all(|event| !event.ignored));

        Ok(())
    }

    #[test]
    fn prefetch_produces_no_memory_events() -> Result<(), Error> {
        let threads = r#"[ { "native_handle": 4096, "steps": [
            { "op": "call", "routine": "worker" },
            { "op": "block", "block": 1, "execs": [ { "read_ea": 36864, "read_size": 64 } ] },
            { "op": "return" }
        ] } ]"#;

        let skipped = run(threads, Knobs::default())?;
        let events = skipped.tracing.thread_events(tid(1))?;
        assert!(events.iter().all(|event| !event.kind.is_memory()));
        assert!(events.iter().any(|event| event.kind == EventKind::BasicBlockEnter));

        let kept = run(
            threads,
            Knobs {
                ignore_prefetch: false,
                ..Knobs::default()
            },
        )?;
        let reads = kept
            .tracing
            .thread_events(tid(1))?
            .into_iter()
            .filter(|event| event.kind == EventKind::MemoryRead)
            .count();
        assert_eq!(reads, 1);

        Ok(())
    }

    #[test]
    fn join_is_reported_once_after_completion() -> Result<(), Error> {
        let threads = r#"[
            { "native_handle": 4096, "steps": [
                { "op": "call", "routine": "pthread_create", "args": [65536, 0, 8192, 0], "spawn": 1 },
                { "op": "return" },
                { "op": "wait_for", "thread": 1 },
                { "op": "call", "routine": "pthread_join", "args": [8192, 0, 0, 0] },
                { "op": "return" }
            ] },
            { "native_handle": 8192, "steps": [
                { "op": "call", "routine": "worker" },
                { "op": "block", "block": 0, "execs": [ { "write_ea": 36864, "write_size": 8 } ] },
                { "op": "return" }
            ] }
        ]"#;
        let output = run(threads, Knobs::default())?;

        let main = significant(output.tracing.thread_events(tid(1))?);
        assert_eq!(
            kinds(&main),
            vec![EventKind::ThreadSpawn, EventKind::ThreadJoin]
        );
        assert_eq!(main[1].addr, 8192);
        assert_eq!(main[1].value, 2);

        // The child only starts once its creation was reported
        let events = output.tracing.events()?;
        let spawn = events
            .iter()
            .position(|event| event.kind == EventKind::ThreadSpawn)
            .unwrap();
        let start = events
            .iter()
            .position(|event| event.tid == tid(2) && event.kind == EventKind::ThreadStart)
            .unwrap();
        assert!(spawn < start);

        // The joined thread finished before the join was reported
        let finish = events
            .iter()
            .position(|event| event.tid == tid(2) && event.kind == EventKind::ThreadFinish)
            .unwrap();
        let join = events
            .iter()
            .position(|event| event.kind == EventKind::ThreadJoin)
            .unwrap();
        assert!(finish < join);

        Ok(())
    }

    #[test]
    fn write_commits_on_taken_branch_once() -> Result<(), Error> {
        let threads = r#"[ { "native_handle": 4096, "steps": [
            { "op": "call", "routine": "worker" },
            { "op": "block", "block": 2, "execs": [ { "taken": true, "write_ea": 36864, "write_size": 4, "value": 7 } ] },
            { "op": "block", "block": 2, "execs": [ { "executes": false, "write_ea": 36864, "write_size": 4 } ] },
            { "op": "return" }
        ] } ]"#;
        let events = significant(run(threads, Knobs::default())?.tracing.thread_events(tid(1))?);

        assert_eq!(
            kinds(&events),
            vec![EventKind::MemoryWriteBegin, EventKind::MemoryWriteCommit]
        );
        assert_eq!(events[1].value, 7);
        assert_eq!(events[1].site, SourceSite::new(1, 14));

        Ok(())
    }

    #[test]
    fn tail_called_slow_path_leaves_depth_balanced() -> Result<(), Error> {
        let threads = r#"[ { "native_handle": 4096, "steps": [
            { "op": "call", "routine": "pthread_rwlock_wrlock", "args": [28672, 0, 0, 0] },
            { "op": "tail_call", "routine": "__pthread_rwlock_wrlock_slow", "args": [28672, 0, 0, 0] },
            { "op": "return" },
            { "op": "call", "routine": "worker" },
            { "op": "block", "block": 0, "execs": [ { "write_ea": 36864, "write_size": 8 } ] },
            { "op": "return" }
        ] } ]"#;
        let events = significant(run(threads, Knobs::default())?.tracing.thread_events(tid(1))?);

        assert_eq!(
            kinds(&events),
            vec![
                EventKind::LockAcquire,
                EventKind::MemoryWriteBegin,
                EventKind::MemoryWriteCommit
            ]
        );
        assert!(events.iter().all(|event| !event.ignored));
        assert_eq!(events[0].addr, 0x7000);

        Ok(())
    }

    #[test]
    fn condition_wait_is_a_release_acquire_pair() -> Result<(), Error> {
        let threads = r#"[ { "native_handle": 4096, "steps": [
            { "op": "call", "routine": "pthread_cond_wait", "args": [20480, 24576, 0, 0] },
            { "op": "return" }
        ] } ]"#;
        let events = significant(run(threads, Knobs::default())?.tracing.thread_events(tid(1))?);

        assert_eq!(
            kinds(&events),
            vec![EventKind::LockRelease, EventKind::LockAcquire]
        );
        for event in &events {
            assert_eq!(event.addr, LOCK);
            assert_eq!(event.semantics, EventKind::LockAcquireAndRelease);
            assert!(!event.ignored);
        }

        Ok(())
    }

    #[test]
    fn region_markers_and_replaced_strlen() -> Result<(), Error> {
        let threads = r#"[ { "native_handle": 4096, "steps": [
            { "op": "call", "routine": "__parsec_roi_begin" },
            { "op": "return" },
            { "op": "call", "routine": "strlen", "args": [40960, 0, 0, 0], "data": "racegrind" },
            { "op": "return" }
        ] } ]"#;
        let events = significant(run(threads, Knobs::default())?.tracing.thread_events(tid(1))?);

        assert_eq!(kinds(&events), vec![EventKind::RegionOfInterestStart]);

        Ok(())
    }

    #[test]
    fn memory_access_without_size_fails_the_run() -> Result<(), Error> {
        let threads = r#"[ { "native_handle": 4096, "steps": [
            { "op": "call", "routine": "worker" },
            { "op": "block", "block": 3 },
            { "op": "return" }
        ] } ]"#;
        let err = run(threads, Knobs::default()).err().unwrap();
        assert!(err.to_string().contains("has no size"));

        Ok(())
    }

    #[test]
    fn waiting_on_each_other_deadlocks() -> Result<(), Error> {
        let threads = r#"[
            { "native_handle": 4096, "steps": [ { "op": "wait_for", "thread": 1 } ] },
            { "native_handle": 8192, "steps": [ { "op": "wait_for", "thread": 0 } ] }
        ]"#;
        assert!(run(threads, Knobs::default()).is_err());

        Ok(())
    }

    #[test]
    fn program_without_pthread_self_cannot_start_threads() -> Result<(), Error> {
        let json = r#"{
            "images": [ { "name": "app", "kind": "MainExecutable", "routines": [] } ],
            "threads": [ { "native_handle": 1, "steps": [] } ]
        }"#;
        assert!(crate::trace(Program::from_json(json)?, Knobs::default()).is_err());

        Ok(())
    }

    #[test]
    fn metadata_names_files_and_routines() -> Result<(), Error> {
        let threads = r#"[ { "native_handle": 4096, "steps": [
            { "op": "call", "routine": "worker" },
            { "op": "block", "block": 0, "execs": [ { "write_ea": 36864, "write_size": 8 } ] },
            { "op": "return" }
        ] } ]"#;
        let output = run(threads, Knobs::default())?;

        let commit = output
            .tracing
            .events()?
            .into_iter()
            .find(|event| event.kind == EventKind::MemoryWriteCommit)
            .unwrap();
        assert_eq!(output.metadata.file_name(commit.site.file), Some("worker.c"));
        assert_eq!(output.metadata.routine_name(commit.routine), Some("worker"));

        let binary = output.generate_binary_trace()?;
        assert_eq!(binary.trace.len() % 43, 0);

        Ok(())
    }
}
