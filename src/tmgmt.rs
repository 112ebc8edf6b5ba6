use std::collections::HashMap;

use anyhow::{Error, anyhow, bail};
use race_events::ThreadId;
use racegrind_core::host::ApplicationCall;

use crate::program::Program;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Waits for the step that creates it.
    Unspawned,
    NotStarted,
    Running,
    Finished,
}

/// An active routine invocation of a scripted thread.
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    pub image: usize,
    pub routine: usize,
    pub args: [u64; 4],
    pub replaced: bool,
}

#[derive(Debug)]
pub struct ScriptedThread {
    pub tid: ThreadId,
    pub native_handle: u64,
    pub state: ThreadState,
    pub pc: usize,
    pub frames: Vec<Frame>,
}

/// Scheduling state of every scripted thread.
pub struct ThreadManagement {
    threads: Vec<ScriptedThread>,
    functions: HashMap<u64, String>,
}

impl ThreadManagement {
    pub fn new(program: &Program) -> Result<Self, Error> {
        let spawned = program.spawned_threads();
        let threads = program
            .threads
            .iter()
            .enumerate()
            .map(|(idx, spec)| {
                Ok(ScriptedThread {
                    tid: ThreadId::from_host_index(u32::try_from(idx)?),
                    native_handle: spec.native_handle,
                    state: if spawned.contains(&idx) {
                        ThreadState::Unspawned
                    } else {
                        ThreadState::NotStarted
                    },
                    pc: 0,
                    frames: Vec::new(),
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let functions = program
            .images
            .iter()
            .flat_map(|image| image.routines.iter())
            .map(|routine| (routine.address, routine.name.clone()))
            .collect();

        Ok(Self { threads, functions })
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn thread(&self, idx: usize) -> Result<&ScriptedThread, Error> {
        self.threads
            .get(idx)
            .ok_or(anyhow!("Thread {idx} does not exist"))
    }

    pub fn thread_mut(&mut self, idx: usize) -> Result<&mut ScriptedThread, Error> {
        self.threads
            .get_mut(idx)
            .ok_or(anyhow!("Thread {idx} does not exist"))
    }

    fn by_tid(&self, tid: ThreadId) -> Result<&ScriptedThread, Error> {
        self.threads
            .iter()
            .find(|thread| thread.tid == tid)
            .ok_or(anyhow!("{tid} is not a scripted thread"))
    }
}

impl ApplicationCall for ThreadManagement {
    fn call_application_function(&self, tid: ThreadId, address: u64) -> Result<u64, Error> {
        match self.functions.get(&address).map(String::as_str) {
            Some(name) if name.contains("pthread_self") => Ok(self.by_tid(tid)?.native_handle),
            Some(name) => bail!("Scripted programs cannot call {name}"),
            None => bail!("No routine at address {address:#x}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Error;
    use race_events::ThreadId;
    use racegrind_core::host::ApplicationCall;

    use super::{ThreadManagement, ThreadState};
    use crate::program::Program;

    const PROGRAM: &str = r#"{
        "images": [
            { "name": "libpthread.so", "kind": "SharedLibrary", "routines": [
                { "name": "pthread_self", "address": 256 },
                { "name": "pthread_mutex_lock", "address": 512 }
            ] }
        ],
        "threads": [
            { "native_handle": 4096, "steps": [] },
            { "native_handle": 8192, "steps": [] }
        ]
    }"#;

    #[test]
    fn threads_get_consecutive_ids() -> Result<(), Error> {
        let tmgmt = ThreadManagement::new(&Program::from_json(PROGRAM)?)?;
        assert_eq!(tmgmt.len(), 2);
        assert_eq!(tmgmt.thread(1)?.tid.get(), 2);
        assert_eq!(tmgmt.thread(0)?.state, ThreadState::NotStarted);
        tmgmt.thread(2).unwrap_err();

        Ok(())
    }

    #[test]
    fn spawned_threads_wait_for_their_creation() -> Result<(), Error> {
        let json = PROGRAM.replace(
            r#"{ "native_handle": 4096, "steps": [] }"#,
            r#"{ "native_handle": 4096, "steps": [
                { "op": "call", "routine": "pthread_mutex_lock", "spawn": 1 }
            ] }"#,
        );
        let tmgmt = ThreadManagement::new(&Program::from_json(&json)?)?;
        assert_eq!(tmgmt.thread(0)?.state, ThreadState::NotStarted);
        assert_eq!(tmgmt.thread(1)?.state, ThreadState::Unspawned);

        Ok(())
    }

        #[test]
    fn pthread_self_returns_native_handle() -> Result<(), Error> {
        let tmgmt = ThreadManagement::new(&Program::from_json(PROGRAM)?)?;
        let tid = ThreadId::from_host_index(1);
        assert_eq!(tmgmt.call_application_function(tid, 256)?, 8192);
        tmgmt.call_application_function(tid, 512).unwrap_err();
        tmgmt.call_application_function(tid, 1024).unwrap_err();

        Ok(())
    }
}
