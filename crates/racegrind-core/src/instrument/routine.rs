use anyhow::{Context, Error};
use log::{debug, info};
use race_events::EventKind;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use super::Instrumentor;
use crate::{
    classify::{Category, RegionScope, TAIL_CALL_ELIMINATED_ACQUIRE, classify_in_image},
    host::{Hook, Image, Routine, RoutinePoint},
};

fn region_kinds(scope: RegionScope) -> (EventKind, EventKind) {
    match scope {
        RegionScope::Benchmark => (
            EventKind::RegionOfInterestStart,
            EventKind::RegionOfInterestEnd,
        ),
        RegionScope::Server => (EventKind::ServerRegionStart, EventKind::ServerRegionEnd),
    }
}

fn bracket<R: Routine>(routine: &mut R, end: Hook) {
    routine.insert_call(RoutinePoint::Entry, Hook::IgnoreBegin);
    routine.insert_call(RoutinePoint::Exit, end);
}

impl Instrumentor {
    /// Classifies every routine of a newly loaded image and installs the
    /// hooks matching its role.
    ///
    /// # Errors
    ///
    /// Fails if the image provides `pthread_self` at an invalid address. The
    /// remaining routines of the image are left untouched in that case.
    pub fn instrument_image<I: Image>(&self, image: &mut I) -> Result<(), Error> {
        let image_name = image.name().to_owned();
        let kind = image.kind();
        let routines = image.routines_mut();

        let names: Vec<String> = routines
            .iter()
            .map(|routine| routine.name().to_owned())
            .collect();
        let categories: Vec<Category> = names
            .par_iter()
            .map(|name| classify_in_image(name, kind))
            .collect();

        debug!("Instrumenting {} routines of {image_name}", routines.len());
        for (routine, category) in routines.iter_mut().zip(categories) {
            self.instrument_routine(routine, category)
                .with_context(|| format!("Failed to instrument image {image_name}"))?;
        }

        Ok(())
    }

    fn instrument_routine<R: Routine>(
        &self,
        routine: &mut R,
        category: Category,
    ) -> Result<(), Error> {
        let name = routine.name().to_owned();
        if category != Category::None {
            debug!("{name} classified as {category:?}");
        }

        if let Category::ReplaceableUtility(replacement) = category {
            info!("instrument: replacing {name} with built-in {}", replacement.name());
            routine.replace(replacement);
            return Ok(());
        }

        let routine_id = self
            .knobs
            .print_routine_names
            .then(|| self.registry.routines.intern(&name));
        if let Some(routine_id) = routine_id {
            routine.insert_call(
                RoutinePoint::Entry,
                Hook::RoutineEnter {
                    routine: routine_id,
                },
            );
        }

        let ignore_internals = self.knobs.ignore_sync_internals;
        match category {
            Category::None | Category::ReplaceableUtility(_) => {}
            Category::ThreadSelf => {
                self.threads.resolve_pthread_self(routine.address())?;
                debug!("pthread_self resolved to {:#x}", routine.address());
            }
            Category::ThreadCreate => {
                routine.insert_call(RoutinePoint::Entry, Hook::ThreadSpawn);
                if ignore_internals {
                    bracket(routine, Hook::IgnoreEnd);
                }
            }
            Category::ThreadJoin => {
                if ignore_internals {
                    bracket(routine, Hook::IgnoreEnd);
                }
                // The joined thread is only known to be done after the call
                routine.insert_call(RoutinePoint::Exit, Hook::ThreadJoin { arg: 0 });
            }
            Category::LockAcquire => {
                if ignore_internals {
                    let end = if name == TAIL_CALL_ELIMINATED_ACQUIRE {
                        Hook::IgnoreDoubleEnd
                    } else {
                        Hook::IgnoreEnd
                    };
                    bracket(routine, end);
                }
                routine.insert_call(
                    RoutinePoint::Exit,
                    Hook::LockAcquire {
                        arg: 0,
                        semantics: EventKind::LockAcquire,
                    },
                );
            }
            Category::LockAcquireAndRelease { lock_arg } => {
                routine.insert_call(
                    RoutinePoint::Entry,
                    Hook::LockRelease {
                        arg: lock_arg,
                        semantics: EventKind::LockAcquireAndRelease,
                    },
                );
                if ignore_internals {
                    bracket(routine, Hook::IgnoreEnd);
                }
                routine.insert_call(
                    RoutinePoint::Exit,
                    Hook::LockAcquire {
                        arg: lock_arg,
                        semantics: EventKind::LockAcquireAndRelease,
                    },
                );
            }
            Category::LockRelease => {
                routine.insert_call(
                    RoutinePoint::Entry,
                    Hook::LockRelease {
                        arg: 0,
                        semantics: EventKind::LockRelease,
                    },
                );
                if ignore_internals {
                    bracket(routine, Hook::IgnoreEnd);
                }
            }
            Category::IgnoredInternal => bracket(routine, Hook::IgnoreEnd),
            Category::RegionStartHook { scope, point } => {
                info!("instrument: {name}");
                let (start, _) = region_kinds(scope);
                routine.insert_call(point, Hook::Region { kind: start });
            }
            Category::RegionEndHook { scope, point } => {
                info!("instrument: {name}");
                let (_, end) = region_kinds(scope);
                routine.insert_call(point, Hook::Region { kind: end });
            }
        }

        if let Some(routine_id) = routine_id {
            routine.insert_call(
                RoutinePoint::Exit,
                Hook::RoutineExit {
                    routine: routine_id,
                },
            );
        }

        Ok(())
    }
}
