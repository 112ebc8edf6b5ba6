//! Decides the synchronization role of a routine from its name.
//!
//! Classification is a first-match walk over [`RULES`]. The table is ordered:
//! earlier rules shadow later ones, e.g. the allocation rule keeps any name
//! containing `free` away from every rule below it.

use serde::{Deserialize, Serialize};

use crate::{host::RoutinePoint, replace::Replacement};

/// Which flavor of region marker a harness hook represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionScope {
    /// Benchmark-suite region-of-interest markers.
    Benchmark,

    /// Steady-state markers of server applications.
    Server,
}

/// The synchronization role of a routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    None,
    LockAcquire,
    LockRelease,

    /// A release followed by a re-acquire of the object passed as argument
    /// `lock_arg`.
    LockAcquireAndRelease { lock_arg: usize },
    ThreadCreate,
    ThreadJoin,
    ThreadSelf,
    IgnoredInternal,
    RegionStartHook { scope: RegionScope, point: RoutinePoint },
    RegionEndHook { scope: RegionScope, point: RoutinePoint },
    ReplaceableUtility(Replacement),
}

impl Category {
    /// Returns `true` for the categories that bound lock regions.
    pub fn is_lock_boundary(&self) -> bool {
        matches!(
            self,
            Category::LockAcquire | Category::LockRelease | Category::LockAcquireAndRelease { .. }
        )
    }
}

/// The nature of the binary a routine was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageKind {
    MainExecutable,
    SharedLibrary,
}

/// How a rule matches a routine name.
#[derive(Debug, Clone, Copy)]
pub enum Matcher {
    /// The name contains the fragment.
    Contains(&'static str),

    /// The name is exactly the fragment.
    Exact(&'static str),

    /// The name contains one of the prefixes and the suffix fragment.
    ContainsBoth(&'static [&'static str], &'static str),
}

impl Matcher {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Matcher::Contains(fragment) => name.contains(fragment),
            Matcher::Exact(expected) => name == *expected,
            Matcher::ContainsBoth(any_of, and) => {
                name.contains(and) && any_of.iter().any(|fragment| name.contains(fragment))
            }
        }
    }
}

/// The family a rule belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    AcquirePattern,
    ReleasePattern,
    CombinedPattern,
    LifecyclePattern,
    HookPattern,

    /// Allocation routines. They classify as [`Category::None`] but shadow
    /// every later rule.
    AllocationPattern,
    IgnoredPattern,
    UtilityPattern,
}

#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub kind: RuleKind,
    pub matcher: Matcher,
    pub category: Category,

    /// Only applies to routines of the main executable.
    pub main_executable_only: bool,
}

impl Rule {
    const fn new(kind: RuleKind, matcher: Matcher, category: Category) -> Self {
        Self {
            kind,
            matcher,
            category,
            main_executable_only: false,
        }
    }

    const fn server_hook(matcher: Matcher, category: Category) -> Self {
        Self {
            kind: RuleKind::HookPattern,
            matcher,
            category,
            main_executable_only: true,
        }
    }

    pub fn applies(&self, name: &str, image: ImageKind) -> bool {
        (!self.main_executable_only || image == ImageKind::MainExecutable)
            && self.matcher.matches(name)
    }
}

const DB_MUTEX_WRAPPERS: &[&str] = &["PolicyMutex", "TrxInInnoDB"];

/// Routine reached through tail-call elimination from an already bracketed
/// `pthread_rwlock_wrlock`. Its exit has to close both ignore regions.
pub const TAIL_CALL_ELIMINATED_ACQUIRE: &str = "__pthread_rwlock_wrlock_slow";

use Category as C;
use Matcher::{Contains, ContainsBoth, Exact};
use RuleKind as K;

const BENCHMARK_START: Category = C::RegionStartHook {
    scope: RegionScope::Benchmark,
    point: RoutinePoint::Entry,
};
const BENCHMARK_END: Category = C::RegionEndHook {
    scope: RegionScope::Benchmark,
    point: RoutinePoint::Entry,
};

const fn server_start(point: RoutinePoint) -> Category {
    C::RegionStartHook {
        scope: RegionScope::Server,
        point,
    }
}

const fn server_end(point: RoutinePoint) -> Category {
    C::RegionEndHook {
        scope: RegionScope::Server,
        point,
    }
}

/// The ordered classification table.
pub const RULES: &[Rule] = &[
    Rule::new(K::HookPattern, Contains("__parsec_roi_begin"), BENCHMARK_START),
    Rule::new(K::HookPattern, Contains("__parsec_roi_end"), BENCHMARK_END),
    Rule::new(K::AllocationPattern, Contains("malloc"), C::None),
    Rule::new(K::AllocationPattern, Contains("_Znwm"), C::None),
    Rule::new(K::AllocationPattern, Contains("free"), C::None),
    Rule::new(K::AllocationPattern, Contains("_ZdlPv"), C::None),
    Rule::new(K::LifecyclePattern, Contains("pthread_self"), C::ThreadSelf),
    Rule::new(K::LifecyclePattern, Contains("pthread_create"), C::ThreadCreate),
    Rule::new(K::LifecyclePattern, Contains("pthread_join"), C::ThreadJoin),
    Rule::new(K::AcquirePattern, Contains("pthread_mutex_lock"), C::LockAcquire),
    Rule::new(K::AcquirePattern, Contains("pthread_mutex_timedlock"), C::LockAcquire),
    Rule::new(K::AcquirePattern, Contains("pthread_rwlock_rdlock"), C::LockAcquire),
    Rule::new(K::AcquirePattern, Contains("pthread_rwlock_wrlock"), C::LockAcquire),
    Rule::new(K::AcquirePattern, Contains("pthread_mutex_trylock"), C::LockAcquire),
    Rule::new(K::AcquirePattern, Contains("pthread_rwlock_tryrdlock"), C::LockAcquire),
    Rule::new(K::AcquirePattern, Contains("pthread_rwlock_trywrlock"), C::LockAcquire),
    Rule::new(K::AcquirePattern, ContainsBoth(DB_MUTEX_WRAPPERS, "enter"), C::LockAcquire),
    Rule::new(K::AcquirePattern, Contains("ACQUIRE_FENCE"), C::LockAcquire),
    Rule::new(
        K::CombinedPattern,
        Contains("pthread_cond_timedwait"),
        C::LockAcquireAndRelease { lock_arg: 1 },
    ),
    Rule::new(
        K::CombinedPattern,
        Contains("pthread_barrier_wait"),
        C::LockAcquireAndRelease { lock_arg: 0 },
    ),
    Rule::new(
        K::CombinedPattern,
        Contains("pthread_cond_wait"),
        C::LockAcquireAndRelease { lock_arg: 1 },
    ),
    Rule::new(K::ReleasePattern, Contains("pthread_mutex_unlock"), C::LockRelease),
    Rule::new(K::ReleasePattern, Contains("pthread_rwlock_unlock"), C::LockRelease),
    Rule::new(K::ReleasePattern, ContainsBoth(DB_MUTEX_WRAPPERS, "exit"), C::LockRelease),
    Rule::new(K::ReleasePattern, Contains("RELEASE_FENCE"), C::LockRelease),
    Rule::server_hook(
        Contains("listen_for_connection_event"),
        server_start(RoutinePoint::Entry),
    ),
    Rule::server_hook(
        Contains("terminate_compress_gtid_table_thread"),
        server_end(RoutinePoint::Entry),
    ),
    Rule::server_hook(Exact("listener_thread"), server_start(RoutinePoint::Entry)),
    Rule::server_hook(Exact("ap_close_listeners_ex"), server_end(RoutinePoint::Exit)),
    Rule::new(
        K::UtilityPattern,
        Exact("strlen"),
        C::ReplaceableUtility(Replacement::Strlen),
    ),
    Rule::server_hook(Exact("uriencode_init"), server_start(RoutinePoint::Exit)),
    Rule::server_hook(
        Exact("stop_assoc_maintenance_thread"),
        server_end(RoutinePoint::Entry),
    ),
];

/// Routines whose internals are bracketed as ignore-conflicts regions.
/// Consulted after the lock rules and before the server hooks.
pub const IGNORED_INTERNAL: &[Matcher] = &[];

/// Library routines whose instructions are never instrumented.
pub const EXCLUDED_LIBRARY_ROUTINES: &[Matcher] = &[];

/// Classifies a routine of the main executable.
pub fn classify(name: &str) -> Category {
    classify_in_image(name, ImageKind::MainExecutable)
}

/// Classifies a routine found in an image of the given kind.
pub fn classify_in_image(name: &str, image: ImageKind) -> Category {
    let lock_rules_end = RULES
        .iter()
        .position(|rule| rule.main_executable_only)
        .unwrap_or(RULES.len());

    let (lock_rules, hook_rules) = RULES.split_at(lock_rules_end);
    if let Some(rule) = lock_rules.iter().find(|rule| rule.applies(name, image)) {
        return rule.category;
    }

    if IGNORED_INTERNAL.iter().any(|matcher| matcher.matches(name)) {
        return Category::IgnoredInternal;
    }

    hook_rules
        .iter()
        .find(|rule| rule.applies(name, image))
        .map_or(Category::None, |rule| rule.category)
}

/// Returns `true` if the instructions of the routine must not be instrumented.
pub fn is_excluded_library_routine(name: &str) -> bool {
    EXCLUDED_LIBRARY_ROUTINES
        .iter()
        .any(|matcher| matcher.matches(name))
}
