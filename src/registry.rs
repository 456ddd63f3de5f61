//! Process-wide bookkeeping of temporary entries awaiting deletion.
//!
//! Every [`TempContext`](crate::TempContext) owns one entry map in a
//! [`TerminationRegistry`], keyed by its [`ContextId`] rather than by a
//! reference to the context itself. Entries leave the map as soon as they are
//! closed, so the registry never grows beyond what is actually pending. While
//! at least one context is active, a [`ShutdownHook`] is installed that sweeps
//! whatever is still registered when the process exits.

use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::{fs_ops, EntryKind, Error};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

static GLOBAL: Lazy<Arc<TerminationRegistry>> =
    Lazy::new(|| Arc::new(TerminationRegistry::with_hook(AtExitHook)));

/// Identifies a context within a registry. Unique for the life of the process.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ContextId(u64);

impl ContextId {
    pub(crate) fn next() -> Result<Self, Error> {
        next_id(&NEXT_CONTEXT_ID).map(ContextId)
    }

    /// The raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl Display for ContextId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Takes the current value and advances the counter, refusing to wrap around.
fn next_id(counter: &AtomicU64) -> Result<u64, Error> {
    counter
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| id.checked_add(1))
        .map_err(|_| Error::CounterOverflow("context id"))
}

/// Increments the active count, returning the previous value. The counter is
/// left untouched on overflow.
fn increment_active(active: &AtomicUsize) -> Result<usize, Error> {
    active
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_add(1))
        .map_err(|_| Error::CounterOverflow("active context count"))
}

/// A path scheduled for deletion.
#[derive(Debug, Clone)]
pub(crate) struct PendingEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
}

pub(crate) type EntryMap = IndexMap<String, PendingEntry>;

/// Runs a callback at process exit on behalf of a [`TerminationRegistry`].
///
/// The registry calls [`install`](ShutdownHook::install) when its first
/// context becomes active and [`remove`](ShutdownHook::remove) when its last
/// one closes. Failures of either are logged and otherwise ignored.
pub trait ShutdownHook: Send + Sync {
    fn install(&self) -> io::Result<()>;
    fn remove(&self) -> io::Result<()>;
}

/// Sweeps the process-wide registry from a `libc::atexit` callback.
///
/// `atexit` registrations cannot be undone, so the callback is registered once
/// and `install`/`remove` arm and disarm it.
struct AtExitHook;

static AT_EXIT_ARMED: AtomicBool = AtomicBool::new(false);
static AT_EXIT_STATUS: OnceCell<libc::c_int> = OnceCell::new();

extern "C" fn sweep_at_exit() {
    if !AT_EXIT_ARMED.swap(false, Ordering::SeqCst) {
        return;
    }
    // Unwinding out of an extern "C" function aborts the process.
    let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| GLOBAL.sweep()));
}

impl ShutdownHook for AtExitHook {
    fn install(&self) -> io::Result<()> {
        let status = *AT_EXIT_STATUS.get_or_init(|| unsafe { libc::atexit(sweep_at_exit) });
        if status != 0 {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("atexit registration failed with status {}", status),
            ));
        }
        AT_EXIT_ARMED.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn remove(&self) -> io::Result<()> {
        AT_EXIT_ARMED.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Maps each context to the entries it still has to delete, and owns the
/// shutdown hook shared by all of its active contexts.
pub struct TerminationRegistry {
    /// The outer lock only guards lookup, insertion and removal of a context's
    /// map. Each map has its own lock so contexts never contend with each other.
    pending: RwLock<HashMap<ContextId, Arc<Mutex<EntryMap>>>>,

    /// Number of contexts that are created but not yet closed.
    active: AtomicUsize,

    /// Whether `hook` is currently installed.
    hook_installed: Mutex<bool>,

    hook: Box<dyn ShutdownHook>,
}

impl TerminationRegistry {
    /// Creates an isolated registry driving the given hook.
    ///
    /// Contexts use the process-wide registry unless one is passed to
    /// [`TempContext::with_registry`](crate::TempContext::with_registry).
    pub fn with_hook<H: ShutdownHook + 'static>(hook: H) -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
            active: AtomicUsize::new(0),
            hook_installed: Mutex::new(false),
            hook: Box::new(hook),
        }
    }

    /// The process-wide registry, swept by an `atexit` callback.
    pub fn global() -> Arc<TerminationRegistry> {
        Arc::clone(&GLOBAL)
    }

    /// Number of contexts currently active in this registry.
    pub fn active_contexts(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Number of entries still pending for a context.
    pub fn pending(&self, id: ContextId) -> usize {
        match self.entries_of(id) {
            Some(entries) => entries.lock().len(),
            None => 0,
        }
    }

    /// Adds an entry unless `name` is already registered for the context.
    /// Returns whether the entry was added.
    ///
    /// The outer lock stays held until the entry is inserted, so the map
    /// cannot be detached by a concurrent [`take_all`](Self::take_all) in
    /// between. An entry registered after `take_all` lands in a fresh map.
    pub(crate) fn register(
        &self,
        id: ContextId,
        name: String,
        path: PathBuf,
        kind: EntryKind,
    ) -> bool {
        let pending = self.pending.read();
        if let Some(entries) = pending.get(&id) {
            let mut entries = entries.lock();
            return insert_entry(id, &mut entries, name, path, kind);
        }
        drop(pending);

        let mut pending = self.pending.write();
        let mut entries = pending.entry(id).or_default().lock();
        insert_entry(id, &mut entries, name, path, kind)
    }

    /// Removes an entry, if present.
    pub(crate) fn unregister(&self, id: ContextId, name: &str) {
        if let Some(entries) = self.entries_of(id) {
            if entries.lock().shift_remove(name).is_some() {
                trace!(context = %id, name, "Unregistered");
            }
        }
    }

    /// Removes and returns everything registered for a context.
    pub(crate) fn take_all(&self, id: ContextId) -> Option<EntryMap> {
        let entries = self.pending.write().remove(&id)?;
        let mut entries = entries.lock();
        Some(std::mem::take(&mut *entries))
    }

    /// Marks a context as active, installing the hook for the first one.
    pub(crate) fn acquire(&self) -> Result<(), Error> {
        let previous = increment_active(&self.active)?;
        trace!(active_count = previous + 1, "Context activated");
        if previous == 0 {
            self.install_hook();
        }
        Ok(())
    }

    /// Marks a context as closed, removing the hook after the last one.
    pub(crate) fn release(&self) {
        match self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        {
            Ok(previous) => {
                trace!(active_count = previous - 1, "Context deactivated");
                if previous == 1 {
                    self.remove_hook();
                }
            }
            Err(_) => debug_assert!(false, "active context count underflow"),
        }
    }

    /// Deletes everything still registered, logging and skipping failures.
    ///
    /// This is what the shutdown hook runs. Entries are taken out of the
    /// registry as they are visited, so a second sweep finds nothing left.
    pub fn sweep(&self) {
        let all: Vec<_> = self.pending.read().values().cloned().collect();
        for entries in all {
            let entries = std::mem::take(&mut *entries.lock());
            for entry in entries.into_values() {
                if let Err(e) = fs_ops::delete_entry(&entry.path, entry.kind) {
                    warn!(
                        path = %entry.path.display(),
                        error = %e,
                        "Unable to delete {} on shutdown",
                        entry.kind
                    );
                }
            }
        }
    }

    fn entries_of(&self, id: ContextId) -> Option<Arc<Mutex<EntryMap>>> {
        self.pending.read().get(&id).cloned()
    }

    fn install_hook(&self) {
        let mut installed = self.hook_installed.lock();
        // A release may have raced us back to zero.
        if *installed || self.active_contexts() == 0 {
            return;
        }
        debug!("Registering termination hook");
        match self.hook.install() {
            Ok(()) => *installed = true,
            Err(e) => warn!(error = %e, "Failed to add termination hook"),
        }
    }

    fn remove_hook(&self) {
        let mut installed = self.hook_installed.lock();
        // An acquire may have raced us away from zero.
        if !*installed || self.active_contexts() != 0 {
            return;
        }
        debug!("Removing termination hook");
        *installed = false;
        if let Err(e) = self.hook.remove() {
            warn!(error = %e, "Failed to remove termination hook");
        }
    }
}

fn insert_entry(
    id: ContextId,
    entries: &mut EntryMap,
    name: String,
    path: PathBuf,
    kind: EntryKind,
) -> bool {
    if entries.contains_key(&name) {
        return false;
    }
    trace!(context = %id, path = %path.display(), "Registered {}", kind);
    entries.insert(name, PendingEntry { path, kind });
    true
}

impl Debug for TerminationRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminationRegistry")
            .field("contexts", &self.pending.read().len())
            .field("active", &self.active_contexts())
            .field("hook_installed", &*self.hook_installed.lock())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;

    /// Counts hook calls, optionally failing every install.
    #[derive(Clone, Default)]
    pub(crate) struct CountingHook {
        pub installs: Arc<AtomicUsize>,
        pub removes: Arc<AtomicUsize>,
        pub fail_install: bool,
    }

    impl ShutdownHook for CountingHook {
        fn install(&self) -> io::Result<()> {
            self.installs.fetch_add(1, Ordering::SeqCst);
            if self.fail_install {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
            }
            Ok(())
        }

        fn remove(&self) -> io::Result<()> {
            self.removes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn registry() -> (TerminationRegistry, CountingHook) {
        let hook = CountingHook::default();
        (TerminationRegistry::with_hook(hook.clone()), hook)
    }

    #[test]
    fn context_ids_increase() {
        let a = ContextId::next().unwrap();
        let b = ContextId::next().unwrap();
        assert!(b > a);
    }

    #[test]
    fn context_id_refuses_to_wrap_around() {
        let counter = AtomicU64::new(u64::MAX - 1);
        assert_eq!(next_id(&counter).unwrap(), u64::MAX - 1);
        assert!(matches!(
            next_id(&counter),
            Err(Error::CounterOverflow("context id"))
        ));
        assert_eq!(counter.load(Ordering::SeqCst), u64::MAX);
    }

    #[test]
    fn active_count_refuses_to_overflow() {
        let counter = AtomicUsize::new(usize::MAX);
        assert!(matches!(
            increment_active(&counter),
            Err(Error::CounterOverflow("active context count"))
        ));
        assert_eq!(counter.load(Ordering::SeqCst), usize::MAX);
    }

    #[test]
    fn failed_acquire_leaves_the_count_alone() {
        let (registry, hook) = registry();
        registry.active.store(usize::MAX, Ordering::SeqCst);
        assert!(matches!(
            registry.acquire(),
            Err(Error::CounterOverflow(_))
        ));
        assert_eq!(registry.active_contexts(), usize::MAX);
        assert_eq!(hook.installs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn registering_after_take_all_starts_a_new_map() {
        let (registry, _) = registry();
        let id = ContextId::next().unwrap();
        registry.register(id, "a".into(), "/tmp/a".into(), EntryKind::File);
        registry.take_all(id).unwrap();

        assert!(registry.register(id, "b".into(), "/tmp/b".into(), EntryKind::File));
        assert_eq!(registry.pending(id), 1);
        let late = registry.take_all(id).unwrap();
        assert_eq!(late.keys().collect::<Vec<_>>(), ["b"]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let (registry, _) = registry();
        let id = ContextId::next().unwrap();
        assert!(registry.register(id, "a".into(), "/tmp/a".into(), EntryKind::File));
        assert!(!registry.register(id, "a".into(), "/tmp/other/a".into(), EntryKind::File));
        assert_eq!(registry.pending(id), 1);

        // Names are scoped per context.
        let other = ContextId::next().unwrap();
        assert!(registry.register(other, "a".into(), "/tmp/a".into(), EntryKind::File));
    }

    #[test]
    fn unregister_is_a_no_op_for_unknown_names() {
        let (registry, _) = registry();
        let id = ContextId::next().unwrap();
        registry.unregister(id, "missing");
        registry.register(id, "a".into(), "/tmp/a".into(), EntryKind::File);
        registry.unregister(id, "a");
        registry.unregister(id, "a");
        assert_eq!(registry.pending(id), 0);
    }

    #[test]
    fn take_all_empties_the_context() {
        let (registry, _) = registry();
        let id = ContextId::next().unwrap();
        registry.register(id, "a".into(), "/tmp/a".into(), EntryKind::File);
        registry.register(id, "b".into(), "/tmp/b".into(), EntryKind::Directory);

        let taken = registry.take_all(id).unwrap();
        assert_eq!(taken.keys().collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(registry.pending(id), 0);
        assert!(registry.take_all(id).is_none());
    }

    #[test]
    fn hook_follows_first_and_last_context() {
        let (registry, hook) = registry();
        registry.acquire().unwrap();
        registry.acquire().unwrap();
        registry.release();
        assert_eq!(hook.installs.load(Ordering::SeqCst), 1);
        assert_eq!(hook.removes.load(Ordering::SeqCst), 0);

        registry.release();
        assert_eq!(hook.removes.load(Ordering::SeqCst), 1);
        assert_eq!(registry.active_contexts(), 0);

        registry.acquire().unwrap();
        assert_eq!(hook.installs.load(Ordering::SeqCst), 2);
        registry.release();
    }

    #[test]
    fn failed_install_is_tolerated() {
        let hook = CountingHook {
            fail_install: true,
            ..CountingHook::default()
        };
        let registry = TerminationRegistry::with_hook(hook.clone());
        registry.acquire().unwrap();
        assert_eq!(registry.active_contexts(), 1);
        registry.release();
        // Nothing was installed, so nothing is removed.
        assert_eq!(hook.removes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn sweep_deletes_and_skips_failures() {
        let (registry, _) = registry();
        let base = tempfile::tempdir().unwrap();
        let file = base.path().join("file.tmp");
        let dir = base.path().join("dir");
        let stuck = base.path().join("stuck");
        fs::write(&file, b"x").unwrap();
        fs::create_dir_all(dir.join("nested")).unwrap();
        fs::create_dir_all(&stuck).unwrap();
        fs::write(stuck.join("inner"), b"x").unwrap();

        let a = ContextId::next().unwrap();
        let b = ContextId::next().unwrap();
        registry.register(a, "file.tmp".into(), file.clone(), EntryKind::File);
        // Registered as a file, so the non-empty directory cannot be removed.
        registry.register(a, "stuck".into(), stuck.clone(), EntryKind::File);
        registry.register(b, "dir".into(), dir.clone(), EntryKind::Directory);

        registry.sweep();
        assert!(!file.exists());
        assert!(!dir.exists());
        assert!(stuck.exists());
        assert_eq!(registry.pending(a), 0);
        assert_eq!(registry.pending(b), 0);

        registry.sweep();
    }
}
