use std::borrow::Borrow;
use std::fmt::{Debug, Formatter};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use crate::names::{self, DEFAULT_SUFFIX};
use crate::registry::{ContextId, TerminationRegistry};
use crate::{fs_ops, DeleteFailure, EntryKind, Error, TempEntry};

static DEFAULT_BASE_DIR: OnceCell<PathBuf> = OnceCell::new();

/// Gets the default base directory, resolving and validating it on first use.
///
/// The directory comes from [`std::env::temp_dir`]. It is created if missing,
/// and must be a readable and writable directory. A failed validation is not
/// cached; the next call tries again.
pub fn default_base_dir() -> Result<&'static Path, Error> {
    DEFAULT_BASE_DIR
        .get_or_try_init(|| validate_base_dir(std::env::temp_dir()))
        .map(PathBuf::as_path)
}

pub(crate) fn validate_base_dir(dir: PathBuf) -> Result<PathBuf, Error> {
    let config_error = |dir: PathBuf, reason, source| Error::Configuration {
        path: dir,
        reason,
        source,
    };

    let metadata = match fs::metadata(&dir) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return match fs::create_dir_all(&dir) {
                Ok(()) => Ok(dir),
                Err(e) => Err(config_error(
                    dir,
                    "does not exist and cannot be created",
                    Some(e),
                )),
            };
        }
        Err(e) => return Err(config_error(dir, "cannot be accessed", Some(e))),
    };
    if !metadata.is_dir() {
        return Err(config_error(dir, "is not a directory", None));
    }
    if let Err(e) = check_writable(&dir, &metadata) {
        return Err(config_error(dir, "is not writable", Some(e)));
    }
    if let Err(e) = fs::read_dir(&dir) {
        return Err(config_error(dir, "is not readable", Some(e)));
    }
    Ok(dir)
}

/// Asks the OS whether the current user may create entries in `dir`.
#[cfg(unix)]
fn check_writable(dir: &Path, _metadata: &fs::Metadata) -> io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let path = CString::new(dir.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // Creating an entry needs both write and search permission.
    if unsafe { libc::access(path.as_ptr(), libc::W_OK | libc::X_OK) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn check_writable(_dir: &Path, metadata: &fs::Metadata) -> io::Result<()> {
    if metadata.permissions().readonly() {
        return Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "directory is read-only",
        ));
    }
    Ok(())
}

/// A session of temporary files and directories that are deleted together.
///
/// Entries are created in the context's base directory and registered for
/// deletion with a [`TerminationRegistry`]. Each entry can be closed on its
/// own; [`close`](Self::close) deletes whatever is left. If neither happens,
/// the registry's shutdown hook deletes the remaining entries at process exit.
///
/// Dropping the context closes it.
///
/// ## Example
///
/// ```
/// # use tempfile_context::{TempContext, Error};
/// let context = TempContext::new()?;
/// let file = context.create_temp_file("archive.tar.gz")?;
/// let dir = context.create_temp_directory(Some("work"))?;
///
/// let file_path = file.path()?;
/// assert!(file_path.to_string_lossy().ends_with(".tar.gz"));
/// assert_eq!(context.size(), 2);
///
/// // Deletes both the file and the directory.
/// context.close()?;
/// assert!(!file_path.exists());
/// assert!(!dir.path()?.exists());
/// # Ok::<(), Error>(())
/// ```
pub struct TempContext {
    id: ContextId,

    /// The directory new entries are created in.
    base_dir: PathBuf,

    registry: Arc<TerminationRegistry>,

    closed: AtomicBool,
}

impl TempContext {
    /// Creates a new context in the [default base directory](default_base_dir).
    ///
    /// ## Errors
    ///
    /// [`Error::Configuration`] when the default base directory is unusable.
    pub fn new() -> Result<Self, Error> {
        let base_dir = default_base_dir()?;
        Self::new_internal(base_dir.to_path_buf(), TerminationRegistry::global())
    }

    /// Creates a new context in the specified directory.
    ///
    /// The directory is not checked up front; problems surface on the first
    /// creation call.
    ///
    /// ## Arguments
    ///
    /// * `dir` - The directory to create entries in.
    pub fn new_in<P: Borrow<Path>>(dir: P) -> Result<Self, Error> {
        Self::new_internal(dir.borrow().to_path_buf(), TerminationRegistry::global())
    }

    /// Creates a new context in the specified directory, tracked by the given
    /// registry instead of the process-wide one.
    ///
    /// ## Arguments
    ///
    /// * `dir` - The directory to create entries in.
    /// * `registry` - The registry tracking this context's entries.
    pub fn with_registry<P: Borrow<Path>>(
        dir: P,
        registry: Arc<TerminationRegistry>,
    ) -> Result<Self, Error> {
        Self::new_internal(dir.borrow().to_path_buf(), registry)
    }

    fn new_internal(
        base_dir: PathBuf,
        registry: Arc<TerminationRegistry>,
    ) -> Result<Self, Error> {
        let id = ContextId::next()?;
        registry.acquire()?;
        debug!(context = %id, base_dir = %base_dir.display(), "Created temp file context");
        Ok(Self {
            id,
            base_dir,
            registry,
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the identifier of this context.
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Returns the directory this context creates entries in.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Whether [`close`](Self::close) was already called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Creates a new temporary file named after `name`.
    ///
    /// A trailing extension made of `[a-zA-Z0-9_]` segments is kept as the
    /// suffix, so `"archive.tar.gz"` creates `archive_<random>.tar.gz`. See
    /// [`names::split_name`] for the exact rules.
    ///
    /// ## Errors
    ///
    /// [`Error::ContextClosed`] if the context is closed.
    pub fn create_temp_file(&self, name: &str) -> Result<TempEntry, Error> {
        let (prefix, suffix) = names::split_name(name);
        self.create(EntryKind::File, &prefix, &suffix)
    }

    /// Creates a new temporary file with the given prefix and suffix.
    ///
    /// ## Arguments
    ///
    /// * `prefix` - Sanitized with [`names::sanitize_prefix`]; `tmp_` when absent.
    /// * `suffix` - `.tmp` when absent. Must not contain path separators.
    ///
    /// ## Errors
    ///
    /// [`Error::ContextClosed`] if the context is closed, [`Error::InvalidName`]
    /// if the suffix contains a path separator.
    pub fn create_temp_file_with(
        &self,
        prefix: Option<&str>,
        suffix: Option<&str>,
    ) -> Result<TempEntry, Error> {
        let prefix = names::sanitize_prefix(prefix.unwrap_or_default());
        let suffix = suffix.unwrap_or(DEFAULT_SUFFIX);
        if suffix.chars().any(|ch| std::path::is_separator(ch) || ch == '\0') {
            return Err(Error::InvalidName(suffix.to_string()));
        }
        self.create(EntryKind::File, &prefix, suffix)
    }

    /// Creates a new temporary file with the default prefix and suffix.
    pub fn create_temp_file_default(&self) -> Result<TempEntry, Error> {
        self.create_temp_file_with(None, None)
    }

    /// Creates a new temporary directory with the given prefix. The directory
    /// and everything in it is deleted recursively.
    ///
    /// ## Errors
    ///
    /// [`Error::ContextClosed`] if the context is closed.
    pub fn create_temp_directory(&self, prefix: Option<&str>) -> Result<TempEntry, Error> {
        let prefix = names::sanitize_prefix(prefix.unwrap_or_default());
        self.create(EntryKind::Directory, &prefix, "")
    }

    /// Creates a new temporary directory with the default prefix.
    pub fn create_temp_directory_default(&self) -> Result<TempEntry, Error> {
        self.create_temp_directory(None)
    }

    /// Gets the number of entries still scheduled for deletion.
    pub fn size(&self) -> usize {
        self.registry.pending(self.id)
    }

    /// Closes the context, deleting every entry that was not closed on its own.
    ///
    /// Closing an already closed context does nothing. Entries are removed from
    /// the registry before deletion is attempted, so anything that fails to
    /// delete here is not retried by a later call.
    ///
    /// ## Errors
    ///
    /// [`Error::Delete`] if one entry could not be deleted, [`Error::DeleteMany`]
    /// if several could not; every entry is attempted either way.
    pub fn close(&self) -> Result<(), Error> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let entries = self.registry.take_all(self.id);
        self.registry.release();
        debug!(
            context = %self.id,
            pending = entries.as_ref().map_or(0, |e| e.len()),
            "Closing temp file context"
        );

        let mut failures = Vec::new();
        for entry in entries.into_iter().flat_map(|entries| entries.into_values()) {
            if let Err(source) = fs_ops::delete_entry(&entry.path, entry.kind) {
                failures.push(DeleteFailure {
                    path: entry.path,
                    kind: entry.kind,
                    source,
                });
            }
        }
        match Error::from_failures(failures) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Closes the context on tokio's blocking thread pool.
    #[cfg_attr(docsrs, doc(cfg(feature = "tokio")))]
    #[cfg(feature = "tokio")]
    pub async fn close_async(self) -> Result<(), Error> {
        crate::spawn_close(move || self.close()).await
    }

    fn create(&self, kind: EntryKind, prefix: &str, suffix: &str) -> Result<TempEntry, Error> {
        if self.is_closed() {
            return Err(Error::ContextClosed);
        }
        loop {
            let path = match kind {
                EntryKind::File => fs_ops::create_unique_file(&self.base_dir, prefix, suffix)?,
                EntryKind::Directory => fs_ops::create_unique_dir(&self.base_dir, prefix)?,
            };
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !self.registry.register(self.id, name.clone(), path.clone(), kind) {
                fs_ops::delete_path(&path)?;
                continue;
            }

            // A concurrent close has already taken everything registered
            // before it; what was registered after it sits in a fresh map.
            if self.is_closed() {
                self.discard_late_entries();
                return Err(Error::ContextClosed);
            }
            return Ok(TempEntry::new(
                self.id,
                Arc::clone(&self.registry),
                name,
                path,
                kind,
            ));
        }
    }

    fn discard_late_entries(&self) {
        for entry in self
            .registry
            .take_all(self.id)
            .into_iter()
            .flat_map(|entries| entries.into_values())
        {
            if let Err(e) = fs_ops::delete_entry(&entry.path, entry.kind) {
                warn!(
                    path = %entry.path.display(),
                    error = %e,
                    "Unable to delete {}",
                    entry.kind
                );
            }
        }
    }
}

/// Closes the context, logging any failure.
impl Drop for TempContext {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(context = %self.id, error = %e, "Failed to close temp file context on drop");
        }
    }
}

impl Debug for TempContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TempContext")
            .field("id", &self.id)
            .field("base_dir", &self.base_dir)
            .field("closed", &self.is_closed())
            .finish()
    }
}
