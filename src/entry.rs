use std::fmt::{Debug, Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::warn;

use crate::registry::{ContextId, TerminationRegistry};
use crate::{fs_ops, Error};

/// Whether a temporary entry is a regular file or a directory.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum EntryKind {
    /// Deleted with a single remove.
    File,
    /// Deleted recursively, including everything beneath it.
    Directory,
}

impl Display for EntryKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Directory => write!(f, "directory"),
        }
    }
}

/// A temporary file or directory created by a [`TempContext`](crate::TempContext).
///
/// Closing the entry deletes it and removes it from its context's bookkeeping.
/// An entry that is never closed is deleted when its context is closed, or at
/// process exit at the latest. Dropping the entry closes it.
pub struct TempEntry {
    context: ContextId,
    registry: Arc<TerminationRegistry>,

    /// Set to `None` exactly once, by whichever call closes the entry.
    path: ArcSwapOption<PathBuf>,

    /// The name the entry is registered under.
    name: String,

    kind: EntryKind,
}

impl TempEntry {
    pub(crate) fn new(
        context: ContextId,
        registry: Arc<TerminationRegistry>,
        name: String,
        path: PathBuf,
        kind: EntryKind,
    ) -> Self {
        Self {
            context,
            registry,
            path: ArcSwapOption::from_pointee(path),
            name,
            kind,
        }
    }

    /// Returns the path of the temporary file or directory.
    ///
    /// ## Errors
    ///
    /// [`Error::EntryClosed`] once the entry has been closed.
    pub fn path(&self) -> Result<Arc<PathBuf>, Error> {
        self.path.load_full().ok_or(Error::EntryClosed)
    }

    /// Whether this is a file or a directory.
    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    /// Whether [`close`](Self::close) was already called.
    pub fn is_closed(&self) -> bool {
        self.path.load().is_none()
    }

    /// Deletes the file or directory and stops tracking it.
    ///
    /// Closing an already closed entry does nothing. When called concurrently,
    /// exactly one call performs the deletion.
    ///
    /// ## Example
    ///
    /// ```
    /// # use tempfile_context::{TempContext, Error};
    /// let context = TempContext::new()?;
    /// let entry = context.create_temp_file("report.pdf")?;
    /// let path = entry.path()?;
    /// assert!(path.is_file());
    ///
    /// entry.close()?;
    /// assert!(!path.exists());
    /// assert_eq!(context.size(), 0);
    ///
    /// // Closing again is a no-op.
    /// entry.close()?;
    /// # Ok::<(), Error>(())
    /// ```
    pub fn close(&self) -> Result<(), Error> {
        let Some(path) = self.path.swap(None) else {
            return Ok(());
        };
        self.registry.unregister(self.context, &self.name);
        fs_ops::delete_entry(&path, self.kind).map_err(|source| {
            Error::Delete(crate::DeleteFailure {
                path: path.to_path_buf(),
                kind: self.kind,
                source,
            })
        })
    }

    /// Closes the entry on tokio's blocking thread pool.
    ///
    /// ## Example
    ///
    /// ```
    /// # use tempfile_context::{TempContext, Error};
    /// # let _ = tokio_test::block_on(async {
    /// let context = TempContext::new()?;
    /// let file = context.create_temp_file_default()?;
    /// let path = file.path()?;
    ///
    /// file.close_async().await?;
    /// assert!(!path.exists());
    /// # Ok::<(), Error>(())
    /// # });
    /// ```
    #[cfg_attr(docsrs, doc(cfg(feature = "tokio")))]
    #[cfg(feature = "tokio")]
    pub async fn close_async(self) -> Result<(), Error> {
        crate::spawn_close(move || self.close()).await
    }
}

/// Closes the entry, logging any failure.
impl Drop for TempEntry {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "Failed to delete temporary {} on drop", self.kind);
        }
    }
}

impl Debug for TempEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.path.load().as_deref() {
            Some(path) => write!(f, "{:?}", path),
            None => write!(f, "<closed {}>", self.kind),
        }
    }
}
