//! # tempfile-context
//!
//! Provides the [`TempContext`] struct, a manager for temporary files and directories
//! that are deleted when closed individually, when their context is closed, or at the
//! latest when the process exits.
//!
//! Unlike a plain "delete on exit" list, entries are removed from the process-wide
//! registry as soon as they are closed, so long-running processes that create and
//! delete many temporary files do not accumulate bookkeeping.
//!
//! ```
//! use tempfile_context::TempContext;
//!
//! fn main() -> Result<(), tempfile_context::Error> {
//!     let context = TempContext::new()?;
//!
//!     // Closed on its own.
//!     let upload = context.create_temp_file("upload.tar.gz")?;
//!     assert!(upload.path()?.is_file());
//!     upload.close()?;
//!
//!     // Left for the context to delete.
//!     let scratch = context.create_temp_directory(Some("scratch"))?;
//!     let scratch_path = scratch.path()?;
//!     std::mem::forget(scratch);
//!     assert_eq!(context.size(), 1);
//!
//!     context.close()?;
//!     assert!(!scratch_path.exists());
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! * `uuid` - Random name segments are generated with the
//!   [`uuid`](https://crates.io/crates/uuid) crate instead of from the process
//!   id, a sequence number and the clock.
//! * `tokio` - Provides `close_async` on [`TempEntry`] and [`TempContext`], running the
//!   blocking close on tokio's blocking thread pool.
//! * `async-trait` - Provides the `AsyncClose` trait for both handle types.

// Document crate features on docs.rs.
#![cfg_attr(docsrs, feature(doc_cfg))]

mod context;
mod entry;
mod errors;
mod fs_ops;
pub mod names;
#[cfg(not(feature = "uuid"))]
mod random_name;
mod registry;

pub use context::{default_base_dir, TempContext};
pub use entry::{EntryKind, TempEntry};
pub use errors::{DeleteFailure, Error};
pub use registry::{ContextId, ShutdownHook, TerminationRegistry};

#[cfg(feature = "async-trait")]
use async_trait::async_trait;

/// Closes a handle without blocking the async executor.
#[cfg(feature = "async-trait")]
#[cfg_attr(docsrs, doc(cfg(feature = "async-trait")))]
#[async_trait]
pub trait AsyncClose: Sized + Send {
    async fn close(self) -> Result<(), Error>;
}

#[cfg(feature = "async-trait")]
#[cfg_attr(docsrs, doc(cfg(feature = "async-trait")))]
#[async_trait]
impl AsyncClose for TempEntry {
    async fn close(self) -> Result<(), Error> {
        self.close_async().await
    }
}

#[cfg(feature = "async-trait")]
#[cfg_attr(docsrs, doc(cfg(feature = "async-trait")))]
#[async_trait]
impl AsyncClose for TempContext {
    async fn close(self) -> Result<(), Error> {
        self.close_async().await
    }
}

#[cfg(feature = "tokio")]
pub(crate) async fn spawn_close<F>(close: F) -> Result<(), Error>
where
    F: FnOnce() -> Result<(), Error> + Send + 'static,
{
    tokio::task::spawn_blocking(close)
        .await
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}
