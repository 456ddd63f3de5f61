use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use thiserror::Error;

use crate::EntryKind;

#[derive(Debug, Error)]
pub enum Error {
    /// The [`TempContext`](crate::TempContext) was already closed.
    #[error("Temp file context is closed")]
    ContextClosed,
    /// The [`TempEntry`](crate::TempEntry) was already closed.
    #[error("Temp entry is closed")]
    EntryClosed,
    /// The default base directory is missing, cannot be created, or is unusable.
    #[error("System temp directory {reason}: {}", .path.display())]
    Configuration {
        path: PathBuf,
        reason: &'static str,
        #[source]
        source: Option<std::io::Error>,
    },
    /// A process-wide counter wrapped around.
    #[error("{0} integer wraparound detected")]
    CounterOverflow(&'static str),
    /// An invalid file name component was specified.
    #[error("An invalid file name component was specified: {0:?}")]
    InvalidName(String),
    /// A single temporary entry could not be deleted.
    #[error(transparent)]
    Delete(DeleteFailure),
    /// More than one temporary entry could not be deleted.
    #[error("{}", summarize(.0))]
    DeleteMany(Vec<DeleteFailure>),
    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Every deletion failure carried by this error, in the order they occurred.
    /// Empty for errors that are not about deletion.
    pub fn failures(&self) -> &[DeleteFailure] {
        match self {
            Self::Delete(failure) => std::slice::from_ref(failure),
            Self::DeleteMany(failures) => failures,
            _ => &[],
        }
    }

    /// Builds the error reported for a batch of failed deletions, or `None` when nothing failed.
    pub(crate) fn from_failures(mut failures: Vec<DeleteFailure>) -> Option<Self> {
        match failures.len() {
            0 => None,
            1 => failures.pop().map(Self::Delete),
            _ => Some(Self::DeleteMany(failures)),
        }
    }
}

/// A path that could not be removed, along with the reason.
#[derive(Debug)]
pub struct DeleteFailure {
    pub path: PathBuf,
    pub kind: EntryKind,
    pub source: std::io::Error,
}

impl Display for DeleteFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Unable to delete temporary {}: {}",
            self.kind,
            self.path.display()
        )
    }
}

impl std::error::Error for DeleteFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

fn summarize(failures: &[DeleteFailure]) -> String {
    let mut message = String::from("Unable to delete temporary directories/files:");
    for failure in failures {
        message.push_str("\n    ");
        message.push_str(&failure.path.display().to_string());
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::io;

    fn failure(path: &str, kind: EntryKind) -> DeleteFailure {
        DeleteFailure {
            path: PathBuf::from(path),
            kind,
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        }
    }

    #[test]
    fn no_failures_is_no_error() {
        assert!(Error::from_failures(Vec::new()).is_none());
    }

    #[test]
    fn single_failure_names_path_and_keeps_cause() {
        let err = Error::from_failures(vec![failure("/tmp/a.tmp", EntryKind::File)]).unwrap();
        assert!(matches!(err, Error::Delete(_)));
        assert_eq!(err.to_string(), "Unable to delete temporary file: /tmp/a.tmp");
        assert_eq!(err.source().unwrap().to_string(), "denied");
    }

    #[test]
    fn many_failures_list_every_path() {
        let err = Error::from_failures(vec![
            failure("/tmp/a.tmp", EntryKind::File),
            failure("/tmp/b", EntryKind::Directory),
        ])
        .unwrap();
        assert_eq!(
            err.to_string(),
            "Unable to delete temporary directories/files:\n    /tmp/a.tmp\n    /tmp/b"
        );
        assert_eq!(err.failures().len(), 2);
        assert!(err.failures().iter().all(|f| f.source.to_string() == "denied"));
    }
}
