//! Creation and deletion primitives the registry and handles are built on.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

#[cfg(not(feature = "uuid"))]
use crate::random_name::RandomName;
use crate::EntryKind;
#[cfg(feature = "uuid")]
use uuid::Uuid;

/// Creates a new, previously nonexistent regular file in `parent` whose name
/// starts with `prefix` and ends with `suffix`.
pub(crate) fn create_unique_file(
    parent: &Path,
    prefix: &str,
    suffix: &str,
) -> io::Result<PathBuf> {
    loop {
        let path = parent.join(random_name(prefix, suffix));
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        match options.open(&path) {
            Ok(_) => return Ok(path),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Creates a new, previously nonexistent directory in `parent` whose name
/// starts with `prefix`.
pub(crate) fn create_unique_dir(parent: &Path, prefix: &str) -> io::Result<PathBuf> {
    loop {
        let path = parent.join(random_name(prefix, ""));
        let mut builder = fs::DirBuilder::new();
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        match builder.create(&path) {
            Ok(()) => return Ok(path),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Removes a single file or empty directory.
pub(crate) fn delete_path(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir(path)
    } else {
        fs::remove_file(path)
    }
}

/// Removes a directory and everything beneath it. Fails as a whole if any
/// contained entry cannot be removed.
pub(crate) fn delete_recursive(path: &Path) -> io::Result<()> {
    fs::remove_dir_all(path)?;
    debug_assert!(
        fs::symlink_metadata(path).is_err(),
        "{} still exists after recursive delete",
        path.display()
    );
    Ok(())
}

/// Deletes a temporary entry if it is still present. Only a missing path
/// counts as already deleted; any other failure to inspect it is an error.
pub(crate) fn delete_entry(path: &Path, kind: EntryKind) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    }
    let result = match kind {
        EntryKind::Directory => delete_recursive(path),
        EntryKind::File => delete_path(path),
    };
    match result {
        // Removed concurrently by someone else.
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn random_name(prefix: &str, suffix: &str) -> String {
    #[cfg(feature = "uuid")]
    {
        format!("{}{}{}", prefix, Uuid::new_v4().simple(), suffix)
    }

    #[cfg(not(feature = "uuid"))]
    {
        RandomName::new(prefix, suffix).as_ref().to_string()
    }
}
