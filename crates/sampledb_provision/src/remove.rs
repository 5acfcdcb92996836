//! Best-effort removal of directory trees.
use std::{
    ffi::OsString,
    io::ErrorKind,
    path::{Path, PathBuf},
};

/// The filesystem mutations performed while removing a tree.
///
/// The default methods delete for real. Tests swap in implementations that
/// refuse to delete particular paths.
pub trait Unlinker: Send + Sync {
    fn remove_file(&self, path: &Path) -> std::io::Result<()> {
        fs_err::remove_file(path)
    }

    fn remove_dir(&self, path: &Path) -> std::io::Result<()> {
        fs_err::remove_dir(path)
    }
}

/// Deletes through the regular filesystem calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsUnlinker;

impl Unlinker for FsUnlinker {}

/// Removes `dir` and everything below it, continuing past failures.
///
/// Each failure is logged as a warning. Returns `true` only if every entry,
/// including `dir` itself, was removed. A path that does not exist is
/// considered removed.
pub fn remove_directory(dir: &Path) -> bool {
    remove_directory_with(&FsUnlinker, dir, &mut |err| {
        tracing::warn!("{err}");
    })
}

/// Like [`remove_directory`], but deletes through `unlinker` and hands every
/// failure to `on_failure` instead of logging it.
///
/// Symbolic links are removed, never followed.
pub fn remove_directory_with(
    unlinker: &dyn Unlinker,
    dir: &Path,
    on_failure: &mut dyn FnMut(std::io::Error),
) -> bool {
    match fs_err::symlink_metadata(dir) {
        Ok(metadata) if metadata.is_dir() => {
            let mut path = dir.to_path_buf();
            remove_tree(unlinker, &mut path, on_failure)
        }
        Ok(_) => unlink(unlinker.remove_file(dir), on_failure),
        Err(e) if e.kind() == ErrorKind::NotFound => true,
        Err(e) => {
            on_failure(e);
            false
        }
    }
}

/// Removes the children of `dir`, then `dir` itself. `dir` is used as the
/// scratch path for the children and is restored before returning.
fn remove_tree(
    unlinker: &dyn Unlinker,
    dir: &mut PathBuf,
    on_failure: &mut dyn FnMut(std::io::Error),
) -> bool {
    let mut success = true;

    let mut children: Vec<(OsString, bool)> = Vec::new();
    match fs_err::read_dir(&*dir) {
        Ok(entries) => {
            for entry in entries {
                match entry {
                    Ok(entry) => {
                        let is_dir = entry.file_type().is_ok_and(|ty| ty.is_dir());
                        children.push((entry.file_name(), is_dir));
                    }
                    Err(e) => {
                        on_failure(e);
                        success = false;
                    }
                }
            }
        }
        Err(e) if e.kind() == ErrorKind::NotFound => return true,
        Err(e) => {
            on_failure(e);
            success = false;
        }
    }

    for (name, is_dir) in children {
        dir.push(name);
        let removed = if is_dir {
            remove_tree(unlinker, dir, on_failure)
        } else {
            unlink(unlinker.remove_file(dir), on_failure)
        };
        success &= removed;
        dir.pop();
    }

    unlink(unlinker.remove_dir(dir), on_failure) && success
}

fn unlink(result: std::io::Result<()>, on_failure: &mut dyn FnMut(std::io::Error)) -> bool {
    match result {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => true,
        Err(e) => {
            on_failure(e);
            false
        }
    }
}
