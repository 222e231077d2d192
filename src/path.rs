//! Resolving file arguments.

use std::io;
use std::path::{Path, PathBuf};

/// Makes a file path absolute, resolving its parent directory (and any link
/// to it) while leaving the filename itself untouched.
pub fn absolutify(path: impl Into<PathBuf>) -> io::Result<PathBuf> {
    let path = path.into();

    let dir = match path.parent() {
        None => std::env::current_dir()?,
        Some(parent) => {
            if parent == Path::new("") {
                std::env::current_dir()?
            } else {
                parent.to_path_buf()
            }
        }
    };
    let filename = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Filename not found in path"))?
        .to_os_string();

    let dir = if let Ok(linked_dir) = dir.read_link() {
        linked_dir
    } else {
        dir
    };

    let dir = if let Ok(abs_dir) = dir.canonicalize() {
        abs_dir
    } else {
        dir
    };

    Ok(dir.join(filename))
}

/// Resolves a file argument to an absolute path of an existing, regular
/// (non-directory) file.
pub fn resolve(path: impl Into<PathBuf>) -> io::Result<PathBuf> {
    let path = absolutify(path)?;

    let metadata = std::fs::metadata(&path)?;
    if metadata.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is a directory", path.display()),
        ));
    }

    Ok(path)
}
