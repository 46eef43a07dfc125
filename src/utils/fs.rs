//! File system utilities for the collector node

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use super::error::{Error, Result};

/// Outcome of reading a JSON document from disk, keeping "absent" apart from "broken".
#[derive(Debug)]
pub enum JsonFileError {
    NotFound(PathBuf),
    Unreadable(PathBuf, io::Error),
    Malformed(PathBuf, serde_json::Error),
}

impl std::fmt::Display for JsonFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            | JsonFileError::NotFound(p) => write!(f, "file not found: {}", p.display()),
            | JsonFileError::Unreadable(p, e) => write!(f, "cannot read {}: {}", p.display(), e),
            | JsonFileError::Malformed(p, e) => write!(f, "invalid JSON in {}: {}", p.display(), e),
        }
    }
}

/// Reads and deserializes a JSON file
pub fn read_json_file<T: DeserializeOwned, P: AsRef<Path>>(
    path: P,
) -> std::result::Result<T, JsonFileError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| match e.kind() {
        | io::ErrorKind::NotFound => JsonFileError::NotFound(path.to_path_buf()),
        | _ => JsonFileError::Unreadable(path.to_path_buf(), e),
    })?;
    serde_json::from_str(&content).map_err(|e| JsonFileError::Malformed(path.to_path_buf(), e))
}

/// Fails with a configuration error naming `what` if `path` does not exist
pub fn ensure_exists(path: &Path, what: &str) -> Result<()> {
    if !path.exists() {
        return Err(Error::ConfigError(format!("{} does not exist: {}", what, path.display())));
    }
    Ok(())
}
