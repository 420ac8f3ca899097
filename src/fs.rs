//! Filesystem glue: locating `config.json`, the tool directory, and the log
//! directory relative to the running binary, mirroring
//! `examples/original_source/src/adapter/fs.py`.

use errors::*;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// The directory the running executable lives in. Falls back to the current
/// directory if the executable's path can't be resolved, which only happens
/// in exotic sandboxed environments.
pub fn root_dir() -> Result<PathBuf> {
    let exe = env::current_exe()?;
    exe.parent()
        .map(|p| p.to_path_buf())
        .ok_or_else(|| "executable has no parent directory".into())
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join("assets").join("config.json")
}

/// Returns the log directory, creating it if absent.
pub fn log_dir(root: &Path) -> Result<PathBuf> {
    let dir = root.join("logs");
    fs::create_dir_all(&dir).chain_err(|| format!("error creating log directory at {}", dir.display()))?;
    Ok(dir)
}

/// Returns the tool directory, creating it if absent.
pub fn tool_dir(root: &Path) -> Result<PathBuf> {
    let dir = root.join("tools");
    fs::create_dir_all(&dir).chain_err(|| format!("error creating tool directory at {}", dir.display()))?;
    Ok(dir)
}
