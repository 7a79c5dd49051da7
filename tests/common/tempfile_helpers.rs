//! Helper functions for tempfile/tempdir usage in tests

use anyhow::Context;
use std::path::PathBuf;

/// Create a temp directory with a helpful error message.
pub fn create_temp_dir() -> anyhow::Result<tempfile::TempDir> {
    tempfile::tempdir().context("Failed to create temporary directory for test")
}

/// Path of a (not yet created) log file inside `dir`
pub fn log_file_in(dir: &tempfile::TempDir, name: &str) -> PathBuf {
    dir.path().join("logs").join(name)
}
