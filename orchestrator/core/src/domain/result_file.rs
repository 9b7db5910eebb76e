// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Result Files
//!
//! Files a run materialized in its `/out` mount. Nothing is persisted; the
//! listing is derived from the directory on every call. Reads are resolved
//! against that listing, so a name outside the output tree is simply not
//! found.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

pub const STDOUT_LOG: &str = "STDOUT.log";
pub const STDERR_LOG: &str = "STDERR.log";
pub const METADATA_FILE: &str = "_metadata.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultFile {
    /// Path relative to the output directory, `/`-separated
    pub filename: String,
    pub mime_type: String,
    pub full_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultFileContent {
    #[serde(flatten)]
    pub file: ResultFile,
    pub content: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum ResultFileError {
    #[error("Result file not found: {0}")]
    NotFound(String),
    #[error("Failed to read output directory {path:?}: {message}")]
    Io { path: PathBuf, message: String },
}

/// Every regular file under `out_dir`, sorted by name. A missing directory
/// yields an empty listing.
pub fn list_result_files(out_dir: &Path) -> Result<Vec<ResultFile>, ResultFileError> {
    if !out_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(out_dir).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| ResultFileError::Io {
            path: out_dir.to_path_buf(),
            message: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(out_dir)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        files.push(ResultFile {
            mime_type: detect_mime_type(entry.path()),
            filename: relative,
            full_path: entry.path().to_path_buf(),
        });
    }
    files.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(files)
}

pub fn read_result_file(out_dir: &Path, filename: &str) -> Result<ResultFileContent, ResultFileError> {
    let file = list_result_files(out_dir)?
        .into_iter()
        .find(|f| f.filename == filename)
        .ok_or_else(|| ResultFileError::NotFound(filename.to_string()))?;
    let content = std::fs::read(&file.full_path).map_err(|e| ResultFileError::Io {
        path: file.full_path.clone(),
        message: e.to_string(),
    })?;
    Ok(ResultFileContent { file, content })
}

/// Content sniffing first, then the extension table.
pub fn detect_mime_type(path: &Path) -> String {
    if let Ok(Some(kind)) = infer::get_from_path(path) {
        return kind.mime_type().to_string();
    }
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    mime_for_extension(&extension).to_string()
}

fn mime_for_extension(extension: &str) -> &'static str {
    match extension {
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        "tsv" => "text/tab-separated-values",
        "json" => "application/json",
        "geojson" => "application/geo+json",
        "yml" | "yaml" => "application/yaml",
        "xml" => "application/xml",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "nc" => "application/x-netcdf",
        "parquet" => "application/vnd.apache.parquet",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn output_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(STDOUT_LOG), "Hello, World!\n").unwrap();
        std::fs::write(dir.path().join("result.json"), "{}").unwrap();
        std::fs::create_dir_all(dir.path().join("plots")).unwrap();
        // PNG signature
        std::fs::write(dir.path().join("plots").join("chart.bin"), [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0]).unwrap();
        dir
    }

    #[test]
    fn test_listing_is_recursive_with_relative_names() {
        let dir = output_tree();
        let files = list_result_files(dir.path()).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, vec![STDOUT_LOG, "plots/chart.bin", "result.json"]);
        assert_eq!(files[0].mime_type, "text/plain");
        assert_eq!(files[1].mime_type, "image/png");
        assert_eq!(files[2].mime_type, "application/json");
    }

    #[test]
    fn test_missing_output_dir_lists_nothing() {
        let dir = TempDir::new().unwrap();
        assert!(list_result_files(&dir.path().join("absent")).unwrap().is_empty());
    }

    #[test]
    fn test_read_resolves_against_listing() {
        let dir = output_tree();
        let content = read_result_file(dir.path(), STDOUT_LOG).unwrap();
        assert_eq!(content.content, b"Hello, World!\n");

        let outside = read_result_file(dir.path(), "../etc/passwd").unwrap_err();
        assert!(matches!(outside, ResultFileError::NotFound(_)));
    }
}
