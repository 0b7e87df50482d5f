//! External collaborator capabilities.
//!
//! The engine consumes exactly three capabilities, each opaque to it:
//! generation, reduction, and document access. All are synchronous blocking
//! calls; a caller wanting timeouts or cancellation wraps the capability
//! itself. Generation failures carry no structured code — overflow is
//! classified from error text by `retry::is_overflow_error`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Produces text from a system prompt and an assembled payload.
pub trait Generator {
    /// Fails with an overflow-shaped error when the payload exceeds the
    /// underlying model's input limit; any other error is surfaced
    /// unmodified.
    fn generate(&self, system_prompt: &str, tools: &[String], payload: &str) -> Result<String>;
}

/// Summarizes a chunk of text down to a character target.
pub trait Reducer {
    fn reduce(&self, chunk: &str, label: &str, target_chars: usize) -> Result<String>;
}

/// Read access to external documents, used only under ledger budgeting.
pub trait DocumentSource {
    fn read_file(&self, path: &Path) -> Result<String>;
    fn list_files(&self, pattern: &str) -> Result<Vec<PathBuf>>;
}

/// Filesystem-backed document source.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsDocumentSource;

impl DocumentSource for FsDocumentSource {
    fn read_file(&self, path: &Path) -> Result<String> {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read document: {}", path.display()))
    }

    fn list_files(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let entries = glob::glob(pattern)
            .with_context(|| format!("Invalid file pattern: {}", pattern))?;
        let mut paths: Vec<PathBuf> = entries.filter_map(|entry| entry.ok()).collect();
        paths.sort();
        Ok(paths)
    }
}
