//! Chunked reduction of oversized external reads.
//!
//! An oversized read is split into overlapping chunks, each summarized by
//! the external reduce capability, with one further merge reduction when
//! there is more than one chunk. The raw body, every chunk, the summary,
//! and a metadata record are persisted to a content-hash-named directory so
//! the lossy reduction is always recoverable by an operator.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::capability::Reducer;
use crate::errors::ArtifactError;

/// Chunk sizing for oversized reads, in characters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkingParams {
    /// Characters per chunk
    pub chunk_size: usize,
    /// Characters shared between adjacent chunks
    pub overlap: usize,
    /// Target length of the final summary
    pub summary_target: usize,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            chunk_size: 12_000,
            overlap: 400,
            summary_target: 4_000,
        }
    }
}

/// Result of reducing one oversized read.
#[derive(Debug, Clone)]
pub struct Reduction {
    /// The final summary, no longer than the requested target
    pub summary: String,
    /// Directory holding `raw.txt`, `chunk_NNN.txt`, `summary.txt`,
    /// `meta.json`
    pub artifact_dir: PathBuf,
    /// Number of chunks produced
    pub chunk_count: usize,
}

/// Splits, summarizes, and archives oversized reads.
pub struct ChunkedReducer<'a> {
    reducer: &'a dyn Reducer,
    artifact_root: PathBuf,
    params: ChunkingParams,
}

impl<'a> ChunkedReducer<'a> {
    /// Create a reducer writing artifacts under `artifact_root`.
    pub fn new(reducer: &'a dyn Reducer, artifact_root: PathBuf, params: ChunkingParams) -> Self {
        Self {
            reducer,
            artifact_root,
            params,
        }
    }

    /// The chunking parameters in effect.
    pub fn params(&self) -> ChunkingParams {
        self.params
    }

    /// Reduce `raw` to at most `target_chars` characters, persisting the
    /// full audit trail.
    pub fn reduce(&self, raw: &str, label: &str, target_chars: usize) -> Result<Reduction> {
        let chunks = split_chunks(raw, self.params.chunk_size, self.params.overlap);
        let dir = self.artifact_root.join(content_hash(raw));

        fs::create_dir_all(&dir).map_err(|source| ArtifactError::DirCreateFailed {
            path: dir.clone(),
            source,
        })?;
        write_artifact(&dir.join("raw.txt"), raw)?;
        for (i, chunk) in chunks.iter().enumerate() {
            write_artifact(&dir.join(format!("chunk_{:03}.txt", i + 1)), chunk)?;
        }

        debug!(
            label,
            chunks = chunks.len(),
            target_chars,
            dir = %dir.display(),
            "reducing oversized read"
        );

        let per_chunk_target = (target_chars / chunks.len().max(1)).max(1);
        let mut partials = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let partial = self
                .reducer
                .reduce(chunk, label, per_chunk_target)
                .map_err(|source| ArtifactError::ReduceFailed {
                    label: label.to_string(),
                    source,
                })?;
            partials.push(partial);
        }

        let merged = if partials.len() > 1 {
            self.reducer
                .reduce(&partials.join("\n\n"), label, target_chars)
                .map_err(|source| ArtifactError::ReduceFailed {
                    label: label.to_string(),
                    source,
                })?
        } else {
            partials.pop().unwrap_or_default()
        };
        // External reducers are not trusted to honor the target exactly
        let summary: String = merged.chars().take(target_chars).collect();

        write_artifact(&dir.join("summary.txt"), &summary)?;

        let meta = serde_json::json!({
            "chunks": chunks.len(),
            "chunk_size": self.params.chunk_size,
            "overlap": self.params.overlap,
            "raw_chars": raw.chars().count(),
            "label": label,
            "created_at": chrono::Utc::now().to_rfc3339(),
        });
        write_artifact(&dir.join("meta.json"), &serde_json::to_string_pretty(&meta)?)?;

        Ok(Reduction {
            summary,
            artifact_dir: dir,
            chunk_count: chunks.len(),
        })
    }
}

/// Split text into chunks of `size` characters overlapping by `overlap`.
///
/// The stride is `size - overlap` (floored at one character). The final
/// chunk may be shorter. Empty input yields no chunks.
pub fn split_chunks(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() || size == 0 {
        return Vec::new();
    }

    let stride = size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += stride;
    }
    chunks
}

fn content_hash(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("{:x}", hasher.finalize())[..12].to_string()
}

fn write_artifact(path: &Path, content: &str) -> Result<(), ArtifactError> {
    fs::write(path, content).map_err(|source| ArtifactError::WriteFailed {
        path: path.to_path_buf(),
        source,
    })
}
