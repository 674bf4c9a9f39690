//! Chunked export pipeline: stream, chunk, merge, clean up.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::format::ExportFormat;
use crate::sink::ArtifactSink;
use crate::source::{DataQuery, DataSource};

/// Export failure.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("chunk size must be at least 1")]
    InvalidChunkSize,

    /// Not a failure in the error-taxonomy sense: a distinct outcome. Partial
    /// artifacts are already cleaned up when this is returned.
    #[error("export cancelled")]
    Cancelled,

    #[error("data source error: {0}")]
    Source(#[source] anyhow::Error),

    #[error("artifact sink error: {0}")]
    Sink(#[source] anyhow::Error),
}

/// Intermediate artifact produced for one chunk of the dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportChunk {
    pub index: u32,
    pub record_count: u64,
    pub path: String,
}

/// Final artifact reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: String,
    pub size_bytes: u64,
    pub rows: u64,
}

/// Progress observer; receives 0-100.
pub trait ProgressSink: Send + Sync {
    fn report(&self, percent: u8);
}

impl<F: Fn(u8) + Send + Sync> ProgressSink for F {
    fn report(&self, percent: u8) {
        self(percent)
    }
}

/// Cooperative cancellation probe, polled at chunk boundaries only.
pub trait CancelProbe: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

impl<F: Fn() -> bool + Send + Sync> CancelProbe for F {
    fn is_cancelled(&self) -> bool {
        self()
    }
}

/// One export to produce: where to put it and what to read.
///
/// `prefix` namespaces every artifact of this run; a re-run after a crash
/// uses a fresh prefix, which is what makes at-least-once delivery safe.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub prefix: String,
    pub query: DataQuery,
    pub columns: Vec<String>,
}

/// Streams a dataset in bounded chunks and merges them into one artifact.
#[derive(Debug, Clone)]
pub struct ExportPipeline {
    format: ExportFormat,
    chunk_size: usize,
}

impl ExportPipeline {
    pub fn new(format: ExportFormat) -> Self {
        Self {
            format,
            chunk_size: 1000,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Run the export.
    ///
    /// Cancellation is checked before each chunk and once more before the
    /// merge; once the merge starts it runs to completion, so a `Cancelled`
    /// return guarantees no final artifact exists.
    pub fn run(
        &self,
        source: &dyn DataSource,
        sink: &dyn ArtifactSink,
        request: &ExportRequest,
        progress: &dyn ProgressSink,
        cancel: &dyn CancelProbe,
    ) -> Result<Artifact, ExportError> {
        if self.chunk_size == 0 {
            return Err(ExportError::InvalidChunkSize);
        }

        let total = source.count(&request.query).map_err(ExportError::Source)?;
        let chunk_count = total.div_ceil(self.chunk_size);
        debug!(total, chunk_count, chunk_size = self.chunk_size, "starting export");

        let mut chunks: Vec<ExportChunk> = Vec::with_capacity(chunk_count);
        let mut processed = 0usize;

        for index in 0..chunk_count {
            if cancel.is_cancelled() {
                self.cleanup(sink, &chunks);
                info!(chunks = chunks.len(), "export cancelled mid-stream");
                return Err(ExportError::Cancelled);
            }

            let rows = source
                .page(&request.query, index * self.chunk_size, self.chunk_size)
                .map_err(ExportError::Source)?;
            let bytes = self.format.encode_chunk(&request.columns, &rows);
            let path = chunk_path(&request.prefix, index);
            sink.write(&path, &bytes).map_err(ExportError::Sink)?;

            processed += rows.len();
            chunks.push(ExportChunk {
                index: index as u32,
                record_count: rows.len() as u64,
                path,
            });

            let percent = (((processed as f64 / total as f64) * 100.0).round() as u8).min(100);
            progress.report(percent);
        }

        // Final poll-and-act: never merge after observing cancellation.
        if cancel.is_cancelled() {
            self.cleanup(sink, &chunks);
            info!(chunks = chunks.len(), "export cancelled before merge");
            return Err(ExportError::Cancelled);
        }

        let final_path = format!("{}/report.{}", request.prefix, self.format.extension());
        let artifact = merge_chunks(sink, &chunks, &request.columns, self.format, &final_path)?;

        self.cleanup(sink, &chunks);

        if total == 0 {
            progress.report(100);
        }

        info!(path = %artifact.path, rows = artifact.rows, size = artifact.size_bytes, "export finished");
        Ok(artifact)
    }

    /// Best-effort removal of intermediate chunk artifacts.
    fn cleanup(&self, sink: &dyn ArtifactSink, chunks: &[ExportChunk]) {
        for chunk in chunks {
            if let Err(e) = sink.delete(&chunk.path) {
                warn!(path = %chunk.path, error = %e, "failed to delete chunk artifact");
            }
        }
    }
}

fn chunk_path(prefix: &str, index: usize) -> String {
    format!("{prefix}/chunk-{index:05}")
}

/// Merge chunk artifacts into `final_path` in ascending index order,
/// streaming one chunk at a time.
///
/// Merging is deterministic: the same chunk set always produces byte-identical
/// output regardless of the order the list arrives in.
pub fn merge_chunks(
    sink: &dyn ArtifactSink,
    chunks: &[ExportChunk],
    columns: &[String],
    format: ExportFormat,
    final_path: &str,
) -> Result<Artifact, ExportError> {
    let mut ordered: Vec<&ExportChunk> = chunks.iter().collect();
    ordered.sort_by_key(|c| c.index);

    let header = format.header(columns).unwrap_or_default();
    sink.write(final_path, &header).map_err(ExportError::Sink)?;

    let mut size_bytes = header.len() as u64;
    let mut rows = 0u64;

    for chunk in ordered {
        let bytes = sink.read(&chunk.path).map_err(ExportError::Sink)?;
        sink.append(final_path, &bytes).map_err(ExportError::Sink)?;
        size_bytes += bytes.len() as u64;
        rows += chunk.record_count;
    }

    Ok(Artifact {
        path: final_path.to_string(),
        size_bytes,
        rows,
    })
}
