//! Chunked report export pipeline.
//!
//! ## Design
//!
//! - Datasets are streamed in fixed-size chunks; at most one chunk's rows are
//!   held in memory at a time
//! - Each chunk is persisted as an intermediate artifact, then all chunks are
//!   merged **in index order** into the final artifact (row order is
//!   load-bearing for formats with a single header row)
//! - Cancellation is cooperative and polled at chunk boundaries; a cancelled
//!   export deletes every partial artifact and never merges
//! - The data source and artifact sink are collaborator traits; local disk
//!   and in-memory implementations are provided

pub mod format;
pub mod pipeline;
pub mod sink;
pub mod source;

pub use format::ExportFormat;
pub use pipeline::{
    merge_chunks, Artifact, CancelProbe, ExportChunk, ExportError, ExportPipeline, ExportRequest,
    ProgressSink,
};
pub use sink::{ArtifactSink, FsArtifactSink, InMemoryArtifactSink};
pub use source::{DataQuery, DataSource, InMemoryDataSource, Row};
