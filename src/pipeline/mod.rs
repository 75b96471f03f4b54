//! Ingestion: adapters feed pages to a single writer that normalizes and
//! upserts them.

pub mod ingest;
pub mod normalize;
pub mod run;

pub use ingest::{IngestOptions, IngestPipeline, IngestRun};
pub use run::{AdapterStatus, AdapterSummary, Counts, RunContext, RunStatus, RunSummary};
