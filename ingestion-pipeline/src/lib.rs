//! Ingestion Orchestrator (C7, spec.md §4.7): the public entry point that
//! wires the crawler (C6), chunker (C5), embedding provider (C1), and the
//! vector/graph stores (C3/C4) into one per-document pipeline. Grounded in
//! the teacher's `ingestion-pipeline` crate root (`IngestionPipeline` as the
//! single public façade over `pipeline::{config, state, stages}`).

mod config;
mod orchestrator;
mod progress;
mod state;

pub use config::{IngestionConfig, IngestionTuning};
pub use orchestrator::{IngestionOrchestrator, RunSummary};
pub use progress::{ProgressEvent, ProgressReporter};
pub use state::{DocumentIngestionMachine, DocumentIngestionState};
