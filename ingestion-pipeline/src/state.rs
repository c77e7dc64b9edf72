//! Per-document ingestion state machine (spec.md §4.7). Grounded in the
//! teacher's `ingestion-pipeline/src/pipeline/state.rs`
//! (`Ready→ContentPrepared→Retrieved→Enriched→Persisted`), retargeted onto
//! spec.md §4.7's own stage names: a document travels
//! `Ready→Crawled→Chunked→Embedded→Committed`, with `abort` reachable from
//! any non-terminal state.

use state_machines::state_machine;

state_machine! {
    name: DocumentIngestionMachine,
    state: DocumentIngestionState,
    initial: Ready,
    states: [Ready, Crawled, Chunked, Embedded, Committed, Failed],
    events {
        crawl { transition: { from: Ready, to: Crawled } }
        chunk { transition: { from: Crawled, to: Chunked } }
        embed { transition: { from: Chunked, to: Embedded } }
        commit { transition: { from: Embedded, to: Committed } }
        abort {
            transition: { from: Ready, to: Failed }
            transition: { from: Crawled, to: Failed }
            transition: { from: Chunked, to: Failed }
            transition: { from: Embedded, to: Failed }
        }
    }
}

pub fn ready() -> DocumentIngestionMachine<(), Ready> {
    DocumentIngestionMachine::new(())
}
