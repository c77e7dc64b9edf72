//! Per-query state machine (spec.md §4.8). Grounded in the same
//! `state_machines::state_machine!` idiom as
//! `ingestion-pipeline/src/state.rs`'s `DocumentIngestionMachine`, retargeted
//! onto the query lifecycle: a query travels
//! `Planned -> Dispatched -> Fusing -> Answered`, or `Partial` when one or
//! more sub-operations timed out, or `Failed` when the overall deadline
//! expired before any results were available.

use state_machines::state_machine;

state_machine! {
    name: QueryMachine,
    state: QueryState,
    initial: Planned,
    states: [Planned, Dispatched, Fusing, Answered, Partial, Failed],
    events {
        dispatch { transition: { from: Planned, to: Dispatched } }
        fuse { transition: { from: Dispatched, to: Fusing } }
        answer { transition: { from: Fusing, to: Answered } }
        degrade { transition: { from: Fusing, to: Partial } }
        abort {
            transition: { from: Planned, to: Failed }
            transition: { from: Dispatched, to: Failed }
            transition: { from: Fusing, to: Failed }
        }
    }
}

pub fn planned() -> QueryMachine<(), Planned> {
    QueryMachine::new(())
}
