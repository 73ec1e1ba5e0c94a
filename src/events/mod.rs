//! Run observability events
//!
//! Every externally visible step a run takes is published as a [`RunEvent`]:
//! round boundaries, reviewer returns and failures, synthesis results, fix
//! applications, registry movement, and the final escalation hand-off.
//!
//! The [`EventBus`] broadcasts events to any number of subscribers over a
//! Tokio broadcast channel and optionally persists each one to the run store
//! as JSON. Persisted events are replayable in chronological order through
//! `RunStore::list_run_events`, which is how a post-mortem reconstructs what
//! a finished (or interrupted) run did.
//!
//! Subscribers that only care about a slice of the stream attach an
//! [`EventFilter`] via [`EventBusExt::subscribe_filtered`].

pub mod bus;
pub mod types;

pub use bus::{
    EventBus, EventBusError, EventBusExt, EventBusResult, EventFilter, FilteredReceiver,
    SharedEventBus,
};
pub use types::{EventId, RunEvent};
