//! Batch orchestration for the foundry ingestion pipeline.
//!
//! A queue message becomes a tree of directory nodes ([`tree`]), each batch
//! gets a coordinator actor that walks the phase sequence tick by tick
//! ([`coordinator`], [`tick`]), and every phase's work is a pure async
//! function over a state snapshot ([`phases`]). [`service`] ties it together
//! behind one facade that also resolves chunk addresses back to bytes
//! ([`retrieval`]) and respawns unfinished batches from durable state after
//! a restart.
//!
//! All work is replay-tolerant: entity ids are fixed when a node is created,
//! so a phase interrupted mid-write adopts the committed result on the next
//! run instead of duplicating it.

pub mod coordinator;
pub mod phases;
pub mod retrieval;
pub mod service;
pub mod tick;
pub mod tree;

pub use coordinator::{BatchCommand, BatchHandle};
pub use phases::{NodeUpdate, PhaseContext};
pub use retrieval::{fetch_chunk, RetrievalError};
pub use service::{IngestionService, ServiceError};
pub use tick::{run_tick, TickOutcome};
pub use tree::{build_nodes, BatchTree, TreeError};
