//! Ingestion service facade.
//!
//! Owns one coordinator actor per live batch, keyed by batch id. Durable
//! state lives in the injected `StateStore`; the registry only holds
//! mailboxes and join handles, so a restarted process reconstructs
//! everything from storage through `recover`.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use foundry_core::analyzer::AnalyzerSuite;
use foundry_core::batch::{BatchState, BatchStatus, Phase, QueueMessage};
use foundry_core::config::{ConfigError, PipelineConfig};
use foundry_core::address::ChunkAddress;
use foundry_core::store::{BlobStore, EntityStore, StateStore, StoreError};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::coordinator::{BatchActor, BatchHandle};
use crate::phases::PhaseContext;
use crate::retrieval::{self, RetrievalError};
use crate::tree::{self, TreeError};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid queue message: {0}")]
    InvalidMessage(#[from] TreeError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("batch '{0}' is already running")]
    DuplicateBatch(String),

    #[error("batch '{0}' not found")]
    BatchNotFound(String),

    #[error("batch '{0}' is already done")]
    AlreadyDone(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

struct RunningBatch {
    handle: BatchHandle,
    task: JoinHandle<()>,
}

pub struct IngestionService {
    entities: Arc<dyn EntityStore>,
    blobs: Arc<dyn BlobStore>,
    states: Arc<dyn StateStore>,
    analyzers: AnalyzerSuite,
    config: PipelineConfig,
    batches: DashMap<String, RunningBatch>,
}

impl IngestionService {
    pub fn new(
        entities: Arc<dyn EntityStore>,
        blobs: Arc<dyn BlobStore>,
        states: Arc<dyn StateStore>,
        analyzers: AnalyzerSuite,
        config: PipelineConfig,
    ) -> Result<Self, ServiceError> {
        config.validate()?;
        Ok(Self {
            entities,
            blobs,
            states,
            analyzers,
            config,
            batches: DashMap::new(),
        })
    }

    /// Validate a queue message, persist the initial batch state, and spawn
    /// its coordinator actor. Refuses a batch id that is still running.
    pub async fn submit(&self, message: QueueMessage) -> Result<BatchHandle, ServiceError> {
        let tree = tree::build_nodes(&message)?;
        if let Some(running) = self.batches.get(&message.batch_id) {
            if !running.task.is_finished() {
                return Err(ServiceError::DuplicateBatch(message.batch_id));
            }
        }

        let state = BatchState::new(
            &message.batch_id,
            tree.root_path,
            &message.uploader,
            tree.nodes,
        );
        self.states.save(&state).await?;
        info!(
            batch = %state.batch_id,
            nodes = state.nodes.len(),
            uploader = %state.uploader,
            "batch submitted"
        );
        self.spawn_and_track(state)
    }

    /// Status from the live actor when there is one, otherwise from durable
    /// state.
    pub async fn status(&self, batch_id: &str) -> Result<BatchStatus, ServiceError> {
        if let Some(handle) = self.live_handle(batch_id) {
            if let Some(status) = handle.status().await {
                return Ok(status);
            }
        }
        match self.states.load(batch_id).await? {
            Some(state) => Ok(state.status()),
            None => Err(ServiceError::BatchNotFound(batch_id.to_string())),
        }
    }

    /// Clear the current phase's bookkeeping and run it again. A live batch
    /// resets in place; a retired one is reloaded and respawned. Resetting a
    /// finished batch is refused.
    pub async fn reset(&self, batch_id: &str) -> Result<BatchStatus, ServiceError> {
        if let Some(handle) = self.live_handle(batch_id) {
            if let Some(status) = handle.reset().await {
                return Ok(status);
            }
        }
        let Some(mut state) = self.states.load(batch_id).await? else {
            return Err(ServiceError::BatchNotFound(batch_id.to_string()));
        };
        if state.phase == Phase::Done {
            return Err(ServiceError::AlreadyDone(batch_id.to_string()));
        }
        state.reset_in_flight();
        self.states.save(&state).await?;
        info!(batch = %batch_id, phase = %state.phase, "reset retired batch, respawning");
        let status = state.status();
        self.spawn_and_track(state)?;
        Ok(status)
    }

    /// Resolve a `collection:filename#chunk_id` address to stored bytes.
    pub async fn fetch_chunk(&self, address: &str) -> Result<Vec<u8>, RetrievalError> {
        let address = ChunkAddress::parse(address)?;
        retrieval::fetch_chunk(&self.entities, &self.blobs, &address).await
    }

    /// Respawn every unfinished batch found in durable state. Batches whose
    /// state cannot be read are parked in ERROR so status reflects them.
    pub async fn recover(&self) -> Result<Vec<String>, ServiceError> {
        let mut respawned = Vec::new();
        for batch_id in self.states.list().await? {
            if let Some(running) = self.batches.get(&batch_id) {
                if !running.task.is_finished() {
                    continue;
                }
            }
            let state = match self.states.load(&batch_id).await {
                Ok(Some(state)) => state,
                Ok(None) => continue,
                Err(err) => {
                    error!(batch = %batch_id, error = %err, "batch state unreadable");
                    let mut state = BatchState::new(&batch_id, "", "", BTreeMap::new());
                    state.enter_error(format!("persisted state unreadable: {err}"));
                    state
                }
            };
            if state.phase == Phase::Done {
                continue;
            }
            info!(batch = %batch_id, phase = %state.phase, "recovering batch");
            if self.spawn_and_track(state).is_ok() {
                respawned.push(batch_id);
            }
        }
        Ok(respawned)
    }

    /// Stop every actor and wait for them to finish. Durable state remains
    /// for a later `recover`.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.batches.iter().map(|entry| entry.key().clone()).collect();
        for batch_id in ids {
            if let Some((_, running)) = self.batches.remove(&batch_id) {
                let RunningBatch { handle, task } = running;
                handle.shutdown();
                drop(handle);
                if let Err(err) = task.await {
                    warn!(batch = %batch_id, error = %err, "batch actor did not stop cleanly");
                }
                debug!(batch = %batch_id, "batch actor stopped");
            }
        }
    }

    /// Phase watch for a batch the service still tracks.
    pub fn subscribe_phase(&self, batch_id: &str) -> Option<watch::Receiver<Phase>> {
        self.batches
            .get(batch_id)
            .map(|running| running.handle.subscribe_phase())
    }

    fn live_handle(&self, batch_id: &str) -> Option<BatchHandle> {
        let running = self.batches.get(batch_id)?;
        if running.task.is_finished() {
            return None;
        }
        Some(running.handle.clone())
    }

    /// Claim the registry slot for `state` and spawn its actor. The entry
    /// guard makes the occupancy check and the insert a single step, so two
    /// racing submits for one batch id cannot both end up with an actor.
    fn spawn_and_track(&self, state: BatchState) -> Result<BatchHandle, ServiceError> {
        match self.batches.entry(state.batch_id.clone()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().task.is_finished() {
                    return Err(ServiceError::DuplicateBatch(state.batch_id));
                }
                let (handle, task) = BatchActor::spawn(state, self.context());
                occupied.insert(RunningBatch { handle: handle.clone(), task });
                Ok(handle)
            }
            Entry::Vacant(vacant) => {
                let (handle, task) = BatchActor::spawn(state, self.context());
                vacant.insert(RunningBatch { handle: handle.clone(), task });
                Ok(handle)
            }
        }
    }

    fn context(&self) -> PhaseContext {
        PhaseContext {
            entities: Arc::clone(&self.entities),
            blobs: Arc::clone(&self.blobs),
            states: Arc::clone(&self.states),
            analyzers: self.analyzers.clone(),
            config: self.config.clone(),
        }
    }
}
