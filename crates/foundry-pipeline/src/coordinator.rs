//! Per-batch coordinator actor.
//!
//! One tokio task owns one batch's state. Every mutation funnels through
//! the actor's mailbox or its timer-driven ticks, so two ticks for the same
//! batch can never run concurrently. Phase changes are published on a watch
//! channel so callers can await progress without polling. The actor retires
//! when the batch reaches DONE; in ERROR it stays resident with the timer
//! disarmed, serving status queries and resets.

use foundry_core::batch::{BatchState, BatchStatus, Phase};
use foundry_core::store::StateStore;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::phases::PhaseContext;
use crate::tick::run_tick;

const COMMAND_BUFFER: usize = 32;

/// Commands accepted by a batch actor.
#[derive(Debug)]
pub enum BatchCommand {
    /// Run one tick now, regardless of the timer.
    Tick,
    Status(oneshot::Sender<BatchStatus>),
    Reset(oneshot::Sender<BatchStatus>),
    Shutdown,
}

/// Cloneable mailbox for one batch actor.
#[derive(Clone, Debug)]
pub struct BatchHandle {
    batch_id: String,
    commands: mpsc::Sender<BatchCommand>,
    phase: watch::Receiver<Phase>,
}

impl BatchHandle {
    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    /// Live status, or `None` once the actor has retired.
    pub async fn status(&self) -> Option<BatchStatus> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(BatchCommand::Status(reply_tx))
            .await
            .ok()?;
        reply_rx.await.ok()
    }

    /// Clear the current phase's bookkeeping and re-arm the timer. `None`
    /// once the actor has retired.
    pub async fn reset(&self) -> Option<BatchStatus> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(BatchCommand::Reset(reply_tx))
            .await
            .ok()?;
        reply_rx.await.ok()
    }

    /// Ask for an immediate tick. Returns `false` once the actor has
    /// retired.
    pub async fn tick(&self) -> bool {
        self.commands.send(BatchCommand::Tick).await.is_ok()
    }

    pub fn shutdown(&self) {
        let _ = self.commands.try_send(BatchCommand::Shutdown);
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.phase.clone()
    }

    /// Wait until the batch reaches `phase`. Returns `false` when the actor
    /// retires on a different phase first.
    pub async fn wait_for_phase(&self, phase: Phase) -> bool {
        let mut receiver = self.phase.clone();
        let reached = receiver.wait_for(|current| *current == phase).await;
        reached.is_ok()
    }
}

pub(crate) struct BatchActor {
    state: BatchState,
    ctx: PhaseContext,
    commands: mpsc::Receiver<BatchCommand>,
    phase_tx: watch::Sender<Phase>,
}

impl BatchActor {
    /// Spawn the actor onto the runtime. The first tick fires immediately.
    pub(crate) fn spawn(state: BatchState, ctx: PhaseContext) -> (BatchHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (phase_tx, phase_rx) = watch::channel(state.phase);
        let handle = BatchHandle {
            batch_id: state.batch_id.clone(),
            commands: command_tx,
            phase: phase_rx,
        };
        let actor = BatchActor {
            state,
            ctx,
            commands: command_rx,
            phase_tx,
        };
        let task = tokio::spawn(actor.run());
        (handle, task)
    }

    async fn run(mut self) {
        info!(batch = %self.state.batch_id, phase = %self.state.phase, "batch actor started");
        let mut next_tick = Instant::now();
        let mut armed = !self.state.phase.is_terminal();

        loop {
            tokio::select! {
                _ = sleep_until(next_tick), if armed => {
                    self.tick(&mut armed, &mut next_tick).await;
                }
                command = self.commands.recv() => match command {
                    Some(BatchCommand::Tick) => self.tick(&mut armed, &mut next_tick).await,
                    Some(BatchCommand::Status(reply)) => {
                        let _ = reply.send(self.state.status());
                    }
                    Some(BatchCommand::Reset(reply)) => {
                        self.reset(&mut armed, &mut next_tick).await;
                        let _ = reply.send(self.state.status());
                    }
                    Some(BatchCommand::Shutdown) => {
                        debug!(batch = %self.state.batch_id, "shutdown requested");
                        break;
                    }
                    None => break,
                },
            }

            if self.state.phase == Phase::Done {
                // Retired; durable state serves any later reads.
                break;
            }
        }
        info!(batch = %self.state.batch_id, phase = %self.state.phase, "batch actor stopped");
    }

    async fn tick(&mut self, armed: &mut bool, next_tick: &mut Instant) {
        let outcome = run_tick(&mut self.state, &self.ctx).await;
        self.publish_phase();
        *armed = outcome.more_work;
        if outcome.more_work {
            *next_tick = Instant::now() + self.ctx.config.tick_interval();
        }
    }

    async fn reset(&mut self, armed: &mut bool, next_tick: &mut Instant) {
        self.state.reset_in_flight();
        info!(batch = %self.state.batch_id, phase = %self.state.phase, "batch reset");
        if let Err(err) = self.ctx.states.save(&self.state).await {
            warn!(batch = %self.state.batch_id, error = %err, "failed to persist batch state");
        }
        self.publish_phase();
        *armed = true;
        *next_tick = Instant::now();
    }

    fn publish_phase(&self) {
        let phase = self.state.phase;
        self.phase_tx.send_if_modified(|current| {
            if *current == phase {
                false
            } else {
                *current = phase;
                true
            }
        });
    }
}
