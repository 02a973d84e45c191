use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError, SendError, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use graffiti_contracts::chat::InboundEvent;
use graffiti_contracts::session::UserId;
use tracing::{debug, warn};

pub type EventHandler = Arc<dyn Fn(InboundEvent) + Send + Sync>;

enum WorkerCommand {
    Event(InboundEvent),
    Stop,
}

struct WorkerSlot {
    generation: u64,
    sender: mpsc::Sender<WorkerCommand>,
    handle: thread::JoinHandle<()>,
}

#[derive(Default)]
struct Slots {
    next_generation: u64,
    workers: HashMap<UserId, WorkerSlot>,
}

type SharedSlots = Arc<Mutex<Slots>>;

/// One worker thread per active user.
///
/// Events of a user are handled in arrival order, one at a time. A worker exits
/// after `idle` without events and is respawned on the next one.
pub struct UserWorkers {
    handler: EventHandler,
    idle: Duration,
    slots: SharedSlots,
}

impl UserWorkers {
    pub fn new(handler: EventHandler, idle: Duration) -> Self {
        Self {
            handler,
            idle,
            slots: Arc::new(Mutex::new(Slots::default())),
        }
    }

    pub fn dispatch(&self, event: InboundEvent) -> Result<()> {
        let user_id = event.user_id;
        let mut slots = lock(&self.slots);
        let mut command = WorkerCommand::Event(event);
        if let Some(slot) = slots.workers.get(&user_id) {
            match slot.sender.send(command) {
                Ok(()) => return Ok(()),
                Err(SendError(returned)) => {
                    warn!(user_id, "user worker died; respawning");
                    slots.workers.remove(&user_id);
                    command = returned;
                }
            }
        }

        let generation = slots.next_generation;
        slots.next_generation += 1;
        let (tx, rx) = mpsc::channel();
        let worker = Worker {
            user_id,
            generation,
            idle: self.idle,
            handler: Arc::clone(&self.handler),
            slots: Arc::clone(&self.slots),
        };
        let handle = thread::Builder::new()
            .name(format!("graffiti-user-{user_id}"))
            .spawn(move || worker.run(rx))
            .context("user worker spawn failed")?;
        tx.send(command)
            .map_err(|_| anyhow::anyhow!("user worker exited before its first event"))?;
        slots.workers.insert(
            user_id,
            WorkerSlot {
                generation,
                sender: tx,
                handle,
            },
        );
        debug!(user_id, active = slots.workers.len(), "user worker started");
        Ok(())
    }

    pub fn active(&self) -> usize {
        lock(&self.slots).workers.len()
    }

    /// Stops every worker after its queued events and waits for it.
    pub fn shutdown(&self) {
        let workers: Vec<WorkerSlot> = lock(&self.slots)
            .workers
            .drain()
            .map(|(_, slot)| slot)
            .collect();
        for slot in workers {
            let _ = slot.sender.send(WorkerCommand::Stop);
            if slot.handle.join().is_err() {
                warn!("user worker panicked during shutdown");
            }
        }
    }
}

struct Worker {
    user_id: UserId,
    generation: u64,
    idle: Duration,
    handler: EventHandler,
    slots: SharedSlots,
}

impl Worker {
    fn run(self, rx: mpsc::Receiver<WorkerCommand>) {
        loop {
            let event = match rx.recv_timeout(self.idle) {
                Ok(WorkerCommand::Event(event)) => event,
                Ok(WorkerCommand::Stop) | Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => {
                    // Senders hold the slot lock, so nothing can arrive once we
                    // deregister under it.
                    let mut slots = lock(&self.slots);
                    match rx.try_recv() {
                        Ok(WorkerCommand::Event(event)) => {
                            drop(slots);
                            event
                        }
                        Ok(WorkerCommand::Stop) => return,
                        Err(TryRecvError::Empty | TryRecvError::Disconnected) => {
                            let own = slots
                                .workers
                                .get(&self.user_id)
                                .map(|slot| slot.generation == self.generation)
                                .unwrap_or(false);
                            if own {
                                slots.workers.remove(&self.user_id);
                            }
                            debug!(user_id = self.user_id, "user worker idle; exiting");
                            return;
                        }
                    }
                }
            };
            (self.handler)(event);
        }
    }
}

fn lock(slots: &SharedSlots) -> MutexGuard<'_, Slots> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}
