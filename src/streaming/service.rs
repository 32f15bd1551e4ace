//! Streaming service loop
//!
//! Runs a [`ChunkManager`] on its own tokio task. Callers talk to it through
//! a cloneable [`ServiceHandle`]; every command is applied on the loop, one
//! at a time, so bookkeeping never needs a lock. The same loop drains the
//! queues on a fixed tick and runs the idle sweep on a slower period.

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};

use crate::core::error::{Error, Result};
use crate::core::logging::LOG_TARGET;
use crate::streaming::coord::ChunkKey;
use crate::streaming::events::{ChunkEvent, EventBus};
use crate::streaming::manager::{ChunkManager, StreamingStats};
use crate::streaming::pins::TicketId;
use crate::streaming::store::RegionStore;
use crate::streaming::visibility::{ViewerId, VisibilityDiff};

type Edit<C> = Box<dyn FnOnce(&mut C) + Send>;

enum Command<C> {
    UpdateViewer {
        viewer: ViewerId,
        center: ChunkKey,
        radius: u32,
        reply: oneshot::Sender<VisibilityDiff>,
    },
    RemoveViewer {
        viewer: ViewerId,
    },
    SetSticky {
        key: ChunkKey,
        on: bool,
    },
    AddTicket {
        key: ChunkKey,
        ticket: TicketId,
    },
    RemoveTicket {
        key: ChunkKey,
        ticket: TicketId,
    },
    Get {
        key: ChunkKey,
        reply: oneshot::Sender<Option<C>>,
    },
    Modify {
        key: ChunkKey,
        edit: Edit<C>,
        reply: oneshot::Sender<bool>,
    },
    Stats {
        reply: oneshot::Sender<StreamingStats>,
    },
    Shutdown {
        reply: oneshot::Sender<StreamingStats>,
    },
}

/// Cloneable handle to a running streaming service.
pub struct ServiceHandle<C> {
    tx: mpsc::UnboundedSender<Command<C>>,
    events: EventBus<C>,
}

impl<C> Clone for ServiceHandle<C> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            events: self.events.clone(),
        }
    }
}

/// Start the service loop on the current tokio runtime.
pub fn spawn<S: RegionStore>(manager: ChunkManager<S>) -> ServiceHandle<S::Content> {
    let (tx, rx) = mpsc::unbounded_channel();
    let events = manager.event_bus();
    tokio::spawn(run(manager, rx));
    ServiceHandle { tx, events }
}

async fn run<S: RegionStore>(
    mut manager: ChunkManager<S>,
    mut rx: mpsc::UnboundedReceiver<Command<S::Content>>,
) {
    let mut tick = interval(manager.config().tick_interval());
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sweep = interval(manager.config().sweep_interval());
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    log::info!(target: LOG_TARGET, "Starting chunk streaming service");

    let shutdown_reply = loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(command) => {
                    if let Some(reply) = apply(&mut manager, command) {
                        break Some(reply);
                    }
                }
                // Every handle dropped
                None => break None,
            },
            _ = tick.tick() => {
                manager.tick().await;
            }
            _ = sweep.tick() => {
                manager.sweep();
            }
        }
    };

    let flushed = manager.flush_dirty().await;
    log::info!(
        target: LOG_TARGET,
        "Ending chunk streaming service ({} dirty chunks flushed, {} still resident, {} viewers)",
        flushed,
        manager.resident_count(),
        manager.visibility().viewer_count()
    );

    if let Some(reply) = shutdown_reply {
        let _ = reply.send(manager.stats().clone());
    }
}

/// Apply one command. Returns the reply channel if the command was a shutdown.
fn apply<S: RegionStore>(
    manager: &mut ChunkManager<S>,
    command: Command<S::Content>,
) -> Option<oneshot::Sender<StreamingStats>> {
    // A dropped reply receiver just means the caller stopped waiting
    match command {
        Command::UpdateViewer { viewer, center, radius, reply } => {
            let _ = reply.send(manager.update_viewer(viewer, center, radius));
        }
        Command::RemoveViewer { viewer } => {
            manager.remove_viewer(viewer);
        }
        Command::SetSticky { key, on } => manager.set_sticky(key, on),
        Command::AddTicket { key, ticket } => manager.add_ticket(key, ticket),
        Command::RemoveTicket { key, ticket } => manager.remove_ticket(key, ticket),
        Command::Get { key, reply } => {
            let _ = reply.send(manager.get(key).cloned());
        }
        Command::Modify { key, edit, reply } => {
            let _ = reply.send(manager.modify(key, edit).is_some());
        }
        Command::Stats { reply } => {
            let _ = reply.send(manager.stats().clone());
        }
        Command::Shutdown { reply } => return Some(reply),
    }
    None
}

impl<C: Clone + Send + 'static> ServiceHandle<C> {
    fn send(&self, command: Command<C>) -> Result<()> {
        self.tx.send(command).map_err(|_| Error::ServiceClosed)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command<C>) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply))?;
        rx.await.map_err(|_| Error::ServiceClosed)
    }

    /// Move a viewer; resolves once the diff has been applied.
    pub async fn update_viewer(
        &self,
        viewer: ViewerId,
        center: ChunkKey,
        radius: u32,
    ) -> Result<VisibilityDiff> {
        self.request(|reply| Command::UpdateViewer { viewer, center, radius, reply }).await
    }

    pub fn remove_viewer(&self, viewer: ViewerId) -> Result<()> {
        self.send(Command::RemoveViewer { viewer })
    }

    pub fn set_sticky(&self, key: ChunkKey, on: bool) -> Result<()> {
        self.send(Command::SetSticky { key, on })
    }

    pub fn add_ticket(&self, key: ChunkKey, ticket: TicketId) -> Result<()> {
        self.send(Command::AddTicket { key, ticket })
    }

    pub fn remove_ticket(&self, key: ChunkKey, ticket: TicketId) -> Result<()> {
        self.send(Command::RemoveTicket { key, ticket })
    }

    /// Copy of a resident chunk's content, if resident.
    pub async fn get(&self, key: ChunkKey) -> Result<Option<C>> {
        self.request(|reply| Command::Get { key, reply }).await
    }

    /// Edit a resident chunk in place and mark it dirty.
    ///
    /// Resolves to false if the chunk was not resident.
    pub async fn modify(
        &self,
        key: ChunkKey,
        edit: impl FnOnce(&mut C) + Send + 'static,
    ) -> Result<bool> {
        self.request(|reply| Command::Modify { key, edit: Box::new(edit), reply }).await
    }

    pub async fn stats(&self) -> Result<StreamingStats> {
        self.request(|reply| Command::Stats { reply }).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChunkEvent<C>> {
        self.events.subscribe()
    }

    /// Stop the loop after flushing dirty chunks. Returns final stats.
    pub async fn shutdown(&self) -> Result<StreamingStats> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}
