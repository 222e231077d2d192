//! Routing change events to the tailers they belong to.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::events::{ChangeEvent, ChangeKind, WatchId, Watches};
use crate::tailer::{OutputChunk, Outcome, Tailer};

/// Why [`Dispatcher::run`] returned.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Shutdown {
    /// The cancellation token fired.
    Cancelled,
    /// Every tailer closed; the token has been cancelled for everyone else.
    Drained,
}

/// Owns every [`Tailer`], keyed by its current watch id, and is the only
/// consumer of the event queue.
///
/// The registry is only ever touched from within [`Dispatcher::run`], so it
/// needs no locking.
#[derive(Debug)]
pub struct Dispatcher {
    tailers: HashMap<WatchId, Tailer>,
    watches: Watches,
    chunks: mpsc::UnboundedSender<OutputChunk>,
    /// Handed to reappearance watchers so they can report back.
    events: mpsc::UnboundedSender<ChangeEvent>,
    reappear_interval: Duration,
}

impl Dispatcher {
    pub fn new(
        watches: Watches,
        events: mpsc::UnboundedSender<ChangeEvent>,
        chunks: mpsc::UnboundedSender<OutputChunk>,
        reappear_interval: Duration,
    ) -> Self {
        Dispatcher {
            tailers: HashMap::new(),
            watches,
            chunks,
            events,
            reappear_interval,
        }
    }

    /// Makes `tailer` reachable for events carrying its watch id.
    pub fn register(&mut self, tailer: Tailer) {
        tracing::debug!(watch = %tailer.watch(), path = %tailer.path().display(), "dispatch: registering tailer");

        let watch = tailer.watch();
        if let Some(previous) = self.tailers.insert(watch, tailer) {
            // Ids are never reused, so this is a bug.
            tracing::error!(watch = %watch, "dispatch: replaced tailer for {}", previous.path().display());
            previous.close(&self.watches);
        }
    }

    pub fn len(&self) -> usize {
        self.tailers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tailers.is_empty()
    }

    pub fn contains(&self, watch: WatchId) -> bool {
        self.tailers.contains_key(&watch)
    }

    /// Processes events until cancelled or until no tailers remain, in which
    /// case `cancel` is triggered to shut everything else down.
    pub async fn run(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<ChangeEvent>,
        cancel: &CancellationToken,
    ) -> Shutdown {
        tracing::debug!(tailers = self.tailers.len(), "dispatch: starting");

        loop {
            if self.tailers.is_empty() {
                tracing::debug!("dispatch: no tailers left to dispatch to, shutting down");
                cancel.cancel();
                return Shutdown::Drained;
            }

            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("dispatch: received notice to shutdown");
                    return Shutdown::Cancelled;
                }
                event = events.recv() => event,
            };

            match event {
                Some(event) => self.dispatch(event, cancel).await,
                // We hold a sender ourselves, so the queue never closes.
                None => return Shutdown::Cancelled,
            }
        }
    }

    /// Routes a single event to its tailer and applies the outcome to the
    /// registry.
    pub async fn dispatch(&mut self, event: ChangeEvent, cancel: &CancellationToken) {
        let ChangeEvent { watch, kind } = event;

        let tailer = match self.tailers.get_mut(&watch) {
            Some(tailer) => tailer,
            None => {
                // Common right after a watch id migration.
                tracing::debug!(watch = %watch, ?kind, "dispatch: no tailer for watch at the moment");
                return;
            }
        };

        let outcome = match tailer.process_event(kind, &self.watches).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(watch = %watch, path = %tailer.path().display(), error = %e, "dispatch: tailer couldn't process event, closing it");
                self.remove(watch);
                return;
            }
        };

        match outcome {
            Outcome::Idle => {}
            Outcome::Emit(chunk) => self.emit(chunk),
            Outcome::AwaitReappear => {
                let task = tokio::spawn(await_reappear(
                    tailer.path().to_path_buf(),
                    watch,
                    self.reappear_interval,
                    self.events.clone(),
                    cancel.clone(),
                ));
                tailer.set_reappear_task(task);
            }
            Outcome::Reopened { previous, chunk } => {
                tracing::debug!(previous = %previous, "dispatch: tailer refreshed file handle");
                if let Some(tailer) = self.tailers.remove(&previous) {
                    self.tailers.insert(tailer.watch(), tailer);
                }
                self.emit(chunk);
            }
            Outcome::Closed => {
                tracing::debug!(watch = %watch, "dispatch: watched file is gone");
                self.remove(watch);
            }
        }
    }

    fn emit(&self, chunk: OutputChunk) {
        if chunk.is_empty() {
            return;
        }
        if self.chunks.send(chunk).is_err() {
            tracing::debug!("dispatch: output queue closed, dropping chunk");
        }
    }

    fn remove(&mut self, watch: WatchId) {
        if let Some(tailer) = self.tailers.remove(&watch) {
            tailer.close(&self.watches);
        }
    }

    /// Closes every remaining tailer.
    pub fn shutdown(&mut self) {
        tracing::debug!(tailers = self.tailers.len(), "dispatch: shutting down");

        for (_, tailer) in self.tailers.drain() {
            tailer.close(&self.watches);
        }
    }
}

/// Polls `path` until it exists again, then reports [`ChangeKind::Reappeared`]
/// for `watch`. There is no deadline; only `cancel` or aborting the task stops
/// it.
async fn await_reappear(
    path: PathBuf,
    watch: WatchId,
    every: Duration,
    events: mpsc::UnboundedSender<ChangeEvent>,
    cancel: CancellationToken,
) {
    let mut interval = time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }

        if tokio::fs::metadata(&path).await.is_ok() {
            tracing::debug!(watch = %watch, path = %path.display(), "dispatch: file reappeared");
            let _ = events.send(ChangeEvent::new(watch, ChangeKind::Reappeared));
            return;
        }

        tracing::trace!(watch = %watch, "dispatch: file not yet reappeared");
    }
}
