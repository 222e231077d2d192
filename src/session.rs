//! Wiring the notifier, tailers, dispatcher and printer together.

use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::TailConfig;
use crate::dispatch::{Dispatcher, Shutdown};
use crate::error::Result;
use crate::events::{ChangeEvent, Notifier, Watches};
use crate::printer::Printer;
use crate::tailer::{OutputChunk, Tailer};

/// A set of files being followed.
///
/// [`Session::start`] does all the sequential setup (opening files, seeking to
/// their trailing lines, registering watches and queueing the initial chunks in
/// argument order); [`Session::run`] then dispatches change events until the
/// session is cancelled or every file is gone.
#[derive(Debug)]
pub struct Session {
    dispatcher: Dispatcher,
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    watches: Watches,
    notifier: JoinHandle<()>,
    cancel: CancellationToken,
}

impl Session {
    /// Starts following `paths`, sending output to `chunks`. A path listed
    /// more than once is followed once.
    ///
    /// Fails if notifications cannot be set up, or if any file cannot be
    /// opened or watched.
    pub async fn start(
        paths: &[PathBuf],
        config: &TailConfig,
        chunks: mpsc::UnboundedSender<OutputChunk>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        // Events are collected on the queue while setup is still going on.
        let notifier = Notifier::new(events_tx.clone())?;
        let watches = notifier.watches();

        let mut dispatcher = Dispatcher::new(
            watches.clone(),
            events_tx,
            chunks.clone(),
            config.reappear_interval,
        );

        for (i, path) in paths.iter().enumerate() {
            // A path given twice would get two tailers but only one live
            // watch, leaving the first tailer unreachable.
            if watches.lookup(path).is_some() {
                tracing::debug!(path = %path.display(), "session: skipping duplicate file");
                continue;
            }

            tracing::debug!(path = %path.display(), "session: registering tailer");

            let mut tailer = match Tailer::open(path, config.color_for(i), &watches).await {
                Ok(tailer) => tailer,
                Err(e) => {
                    dispatcher.shutdown();
                    return Err(e);
                }
            };

            let chunk = match tailer.rewind(config.lines).await {
                Ok(_) => tailer.read_delta().await,
                Err(e) => Err(e),
            };

            dispatcher.register(tailer);

            match chunk {
                Ok(chunk) => {
                    let _ = chunks.send(chunk);
                }
                Err(e) => {
                    dispatcher.shutdown();
                    return Err(e.into());
                }
            }
        }

        let notifier = tokio::spawn(notifier.run(cancel.clone()));

        Ok(Session {
            dispatcher,
            events: events_rx,
            watches,
            notifier,
            cancel,
        })
    }

    /// Handle to the watches registered by this session.
    pub fn watches(&self) -> &Watches {
        &self.watches
    }

    /// Number of files still followed.
    pub fn len(&self) -> usize {
        self.dispatcher.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dispatcher.is_empty()
    }

    /// Dispatches events until cancellation or until no file is left, then
    /// releases everything still open.
    pub async fn run(mut self) -> Shutdown {
        let shutdown = self.dispatcher.run(&mut self.events, &self.cancel).await;

        self.dispatcher.shutdown();
        self.cancel.cancel();
        let _ = self.notifier.await;

        tracing::debug!(?shutdown, "session: done");

        shutdown
    }
}

/// Follows `paths`, writing everything to `out`, until `cancel` fires or all
/// files are gone.
pub async fn follow<W>(
    paths: &[PathBuf],
    config: &TailConfig,
    out: W,
    cancel: CancellationToken,
) -> Result<Shutdown>
where
    W: Write + Send + 'static,
{
    let (chunks_tx, mut chunks_rx) = mpsc::unbounded_channel();

    // Start the printer early so the initial chunks show up right away.
    let distinct: HashSet<&PathBuf> = paths.iter().collect();
    let mut printer = Printer::new(out, distinct.len() > 1);
    let printer_cancel = cancel.clone();
    let printer = tokio::spawn(async move {
        let res = printer.run(&mut chunks_rx, &printer_cancel).await;
        if let Err(e) = &res {
            tracing::error!(error = %e, "printer: failed to write output");
        }
        res
    });

    let session = match Session::start(paths, config, chunks_tx, cancel.clone()).await {
        Ok(session) => session,
        Err(e) => {
            cancel.cancel();
            let _ = printer.await;
            return Err(e);
        }
    };

    let shutdown = session.run().await;

    match printer.await {
        Ok(res) => res?,
        Err(e) => tracing::error!(error = %e, "printer task failed"),
    }

    Ok(shutdown)
}
