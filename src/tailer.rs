//! Everything related to following a single file across its lifecycle.

use std::borrow::Cow;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use colored::Color;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::events::{ChangeKind, WatchId, Watches};

/// Bytes read from a file, ready to be printed.
///
/// The bytes are kept exactly as read; logs are not required to be UTF-8.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutputChunk {
    /// The path from where the bytes were read.
    source: PathBuf,
    /// The raw content, possibly spanning several lines.
    bytes: Vec<u8>,
    color: Color,
}

impl OutputChunk {
    pub fn new(source: impl Into<PathBuf>, bytes: impl Into<Vec<u8>>, color: Color) -> Self {
        OutputChunk {
            source: source.into(),
            bytes: bytes.into(),
            color,
        }
    }

    /// Returns a reference to the file from where the bytes were read.
    pub fn source(&self) -> &Path {
        self.source.as_path()
    }

    /// The content exactly as read.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Lossy UTF-8 view of the content, for display and logging only.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    pub fn color(&self) -> Color {
        self.color
    }

    /// Returns `true` if nothing was read.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Lifecycle of a followed file.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TailState {
    #[default]
    Active,
    /// The file was moved away; waiting for its path to exist again.
    AwaitingReappear,
    /// Terminal. No further events are processed.
    Closed,
}

/// What a [`Tailer`] has to do in response to an event.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    /// Compare the current size with the last one and read what changed.
    Resize,
    /// Start waiting for the path to reappear.
    AwaitReappear,
    /// Reopen the path and read it from the start.
    Reopen,
    /// Check whether the file still exists.
    Inspect,
    Close,
    Ignore,
}

impl TailState {
    /// Transition function of the tailer state machine.
    pub fn on_event(self, kind: ChangeKind) -> Action {
        use ChangeKind::*;

        match (self, kind) {
            (TailState::Active, Modified) => Action::Resize,
            (TailState::Active, Renamed) => Action::AwaitReappear,
            (TailState::Active, AttributeChanged) => Action::Inspect,
            (TailState::Active, Deleted) | (TailState::Active, Unwatched) => Action::Close,
            (TailState::Active, Reappeared) => Action::Ignore,
            (TailState::AwaitingReappear, Reappeared) => Action::Reopen,
            (TailState::AwaitingReappear, _) => Action::Ignore,
            (TailState::Closed, _) => Action::Ignore,
        }
    }
}

/// Result of [`Tailer::process_event`], telling the dispatcher what to do
/// next.
#[derive(Debug, Eq, PartialEq)]
pub enum Outcome {
    /// Nothing to show.
    Idle,
    Emit(OutputChunk),
    /// The file was moved away and its path needs watching for reappearance.
    AwaitReappear,
    /// The file was reopened under a new watch, replacing `previous`.
    Reopened {
        previous: WatchId,
        chunk: OutputChunk,
    },
    Closed,
}

/// Follows one file: owns its handle, its watch and its last observed size.
#[derive(Debug)]
pub struct Tailer {
    path: PathBuf,
    file: File,
    last_size: u64,
    watch: WatchId,
    color: Color,
    state: TailState,
    reappear_task: Option<JoinHandle<()>>,
}

async fn open(path: &Path) -> Result<File> {
    File::open(path).await.map_err(|source| Error::Open {
        path: path.to_path_buf(),
        source,
    })
}

impl Tailer {
    /// Opens `path` and registers a watch for it. The cursor starts at the
    /// beginning of the file.
    pub async fn open(path: impl Into<PathBuf>, color: Color, watches: &Watches) -> Result<Self> {
        let path = path.into();
        let file = open(&path).await?;
        let watch = watches.add(&path)?;

        Ok(Tailer {
            path,
            file,
            last_size: 0,
            watch,
            color,
            state: TailState::default(),
            reappear_task: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn watch(&self) -> WatchId {
        self.watch
    }

    pub fn state(&self) -> TailState {
        self.state
    }

    pub fn color(&self) -> Color {
        self.color
    }

    /// Size of the file as of the last delta read.
    pub fn last_size(&self) -> u64 {
        self.last_size
    }

    /// Positions the cursor so the next delta read yields the last `lines`
    /// lines of the file.
    pub async fn rewind(&mut self, lines: usize) -> io::Result<u64> {
        crate::seek::seek_trailing_lines(&mut self.file, lines).await
    }

    /// Reads everything from the cursor up to the current end of file and
    /// records that size as the last known one.
    pub async fn read_delta(&mut self) -> io::Result<OutputChunk> {
        let pos = self.file.stream_position().await?;
        let size = self.file.metadata().await?.len();
        self.last_size = size;

        let len = size.saturating_sub(pos);
        let mut buf = Vec::with_capacity(len as usize);
        (&mut self.file).take(len).read_to_end(&mut buf).await?;

        tracing::trace!(
            watch = %self.watch,
            path = %self.path.display(),
            pos,
            size,
            read = buf.len(),
            "read delta"
        );

        Ok(OutputChunk::new(self.path.clone(), buf, self.color))
    }

    /// Applies `kind` to the state machine, performing whatever I/O the
    /// resulting transition requires.
    pub async fn process_event(&mut self, kind: ChangeKind, watches: &Watches) -> Result<Outcome> {
        let action = self.state.on_event(kind);

        tracing::debug!(
            watch = %self.watch,
            state = ?self.state,
            ?kind,
            ?action,
            "tailer: processing event"
        );

        match action {
            Action::Ignore => Ok(Outcome::Idle),
            Action::Resize => self.resize().await,
            Action::AwaitReappear => {
                tracing::debug!(watch = %self.watch, path = %self.path.display(), "tailer: file moved");
                self.state = TailState::AwaitingReappear;
                Ok(Outcome::AwaitReappear)
            }
            Action::Reopen => self.reopen(watches).await,
            Action::Inspect => {
                // Unlinking a file that is still open only drops its link
                // count, which is reported as an attribute change.
                if fs::metadata(&self.path).await.is_ok() {
                    Ok(Outcome::Idle)
                } else {
                    tracing::debug!(watch = %self.watch, "tailer: file deleted");
                    self.state = TailState::Closed;
                    Ok(Outcome::Closed)
                }
            }
            Action::Close => {
                tracing::debug!(watch = %self.watch, ?kind, "tailer: file gone");
                self.state = TailState::Closed;
                Ok(Outcome::Closed)
            }
        }
    }

    async fn resize(&mut self) -> Result<Outcome> {
        let size = self.file.metadata().await?.len();

        if size < self.last_size {
            tracing::debug!(watch = %self.watch, size, last = self.last_size, "tailer: file truncated");
            self.file.seek(SeekFrom::Start(0)).await?;
        } else if size == self.last_size {
            return Ok(Outcome::Idle);
        }

        Ok(Outcome::Emit(self.read_delta().await?))
    }

    async fn reopen(&mut self, watches: &Watches) -> Result<Outcome> {
        let file = match open(&self.path).await {
            Ok(file) => file,
            Err(Error::Open { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                // Gone again before we got to it; keep waiting.
                tracing::debug!(watch = %self.watch, "tailer: file vanished before reopening");
                return Ok(Outcome::AwaitReappear);
            }
            Err(e) => return Err(e),
        };

        self.stop_waiting();
        let previous = self.watch;
        if let Err(e) = watches.remove(previous) {
            tracing::debug!(watch = %previous, error = %e, "tailer: old watch already gone");
        }

        self.file = file;
        self.watch = watches.add(&self.path)?;
        self.last_size = 0;
        self.state = TailState::Active;

        tracing::debug!(previous = %previous, watch = %self.watch, "tailer: reopened file");

        let chunk = self.read_delta().await?;

        Ok(Outcome::Reopened { previous, chunk })
    }

    /// Attaches the task waiting for this file to reappear, so that it is
    /// stopped along with the tailer.
    pub(crate) fn set_reappear_task(&mut self, task: JoinHandle<()>) {
        self.stop_waiting();
        self.reappear_task = Some(task);
    }

    fn stop_waiting(&mut self) {
        if let Some(task) = self.reappear_task.take() {
            task.abort();
        }
    }

    /// Releases the watch and the file handle.
    pub fn close(mut self, watches: &Watches) {
        tracing::debug!(watch = %self.watch, path = %self.path.display(), "tailer: closing");

        self.stop_waiting();
        self.state = TailState::Closed;

        // The OS drops the watch by itself on deletion, so failure is fine.
        if let Err(e) = watches.remove(self.watch) {
            tracing::debug!(watch = %self.watch, error = %e, "tailer: watch already removed");
        }
    }
}
