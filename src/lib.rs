//! Follow one or more (namely log) files, `tail -f` style, surviving
//! truncation, rotation and deletion.
//!
//! Each file is followed by a [`Tailer`], a small state machine driven by
//! change notifications (through [`notify`](https://crates.io/crates/notify)).
//! A single [`Dispatcher`] routes those notifications to their tailers, and a
//! [`Printer`] is the only writer of the resulting output.
//!
//! ## Example
//!
//! ```no_run
//! use std::path::PathBuf;
//!
//! use tailf::{follow, TailConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tailf::Error> {
//!     let paths = vec![PathBuf::from("/var/log/syslog")];
//!
//!     // Runs until cancelled, or until every file has been deleted.
//!     let shutdown = follow(
//!         &paths,
//!         &TailConfig::default(),
//!         std::io::stdout(),
//!         CancellationToken::new(),
//!     )
//!     .await?;
//!
//!     println!("stopped: {:?}", shutdown);
//!     Ok(())
//! }
//! ```
//!
//! ## Caveats
//!
//! A rotated file is picked up again by polling its original path, so writes
//! made to the new file before it is reopened are only captured as part of the
//! first read of its whole content.

mod config;
mod dispatch;
mod error;
mod events;
mod path;
mod printer;
mod seek;
mod session;
mod tailer;

pub use config::{TailConfig, DEFAULT_LINES, DEFAULT_PALETTE, DEFAULT_REAPPEAR_INTERVAL};
pub use dispatch::{Dispatcher, Shutdown};
pub use error::{Error, Result};
pub use events::{decode, ChangeEvent, ChangeKind, Notifier, WatchId, Watches};
pub use path::{absolutify, resolve};
pub use printer::Printer;
pub use seek::seek_trailing_lines;
pub use session::{follow, Session};
pub use tailer::{Action, OutputChunk, Outcome, TailState, Tailer};

#[cfg(doctest)]
doc_comment::doctest!("../README.md");
