//! Writing chunks to the display.

use std::io::{self, Write};

use colored::Colorize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::tailer::OutputChunk;

/// The single writer of followed output.
///
/// When more than one file is followed, every line is prefixed with the
/// colored basename of the file it came from.
#[derive(Debug)]
pub struct Printer<W> {
    out: W,
    multi_file: bool,
}

impl<W: Write> Printer<W> {
    pub fn new(out: W, multi_file: bool) -> Self {
        Printer { out, multi_file }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Writes a single chunk and flushes.
    pub fn print(&mut self, chunk: &OutputChunk) -> io::Result<()> {
        if !self.multi_file {
            self.out.write_all(chunk.bytes())?;
            return self.out.flush();
        }

        if chunk.is_empty() {
            return Ok(());
        }

        let name = chunk
            .source()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| chunk.source().display().to_string());
        let label = format!("{} =>", name);
        let prefix = label.as_str().color(chunk.color()).bold();

        let bytes = chunk.bytes().strip_suffix(b"\n").unwrap_or(chunk.bytes());
        for line in bytes.split(|b| *b == b'\n') {
            write!(self.out, "{} ", prefix)?;
            self.out.write_all(line)?;
            self.out.write_all(b"\n")?;
        }

        self.out.flush()
    }

    /// Prints chunks as they arrive until `cancel` fires or the queue closes.
    /// Chunks already queued are printed before honoring cancellation.
    pub async fn run(
        &mut self,
        chunks: &mut mpsc::UnboundedReceiver<OutputChunk>,
        cancel: &CancellationToken,
    ) -> io::Result<()> {
        loop {
            let chunk = tokio::select! {
                biased;
                chunk = chunks.recv() => chunk,
                _ = cancel.cancelled() => {
                    tracing::debug!("printer: received notice to shutdown");
                    return Ok(());
                }
            };

            match chunk {
                Some(chunk) => {
                    tracing::trace!(source = %chunk.source().display(), len = chunk.bytes().len(), "printer: printing chunk");
                    self.print(&chunk)?;
                }
                None => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colored::Color;

    fn printed(multi_file: bool, chunks: &[OutputChunk]) -> String {
        let mut printer = Printer::new(Vec::new(), multi_file);
        for chunk in chunks {
            printer.print(chunk).unwrap();
        }
        String::from_utf8(printer.into_inner()).unwrap()
    }

    #[test]
    fn test_single_file_is_raw() {
        let out = printed(
            false,
            &[
                OutputChunk::new("/logs/a.log", "x\ny", Color::Red),
                OutputChunk::new("/logs/a.log", "z\n", Color::Red),
            ],
        );
        assert_eq!(out, "x\nyz\n");
    }

    #[test]
    fn test_multi_file_prefixes_lines() {
        let out = printed(
            true,
            &[
                OutputChunk::new("/logs/a.log", "x\n", Color::Red),
                OutputChunk::new("/logs/b.log", "y\nw\n", Color::Yellow),
            ],
        );

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("a.log =>"));
        assert!(lines[0].ends_with(" x"));
        assert!(lines[1].contains("b.log =>"));
        assert!(lines[1].ends_with(" y"));
        assert!(lines[2].contains("b.log =>"));
        assert!(lines[2].ends_with(" w"));
        assert!(!out.contains("/logs/"));
    }

    #[test]
    fn test_multi_file_keeps_inner_blank_lines() {
        let out = printed(
            true,
            &[OutputChunk::new("/logs/a.log", "x\n\ny", Color::Blue)],
        );
        assert_eq!(out.lines().count(), 3);
    }

    #[test]
    fn test_non_utf8_passes_through() {
        let mut printer = Printer::new(Vec::new(), false);
        printer
            .print(&OutputChunk::new("/logs/a.log", &b"caf\xe9\n"[..], Color::Red))
            .unwrap();
        assert_eq!(printer.into_inner(), b"caf\xe9\n");

        let mut printer = Printer::new(Vec::new(), true);
        printer
            .print(&OutputChunk::new("/logs/a.log", &b"caf\xe9\n"[..], Color::Red))
            .unwrap();
        let out = printer.into_inner();
        assert!(out.ends_with(b" caf\xe9\n"));
        assert_eq!(out.iter().filter(|b| **b == b'\n').count(), 1);
    }

    #[test]
    fn test_multi_file_skips_empty_chunk() {
        let out = printed(true, &[OutputChunk::new("/logs/a.log", "", Color::Blue)]);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_run_drains_before_cancel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(OutputChunk::new("/logs/a.log", "one\n", Color::Red))
            .unwrap();
        tx.send(OutputChunk::new("/logs/a.log", "two\n", Color::Red))
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut printer = Printer::new(Vec::new(), false);
        printer.run(&mut rx, &cancel).await.unwrap();

        assert_eq!(printer.into_inner(), b"one\ntwo\n");
    }
}
