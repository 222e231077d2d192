//! Positioning a file so that reading to EOF yields its trailing lines.

use std::io::{self, SeekFrom};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

const BLOCK_SIZE: u64 = 4096;

/// Scans before giving up on a file that keeps shrinking under us.
const MAX_SCANS: usize = 3;

/// Moves the cursor of `file` back from EOF so that reading from it yields at
/// most `lines` complete trailing lines, plus any unterminated last line.
///
/// The file is scanned backward a block at a time counting `\n`. Once more
/// than `lines` newlines have been seen, the offset just past that newline is
/// used; if the start of the file is reached first, the whole file is shown.
///
/// If the file is truncated while it is being scanned, the scan starts over
/// from the new end. A file that keeps shrinking is shown from offset 0.
///
/// Returns the offset the cursor was left at.
pub async fn seek_trailing_lines<R>(file: &mut R, lines: usize) -> io::Result<u64>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    for _ in 0..MAX_SCANS {
        let len = file.seek(SeekFrom::End(0)).await?;

        if let Some(offset) = scan(file, len, lines).await? {
            file.seek(SeekFrom::Start(offset)).await?;
            tracing::trace!(len, offset, lines, "seeked to trailing lines");
            return Ok(offset);
        }

        tracing::debug!(len, "seek: file shrank while scanning, retrying");
    }

    file.seek(SeekFrom::Start(0)).await
}

/// Finds the start offset for `lines` trailing lines of the first `len`
/// bytes. `None` means fewer than `len` bytes were there to read.
async fn scan<R>(file: &mut R, len: u64, lines: usize) -> io::Result<Option<u64>>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    let mut buf = vec![0u8; BLOCK_SIZE as usize];
    let mut end = len;
    let mut seen = 0usize;

    while end > 0 {
        let start = end.saturating_sub(BLOCK_SIZE);
        let block = &mut buf[..(end - start) as usize];

        file.seek(SeekFrom::Start(start)).await?;
        match file.read_exact(block).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }

        for (i, byte) in block.iter().enumerate().rev() {
            if *byte == b'\n' {
                seen += 1;
                if seen > lines {
                    // Exclude the newline terminating the line before the tail.
                    return Ok(Some(start + i as u64 + 1));
                }
            }
        }

        end = start;
    }

    Ok(Some(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;
    use tokio::fs::File;

    async fn tail_of(content: &[u8], lines: usize) -> (u64, String) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seek.log");
        tokio::fs::write(&path, content).await.unwrap();

        let mut file = File::open(&path).await.unwrap();
        let offset = seek_trailing_lines(&mut file, lines).await.unwrap();

        let mut rest = String::new();
        file.read_to_string(&mut rest).await.unwrap();
        (offset, rest)
    }

    #[tokio::test]
    async fn test_trailing_lines() {
        let (offset, rest) = tail_of(b"one\ntwo\nthree\nfour\n", 2).await;
        assert_eq!(rest, "three\nfour\n");
        assert_eq!(offset, 8);
    }

    #[tokio::test]
    async fn test_partial_last_line() {
        let (_, rest) = tail_of(b"one\ntwo\nthree", 1).await;
        assert_eq!(rest, "two\nthree");
    }

    #[tokio::test]
    async fn test_fewer_lines_than_requested() {
        let (offset, rest) = tail_of(b"x\ny\n", 5).await;
        assert_eq!(offset, 0);
        assert_eq!(rest, "x\ny\n");
    }

    #[tokio::test]
    async fn test_zero_lines_starts_at_end() {
        let (offset, rest) = tail_of(b"x\ny\n", 0).await;
        assert_eq!(offset, 4);
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_empty_file() {
        let (offset, rest) = tail_of(b"", 5).await;
        assert_eq!(offset, 0);
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_scan_crosses_blocks() {
        let mut content = Vec::new();
        for i in 0..2000 {
            content.extend_from_slice(format!("line number {}\n", i).as_bytes());
        }

        let (_, rest) = tail_of(&content, 3).await;
        assert_eq!(
            rest,
            "line number 1997\nline number 1998\nline number 1999\n"
        );

        let (offset, rest) = tail_of(&content, 5000).await;
        assert_eq!(offset, 0);
        assert_eq!(rest.len(), content.len());
    }

    #[tokio::test]
    async fn test_empty_lines_count() {
        let (_, rest) = tail_of(b"a\n\n\n", 2).await;
        assert_eq!(rest, "\n\n");
    }

    #[tokio::test]
    async fn test_scan_past_shrunk_end() {
        // Length taken before the file was cut down to a single line.
        let mut file = Cursor::new(b"last\n".to_vec());
        assert_eq!(scan(&mut file, 9000, 2).await.unwrap(), None);
        assert_eq!(scan(&mut file, 5, 2).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_seek_in_memory() {
        let mut file = Cursor::new(b"one\ntwo\nthree\n".to_vec());
        let offset = seek_trailing_lines(&mut file, 1).await.unwrap();
        assert_eq!(offset, 8);
        assert_eq!(file.position(), 8);
    }
}
