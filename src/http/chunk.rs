//! Chunked transfer coding.
//!
//! ```text
//! chunked-body = *( hex-size CRLF data CRLF ) "0" CRLF CRLF
//! ```
//!
//! Chunk extensions and trailers are not supported: a size line may hold
//! hex digits only.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::error::ChunkError;
use crate::http::reader::{self, BufferedSource};

/// Incremental decoder for a chunked request body.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    /// Bytes of the current chunk not yet handed out.
    remaining: u64,
    done: bool,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Reads decoded body bytes from `src` into `buf`. Returns 0 once the
    /// terminating zero-size chunk has been consumed.
    pub async fn read<S: BufferedSource>(&mut self, src: &mut S, buf: &mut [u8]) -> io::Result<usize> {
        if self.done || buf.is_empty() {
            return Ok(0);
        }

        if self.remaining == 0 {
            self.remaining = read_chunk_size(src).await?;
            if self.remaining == 0 {
                self.done = true;
                discard_crlf(src).await?;
                return Ok(0);
            }
        }

        let want = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = reader::read_some(src, &mut buf[..want]).await?;
        if n == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        self.remaining -= n as u64;

        if self.remaining == 0 {
            discard_crlf(src).await?;
        }
        Ok(n)
    }
}

async fn read_chunk_size<S: BufferedSource>(src: &mut S) -> io::Result<u64> {
    let line = reader::read_line(src)
        .await?
        .ok_or(io::ErrorKind::UnexpectedEof)?;
    Ok(parse_hex(&line)?)
}

fn parse_hex(line: &[u8]) -> Result<u64, ChunkError> {
    if line.is_empty() {
        return Err(ChunkError::IllegalHex(String::new()));
    }

    let mut size: u64 = 0;
    for &b in line {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => return Err(ChunkError::IllegalHex(String::from_utf8_lossy(line).into_owned())),
        };
        size = size
            .checked_mul(16)
            .and_then(|s| s.checked_add(u64::from(digit)))
            .ok_or(ChunkError::SizeOverflow)?;
    }
    Ok(size)
}

async fn discard_crlf<S: BufferedSource>(src: &mut S) -> io::Result<()> {
    let mut crlf = [0u8; 2];
    reader::read_exact(src, &mut crlf).await?;
    if &crlf != b"\r\n" {
        return Err(ChunkError::MissingCrlf.into());
    }
    Ok(())
}

/// Writes `data` as one chunk. Empty writes emit nothing, since a
/// zero-size chunk would terminate the body.
pub async fn write_chunk<W>(w: &mut W, data: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if data.is_empty() {
        return Ok(());
    }
    w.write_all(format!("{:x}\r\n", data.len()).as_bytes()).await?;
    w.write_all(data).await?;
    w.write_all(b"\r\n").await
}

/// Writes the terminating zero-size chunk.
pub async fn write_last_chunk<W>(w: &mut W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    w.write_all(b"0\r\n\r\n").await
}
