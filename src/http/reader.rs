//! Buffered reading primitives shared by the request parser, the chunk
//! decoder and the multipart decoder.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader, ReadBuf, Take};

/// Default budget for a request line plus headers.
pub const DEFAULT_HEAD_LIMIT: u64 = 1 << 20;

pub type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;

/// A source of buffered bytes that can be consumed incrementally.
///
/// Anything implementing tokio's `AsyncBufRead` is a source; the multipart
/// decoder provides its own look-ahead buffer as one too.
pub trait BufferedSource: Send {
    /// Returns the buffered bytes, refilling once if none are buffered.
    /// An empty slice means end of stream.
    fn fill_buf(&mut self) -> impl Future<Output = io::Result<&[u8]>> + Send;

    fn consume(&mut self, amt: usize);
}

impl<T> BufferedSource for T
where
    T: AsyncBufRead + Unpin + Send,
{
    async fn fill_buf(&mut self) -> io::Result<&[u8]> {
        AsyncBufReadExt::fill_buf(self).await
    }

    fn consume(&mut self, amt: usize) {
        AsyncBufRead::consume(Pin::new(self), amt)
    }
}

/// Reads one logical line, stripping the trailing `\n` or `\r\n`.
///
/// A line that spans several buffer refills is reassembled. Returns `None`
/// when the stream is exhausted before any byte of the line was read; a
/// final unterminated line is returned as is.
pub async fn read_line<S: BufferedSource>(src: &mut S) -> io::Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    let mut seen_any = false;

    loop {
        let available = src.fill_buf().await?;
        if available.is_empty() {
            if !seen_any {
                return Ok(None);
            }
            break;
        }
        seen_any = true;

        match available.iter().position(|&b| b == b'\n') {
            Some(i) => {
                line.extend_from_slice(&available[..i]);
                src.consume(i + 1);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(line));
            }
            None => {
                let n = available.len();
                line.extend_from_slice(available);
                src.consume(n);
            }
        }
    }

    Ok(Some(line))
}

/// Fills `buf` completely or fails with `UnexpectedEof`.
pub async fn read_exact<S: BufferedSource>(src: &mut S, buf: &mut [u8]) -> io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let available = src.fill_buf().await?;
        if available.is_empty() {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        let n = available.len().min(buf.len() - filled);
        buf[filled..filled + n].copy_from_slice(&available[..n]);
        src.consume(n);
        filled += n;
    }
    Ok(())
}

/// Copies at most `buf.len()` already-buffered bytes, refilling once.
pub async fn read_some<S: BufferedSource>(src: &mut S, buf: &mut [u8]) -> io::Result<usize> {
    let available = src.fill_buf().await?;
    let n = available.len().min(buf.len());
    buf[..n].copy_from_slice(&available[..n]);
    src.consume(n);
    Ok(n)
}

/// The read side of a connection.
///
/// Reads go through a byte budget: while a request head is being parsed the
/// budget is capped, and once the body framing is known it is lifted, since
/// the body is bounded by its own framing.
pub struct ConnReader {
    inner: BufReader<Take<BoxedRead>>,
}

impl ConnReader {
    pub fn new(io: BoxedRead, capacity: usize) -> Self {
        Self {
            inner: BufReader::with_capacity(capacity, io.take(DEFAULT_HEAD_LIMIT)),
        }
    }

    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::new(Box::new(reader), 4096)
    }

    /// Caps the number of bytes that may still be pulled from the socket.
    pub fn set_limit(&mut self, limit: u64) {
        self.inner.get_mut().set_limit(limit);
    }

    pub fn lift_limit(&mut self) {
        self.set_limit(u64::MAX);
    }

    /// Waits until at least one byte is available. Returns `false` on a
    /// clean end of stream.
    pub async fn wait_readable(&mut self) -> io::Result<bool> {
        let available = AsyncBufReadExt::fill_buf(&mut self.inner).await?;
        Ok(!available.is_empty())
    }
}

impl AsyncRead for ConnReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl AsyncBufRead for ConnReader {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        Pin::new(&mut self.get_mut().inner).poll_fill_buf(cx)
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        Pin::new(&mut self.get_mut().inner).consume(amt)
    }
}
