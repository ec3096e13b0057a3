use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

use crate::http::header::Header;
use crate::http::request::Version;
use crate::http::response::StatusCode;

pub type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Serializes a status line and header block.
///
/// Only the first value of each header is emitted.
pub fn serialize_head(version: Version, status: StatusCode, header: &Header) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);

    let status_line = format!(
        "{} {} {}\r\n",
        version,
        status.as_u16(),
        status.reason_phrase()
    );
    buf.extend_from_slice(status_line.as_bytes());

    for (key, values) in header.iter() {
        let Some(value) = values.first() else {
            continue;
        };
        buf.extend_from_slice(key.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(value.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    buf.extend_from_slice(b"\r\n");
    buf
}

pub async fn write_head<W>(
    w: &mut W,
    version: Version,
    status: StatusCode,
    header: &Header,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    w.write_all(&serialize_head(version, status, header)).await
}

/// The buffered write side of a connection.
pub struct ConnWriter {
    inner: BufWriter<BoxedWrite>,
}

impl ConnWriter {
    pub fn new(io: BoxedWrite, capacity: usize) -> Self {
        Self {
            inner: BufWriter::with_capacity(capacity, io),
        }
    }

    pub fn from_writer<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::new(Box::new(writer), 4096)
    }

    /// The unbuffered socket. Writing or shutting it down bypasses (and
    /// leaves behind) whatever is still buffered.
    pub fn get_mut(&mut self) -> &mut BoxedWrite {
        self.inner.get_mut()
    }
}

impl AsyncWrite for ConnWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
