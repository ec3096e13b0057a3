//! Request body streams.
//!
//! A body is one of: empty, limited to a `Content-Length`, or chunk-decoded.
//! Limited and chunked bodies may additionally answer an
//! `Expect: 100-continue` request on their first read.

use std::io;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::http::chunk::ChunkDecoder;
use crate::http::reader::{self, ConnReader};
use crate::http::writer::ConnWriter;

const CONTINUE_LINE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// How the body of a request is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Empty,
    Length(u64),
    Chunked,
}

#[derive(Debug)]
enum Kind {
    Empty,
    Limited { remaining: u64 },
    Chunked(ChunkDecoder),
}

struct ExpectContinue<'c> {
    writer: &'c Mutex<ConnWriter>,
    sent: bool,
}

/// A pull-based request body reading from the connection.
pub struct Body<'c> {
    reader: &'c mut ConnReader,
    kind: Kind,
    framing: Framing,
    expect: Option<ExpectContinue<'c>>,
}

impl<'c> Body<'c> {
    pub fn empty(reader: &'c mut ConnReader) -> Self {
        Self::with_kind(reader, Kind::Empty, Framing::Empty)
    }

    pub fn limited(reader: &'c mut ConnReader, length: u64) -> Self {
        Self::with_kind(reader, Kind::Limited { remaining: length }, Framing::Length(length))
    }

    pub fn chunked(reader: &'c mut ConnReader) -> Self {
        Self::with_kind(reader, Kind::Chunked(ChunkDecoder::new()), Framing::Chunked)
    }

    fn with_kind(reader: &'c mut ConnReader, kind: Kind, framing: Framing) -> Self {
        Self {
            reader,
            kind,
            framing,
            expect: None,
        }
    }

    /// Makes the first read send `100 Continue` through `writer`.
    /// Has no effect on an empty body.
    pub fn expect_continue(mut self, writer: &'c Mutex<ConnWriter>) -> Self {
        if self.framing != Framing::Empty {
            self.expect = Some(ExpectContinue { writer, sent: false });
        }
        self
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn expects_continue(&self) -> bool {
        self.expect.is_some()
    }

    /// True when the client is still waiting for `100 Continue`.
    pub fn continue_pending(&self) -> bool {
        self.expect.as_ref().is_some_and(|e| !e.sent)
    }

    /// Reads body bytes into `buf`. Returns 0 at the end of the body.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(expect) = self.expect.as_mut() {
            if !expect.sent {
                let mut w = expect.writer.lock().await;
                w.write_all(CONTINUE_LINE).await?;
                w.flush().await?;
                expect.sent = true;
            }
        }

        match &mut self.kind {
            Kind::Empty => Ok(0),
            Kind::Limited { remaining } => {
                if *remaining == 0 || buf.is_empty() {
                    return Ok(0);
                }
                let max = buf.len().min(usize::try_from(*remaining).unwrap_or(usize::MAX));
                let n = reader::read_some(&mut *self.reader, &mut buf[..max]).await?;
                if n == 0 {
                    return Err(io::ErrorKind::UnexpectedEof.into());
                }
                *remaining -= n as u64;
                Ok(n)
            }
            Kind::Chunked(decoder) => decoder.read(&mut *self.reader, buf).await,
        }
    }

    pub async fn read_to_end(&mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    /// Reads and drops whatever is left of the body.
    pub async fn discard(&mut self) -> io::Result<u64> {
        let mut total = 0;
        let mut buf = [0u8; 4096];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(total);
            }
            total += n as u64;
        }
    }
}
