use std::io;
use std::mem;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::http::chunk::{write_chunk, write_last_chunk};
use crate::http::header::Header;
use crate::http::mime::detect_content_type;
use crate::http::request::{Request, Version};
use crate::http::writer::{ConnWriter, write_head};

/// Default capacity of the response output buffer.
pub const DEFAULT_RESPONSE_BUFFER: usize = 4096;

/// An HTTP status code.
///
/// Any three-digit code can be sent; the associated constants name the
/// registered ones, and [`StatusCode::reason_phrase`] knows their reason
/// phrases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StatusCode(u16);

impl StatusCode {
    pub const CONTINUE: StatusCode = StatusCode(100);
    pub const SWITCHING_PROTOCOLS: StatusCode = StatusCode(101);
    pub const OK: StatusCode = StatusCode(200);
    pub const CREATED: StatusCode = StatusCode(201);
    pub const ACCEPTED: StatusCode = StatusCode(202);
    pub const NO_CONTENT: StatusCode = StatusCode(204);
    pub const PARTIAL_CONTENT: StatusCode = StatusCode(206);
    pub const MOVED_PERMANENTLY: StatusCode = StatusCode(301);
    pub const FOUND: StatusCode = StatusCode(302);
    pub const SEE_OTHER: StatusCode = StatusCode(303);
    pub const NOT_MODIFIED: StatusCode = StatusCode(304);
    pub const TEMPORARY_REDIRECT: StatusCode = StatusCode(307);
    pub const PERMANENT_REDIRECT: StatusCode = StatusCode(308);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const UNAUTHORIZED: StatusCode = StatusCode(401);
    pub const FORBIDDEN: StatusCode = StatusCode(403);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const METHOD_NOT_ALLOWED: StatusCode = StatusCode(405);
    pub const REQUEST_TIMEOUT: StatusCode = StatusCode(408);
    pub const CONFLICT: StatusCode = StatusCode(409);
    pub const LENGTH_REQUIRED: StatusCode = StatusCode(411);
    pub const PAYLOAD_TOO_LARGE: StatusCode = StatusCode(413);
    pub const UNSUPPORTED_MEDIA_TYPE: StatusCode = StatusCode(415);
    pub const EXPECTATION_FAILED: StatusCode = StatusCode(417);
    pub const TOO_MANY_REQUESTS: StatusCode = StatusCode(429);
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);
    pub const NOT_IMPLEMENTED: StatusCode = StatusCode(501);
    pub const BAD_GATEWAY: StatusCode = StatusCode(502);
    pub const SERVICE_UNAVAILABLE: StatusCode = StatusCode(503);
    pub const GATEWAY_TIMEOUT: StatusCode = StatusCode(504);
    pub const HTTP_VERSION_NOT_SUPPORTED: StatusCode = StatusCode(505);

    pub const fn new(code: u16) -> Self {
        StatusCode(code)
    }

    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use httpd::http::response::StatusCode;
    /// assert_eq!(StatusCode::OK.as_u16(), 200);
    /// assert_eq!(StatusCode::NOT_FOUND.as_u16(), 404);
    /// ```
    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Returns the standard HTTP reason phrase for this status code, or an
    /// empty string for an unregistered code.
    ///
    /// # Example
    ///
    /// ```
    /// # use httpd::http::response::StatusCode;
    /// assert_eq!(StatusCode::OK.reason_phrase(), "OK");
    /// assert_eq!(StatusCode::NOT_FOUND.reason_phrase(), "Not Found");
    /// assert_eq!(StatusCode::new(299).reason_phrase(), "");
    /// ```
    pub fn reason_phrase(&self) -> &'static str {
        reason_phrase(self.0)
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        StatusCode(code)
    }
}

impl Default for StatusCode {
    fn default() -> Self {
        StatusCode::OK
    }
}

fn reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        101 => "Switching Protocols",
        102 => "Processing",
        103 => "Early Hints",

        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        207 => "Multi-Status",
        208 => "Already Reported",
        226 => "IM Used",

        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",

        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Request Entity Too Large",
        414 => "Request URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Requested Range Not Satisfiable",
        417 => "Expectation Failed",
        418 => "I'm a teapot",
        421 => "Misdirected Request",
        422 => "Unprocessable Entity",
        423 => "Locked",
        424 => "Failed Dependency",
        425 => "Too Early",
        426 => "Upgrade Required",
        428 => "Precondition Required",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        451 => "Unavailable For Legal Reasons",

        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        506 => "Variant Also Negotiates",
        507 => "Insufficient Storage",
        508 => "Loop Detected",
        510 => "Not Extended",
        511 => "Network Authentication Required",

        _ => "",
    }
}

/// Writes the response to one request.
///
/// Body bytes are collected in a fixed-size buffer. If the handler finishes
/// before the buffer overflows, the response goes out with a
/// `Content-Length`; otherwise the header is committed to
/// `Transfer-Encoding: chunked` on the first overflow and every later flush
/// becomes one chunk. The status line and header are written exactly once,
/// right before the first body byte.
pub struct ResponseWriter<'c> {
    conn: &'c Mutex<ConnWriter>,
    version: Version,
    status: StatusCode,
    wrote_status: bool,
    header: Header,
    buf: Vec<u8>,
    capacity: usize,
    handler_done: bool,
    chunking: bool,
    /// The status line and header are on the wire.
    wrote: bool,
    body_started: bool,
    close_after_reply: bool,
}

impl<'c> ResponseWriter<'c> {
    pub fn new(conn: &'c Mutex<ConnWriter>, req: &Request<'_>, capacity: usize) -> Self {
        let close_after_reply = match req.header("Connection") {
            Some("close") => true,
            Some("keep-alive") => false,
            _ => req.version.is_pre_http11(),
        };

        Self {
            conn,
            version: req.version,
            status: StatusCode::OK,
            wrote_status: false,
            header: Header::new(),
            buf: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
            handler_done: false,
            chunking: false,
            wrote: false,
            body_started: false,
            close_after_reply,
        }
    }

    /// The response header. Changes made after the first body flush are not
    /// sent.
    pub fn header(&mut self) -> &mut Header {
        &mut self.header
    }

    /// Sets the status code. Only the first call counts, and none counts
    /// once body bytes have been written.
    pub fn write_status(&mut self, status: impl Into<StatusCode>) {
        if self.wrote_status || self.body_started {
            return;
        }
        self.status = status.into();
        self.wrote_status = true;
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// True when the connection will be closed after this response.
    pub fn close_after_reply(&self) -> bool {
        self.close_after_reply
    }

    /// Writes body bytes. Returns the number of bytes accepted.
    pub async fn write(&mut self, p: &[u8]) -> io::Result<usize> {
        let result = self.buffered_write(p).await;
        if result.is_err() {
            self.close_after_reply = true;
        }
        result
    }

    async fn buffered_write(&mut self, mut p: &[u8]) -> io::Result<usize> {
        if !p.is_empty() {
            self.body_started = true;
        }

        let mut written = 0;
        while p.len() > self.capacity - self.buf.len() {
            let n = if self.buf.is_empty() {
                // Nothing buffered: hand the whole write down as one unit.
                self.write_through(p).await?;
                p.len()
            } else {
                let n = self.capacity - self.buf.len();
                self.buf.extend_from_slice(&p[..n]);
                self.flush_buffer().await?;
                n
            };
            written += n;
            p = &p[n..];
        }

        self.buf.extend_from_slice(p);
        Ok(written + p.len())
    }

    async fn flush_buffer(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let data = mem::take(&mut self.buf);
        let result = self.write_through(&data).await;
        self.buf = data;
        self.buf.clear();
        result
    }

    /// Sends `p` to the connection, writing the header first if needed.
    async fn write_through(&mut self, p: &[u8]) -> io::Result<()> {
        let conn = self.conn;
        let mut w = conn.lock().await;

        if !self.wrote {
            self.finalize_header(p);
            write_head(&mut *w, self.version, self.status, &self.header).await?;
            self.wrote = true;
        }

        if self.chunking {
            write_chunk(&mut *w, p).await
        } else {
            w.write_all(p).await
        }
    }

    /// Picks the framing from what the handler has done so far. `p` is the
    /// first block of body bytes about to be sent.
    fn finalize_header(&mut self, p: &[u8]) {
        if is_unset(&self.header, "Content-Type") && !p.is_empty() {
            self.header.set("Content-Type", detect_content_type(p));
        }

        if is_unset(&self.header, "Content-Length") && is_unset(&self.header, "Transfer-Encoding") {
            if self.handler_done {
                self.header.set("Content-Length", p.len().to_string());
            } else {
                self.chunking = true;
                self.header.set("Transfer-Encoding", "chunked");
            }
            return;
        }

        if self.header.get("Transfer-Encoding") == Some("chunked") {
            self.chunking = true;
        }
    }

    /// Completes the response: flushes buffered bytes, terminates a chunked
    /// body and flushes the socket. A response without body bytes still
    /// gets its status line and header.
    ///
    /// The connection worker calls this after the handler returns.
    pub async fn finish(&mut self) -> io::Result<()> {
        self.handler_done = true;
        let result = self.finish_body().await;
        if result.is_err() {
            self.close_after_reply = true;
        }
        result
    }

    async fn finish_body(&mut self) -> io::Result<()> {
        self.flush_buffer().await?;
        if !self.wrote {
            if self.header.get("Transfer-Encoding") != Some("chunked") {
                self.header.set("Content-Length", "0");
            }
            self.write_through(&[]).await?;
        }

        let conn = self.conn;
        let mut w = conn.lock().await;
        if self.chunking {
            write_last_chunk(&mut *w).await?;
        }
        w.flush().await
    }
}

fn is_unset(header: &Header, key: &str) -> bool {
    header.get(key).is_none_or(str::is_empty)
}
