//! Error types for the protocol layer.
//!
//! Parse errors are fatal for the connection: the worker closes the socket
//! without attempting a response. Chunk framing errors surface from body
//! reads as `io::ErrorKind::InvalidData`. Form errors are returned to the
//! handler that asked for the form.

use std::io;
use thiserror::Error;

/// Failure to parse a request head.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The request line did not have exactly three tokens or was not UTF-8.
    #[error("malformed request line: {0:?}")]
    RequestLine(String),

    /// The request target is not an absolute path or is not a valid URI.
    #[error("malformed request target {target:?}: {reason}")]
    Target { target: String, reason: String },

    /// The protocol token is not `HTTP/<major>.<minor>`.
    #[error("malformed protocol version: {0:?}")]
    Version(String),

    /// A header line without a colon.
    #[error("unsupported protocol: header line {0:?} has no colon")]
    Header(String),

    /// The connection closed in the middle of a request head.
    #[error("connection closed before the request head was complete")]
    UnexpectedEof,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Violations of the chunked transfer coding.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("illegal hex number in chunk size line {0:?}")]
    IllegalHex(String),

    #[error("chunk size overflows")]
    SizeOverflow,

    #[error("chunk is not terminated by CRLF")]
    MissingCrlf,
}

impl From<ChunkError> for io::Error {
    fn from(err: ChunkError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}

/// Failures while reading a urlencoded or multipart form.
#[derive(Debug, Error)]
pub enum FormError {
    #[error("no multipart boundary in Content-Type")]
    MissingBoundary,

    #[error("want delimiter {expected}, but got {got}")]
    DelimiterMismatch { expected: String, got: String },

    #[error("multipart body ended before the closing delimiter")]
    UnexpectedEnd,

    #[error("malformed part header: {0}")]
    PartHeader(#[from] ParseError),

    #[error("multipart: message too large")]
    MessageTooLarge,

    #[error("method {0} carries no form body")]
    MissingFormBody(String),

    #[error("unsupported form type {0:?}")]
    UnsupportedFormType(String),

    #[error("missing multipart file {0:?}")]
    MissingFile(String),

    /// The form was already parsed once and that attempt failed.
    #[error("form parsing failed earlier: {0}")]
    Previous(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}
