//! HTTP/1.x protocol implementation.
//!
//! # Architecture
//!
//! - **`connection`**: the per-connection request loop
//! - **`parser`**: reads a request head and picks the body framing
//! - **`request`**: the parsed request, its body, query, cookies and forms
//! - **`body`** / **`chunk`**: request body streams and the chunked coding
//! - **`multipart`**: streaming `multipart/form-data` decoding
//! - **`response`**: the buffering response writer and status codes
//! - **`writer`** / **`reader`**: buffered socket halves
//! - **`mime`**: content-type sniffing for undeclared responses
//! - **`handler`**: the interface application code implements
//!
//! # Connection State Machine
//!
//! Each client connection goes through a state machine:
//!
//! ```text
//!        ┌──────────────────┐
//!        │ AwaitingRequest  │ ← Wait for the first byte of a request
//!        └──────┬───────────┘
//!               │ Bytes available (clean EOF → Closed)
//!               ▼
//!        ┌──────────────────┐
//!        │     Parsing      │ ← Request line, headers, body framing
//!        └──────┬───────────┘
//!               │ Request parsed (malformed → Closed, no response)
//!               ▼
//!        ┌──────────────────┐
//!        │     Handling     │ ← Handler reads the body, writes the response
//!        └──────┬───────────┘
//!               │ Handler returned
//!               ▼
//!        ┌──────────────────┐
//!        │    Finishing     │ ← Flush response, drain unread body
//!        └──────┬───────────┘
//!               ├─ Keep-Alive → AwaitingRequest (same connection)
//!               └─ Close → Closed
//! ```

pub mod body;
pub mod chunk;
pub mod connection;
pub mod error;
pub mod handler;
pub mod header;
pub mod mime;
pub mod multipart;
pub mod parser;
pub mod reader;
pub mod request;
pub mod response;
pub mod writer;

pub use error::{ChunkError, FormError, ParseError};
pub use handler::{Handler, handler_fn};
pub use header::Header;
pub use request::{Method, Request, Version};
pub use response::{ResponseWriter, StatusCode};
