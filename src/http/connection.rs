use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Context;
use futures_util::FutureExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::http::handler::Handler;
use crate::http::parser::read_request;
use crate::http::reader::ConnReader;
use crate::http::response::ResponseWriter;
use crate::http::writer::ConnWriter;

/// One client connection, served request after request until either side
/// closes it.
pub struct Connection<H> {
    reader: ConnReader,
    writer: Mutex<ConnWriter>,
    handler: Arc<H>,
    config: Arc<Config>,
    peer: Option<SocketAddr>,
    state: ConnectionState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingRequest,
    Parsing,
    Handling,
    Finishing,
    Closed,
}

fn set_state(state: &mut ConnectionState, next: ConnectionState) {
    tracing::trace!(from = ?state, to = ?next, "connection state");
    *state = next;
}

impl<H: Handler> Connection<H> {
    pub fn new<S>(stream: S, peer: Option<SocketAddr>, handler: Arc<H>, config: Arc<Config>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: ConnReader::new(Box::new(read_half), config.read_buffer_size),
            writer: Mutex::new(ConnWriter::new(Box::new(write_half), config.write_buffer_size)),
            handler,
            config,
            peer,
            state: ConnectionState::AwaitingRequest,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Serves the connection to completion and closes the socket.
    ///
    /// Errors and panics end only this connection; they are logged here and
    /// never propagate to the listener.
    pub async fn serve(mut self) {
        let outcome = AssertUnwindSafe(self.run()).catch_unwind().await;
        let clean = match outcome {
            Ok(Ok(())) => {
                tracing::debug!("connection closed");
                true
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %format!("{e:#}"), "connection closed after error");
                false
            }
            Err(panic) => {
                tracing::error!(panic = %panic_message(panic.as_ref()), "panic while serving connection");
                false
            }
        };

        set_state(&mut self.state, ConnectionState::Closed);
        let writer = self.writer.get_mut();
        // After a failure, buffered bytes belong to a broken response and
        // are dropped with the socket.
        let shutdown = if clean {
            writer.shutdown().await
        } else {
            writer.get_mut().shutdown().await
        };
        if let Err(e) = shutdown {
            tracing::debug!(error = %e, "socket shutdown failed");
        }
    }

    /// Runs the request loop. Returns when the client closes the connection
    /// or a response asks for the connection to be closed.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            set_state(&mut self.state, ConnectionState::AwaitingRequest);
            self.reader.set_limit(self.config.max_head_bytes);

            let readable = self
                .reader
                .wait_readable()
                .await
                .context("failed to read from connection")?;
            if !readable {
                break;
            }

            if !self.serve_request().await? {
                break;
            }
        }

        set_state(&mut self.state, ConnectionState::Closed);
        Ok(())
    }

    /// Reads, handles and finishes one request. Returns whether the
    /// connection may carry another one.
    async fn serve_request(&mut self) -> anyhow::Result<bool> {
        set_state(&mut self.state, ConnectionState::Parsing);
        let mut req = read_request(&mut self.reader, &self.writer, &self.config.form)
            .await
            .context("failed to parse request")?;
        req.remote_addr = self.peer;

        set_state(&mut self.state, ConnectionState::Handling);
        let mut w = ResponseWriter::new(&self.writer, &req, self.config.response_buffer_size);
        self.handler.serve(&mut w, &mut req).await;

        set_state(&mut self.state, ConnectionState::Finishing);
        let written = w.finish().await;
        tracing::info!(
            method = %req.method,
            path = %req.path,
            status = w.status().as_u16(),
            "served request"
        );
        written.context("failed to write response")?;

        let reusable = req.finish().await.context("failed to finish request body")?;
        if !reusable {
            tracing::debug!("client still waiting for 100-continue, closing");
        }
        Ok(reusable && !w.close_after_reply())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
