use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{Instrument, info};

use crate::config::Config;
use crate::http::connection::Connection;
use crate::http::handler::Handler;

/// Accepts TCP connections and serves each one on its own task.
pub struct Server<H> {
    config: Arc<Config>,
    handler: Arc<H>,
}

impl<H: Handler> Server<H> {
    pub fn new(config: Config, handler: H) -> Self {
        Self {
            config: Arc::new(config),
            handler: Arc::new(handler),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Binds `listen_addr` and serves forever.
    pub async fn listen_and_serve(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .with_context(|| format!("failed to bind {}", self.config.listen_addr))?;
        info!("Listening on {}", listener.local_addr()?);

        self.serve(listener).await
    }

    /// Serves connections accepted from `listener`. Accept errors are logged
    /// and do not stop the loop.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            let (socket, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            };
            tracing::debug!("Accepted connection from {}", peer);

            if let Err(e) = socket.set_nodelay(true) {
                tracing::debug!(%peer, error = %e, "failed to set TCP_NODELAY");
            }

            let conn = Connection::new(socket, Some(peer), self.handler.clone(), self.config.clone());
            tokio::spawn(
                conn.serve()
                    .instrument(tracing::info_span!("connection", %peer)),
            );
        }
    }
}
