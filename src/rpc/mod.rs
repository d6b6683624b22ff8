//! JSON-RPC 2.0 over TCP between the daemon and the CLI.
//!
//! - `protocol`: request/response types and error codes
//! - `transport`: TCP listener with newline-delimited JSON framing
//! - `methods`: method dispatch onto the batch dispatcher and record store
//! - `client`: one-shot client used by the CLI subcommands

pub mod client;
pub mod methods;
pub mod protocol;
mod transport;

use std::net::SocketAddr;
use tokio::sync::broadcast;

use crate::context::AppContext;
use transport::Transport;

pub use client::{ClientError, RpcClient};
pub use methods::MethodHandler;
pub use protocol::{Request, Response, RpcError};

pub struct RpcServer {
    transport: Transport,
    shutdown_tx: broadcast::Sender<()>,
}

impl RpcServer {
    pub fn new(ctx: AppContext, bind_addr: SocketAddr) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            transport: Transport::new(bind_addr, MethodHandler::new(ctx)),
            shutdown_tx,
        }
    }

    /// Serve until `shutdown()` is called.
    pub async fn start(&self) -> anyhow::Result<()> {
        self.transport.listen(self.shutdown_tx.subscribe()).await
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
