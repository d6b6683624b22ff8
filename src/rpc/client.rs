//! Client side of the daemon's JSON-RPC interface, used by the CLI.

use std::net::SocketAddr;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::protocol::{Request, Response, RpcError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to connect to daemon at {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("communication error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("daemon closed the connection")]
    Closed,

    #[error("{}", .0.message)]
    Rpc(RpcError),
}

impl ClientError {
    /// JSON-RPC error code, when the daemon answered with an error.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Rpc(e) => Some(e.code),
            _ => None,
        }
    }
}

pub struct RpcClient {
    addr: SocketAddr,
}

impl RpcClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// One request per connection.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> Result<T, ClientError> {
        let mut stream = TcpStream::connect(self.addr)
            .await
            .map_err(|source| ClientError::Connect { addr: self.addr, source })?;

        let request = Request::new(method, params, Value::Number(1.into()));
        let mut payload = serde_json::to_string(&request)?;
        payload.push('\n');
        stream.write_all(payload.as_bytes()).await?;

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(ClientError::Closed);
        }

        let response: Response = serde_json::from_str(&line)?;
        if let Some(error) = response.error {
            return Err(ClientError::Rpc(error));
        }

        Ok(serde_json::from_value(response.result.unwrap_or(Value::Null))?)
    }

    pub async fn call_no_params<T: DeserializeOwned>(&self, method: &str) -> Result<T, ClientError> {
        self.call(method, None).await
    }
}
