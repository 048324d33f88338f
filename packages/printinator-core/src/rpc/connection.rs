use super::codec::JsonRpcCodec;
use super::value::RpcValue;
use crate::error::{FleetError, Result};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;

/// Error object carried by a JSON-RPC failure response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<RpcValue>,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// One persistent JSON-RPC session with a printer.
///
/// Calls are strictly sequential: `call` takes `&mut self`, sends one
/// request and waits for the response with the same id before returning.
pub struct RpcConnection {
    framed: Framed<TcpStream, JsonRpcCodec>,
    next_id: u64,
    call_timeout: Duration,
    peer: String,
}

impl RpcConnection {
    pub async fn connect(host: &str, port: u16, call_timeout: Duration) -> Result<Self> {
        let peer = format!("{}:{}", host, port);
        let stream = match timeout(call_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(FleetError::Network(format!("could not connect to {}: {}", peer, e)));
            }
            Err(_) => {
                return Err(FleetError::Network(format!("timed out connecting to {}", peer)));
            }
        };
        stream.set_nodelay(true)?;

        tracing::debug!("Connected to {}", peer);
        Ok(Self {
            framed: Framed::new(stream, JsonRpcCodec::new()),
            next_id: 1,
            call_timeout,
            peer,
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Invoke `method` and wait for its response. A failure response becomes
    /// [`FleetError::Protocol`]; a dropped or silent socket becomes
    /// [`FleetError::Network`].
    pub async fn call(&mut self, method: &str, params: Option<RpcValue>) -> Result<RpcValue> {
        let id = self.next_id;
        self.next_id += 1;

        let mut request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
        });
        if let Some(params) = params {
            request["params"] = serde_json::Value::from(params);
        }

        tracing::trace!("-> {} {}", self.peer, request);
        self.framed.send(request).await?;

        loop {
            let frame = match timeout(self.call_timeout, self.framed.next()).await {
                Ok(Some(Ok(frame))) => frame,
                Ok(Some(Err(e))) => return Err(FleetError::protocol(method, e.to_string())),
                Ok(None) => {
                    return Err(FleetError::Network(format!(
                        "{} closed the connection during {}",
                        self.peer, method
                    )));
                }
                Err(_) => {
                    return Err(FleetError::Network(format!(
                        "{} did not answer {} within {:?}",
                        self.peer, method, self.call_timeout
                    )));
                }
            };

            if frame.get("id").and_then(serde_json::Value::as_u64) != Some(id) {
                // Printers push state notifications on the same socket
                tracing::trace!(
                    "Skipping frame from {}: {:?}",
                    self.peer,
                    frame.get("method")
                );
                continue;
            }

            if let Some(error) = frame.get("error").filter(|e| !e.is_null()) {
                let error: RpcError = serde_json::from_value(error.clone()).unwrap_or(RpcError {
                    code: 0,
                    message: error.to_string(),
                    data: None,
                });
                return Err(FleetError::protocol(method, error.to_string()));
            }

            let result = frame.get("result").cloned().unwrap_or_default();
            tracing::trace!("<- {} {}", self.peer, method);
            return Ok(RpcValue::from(result));
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.framed.close().await?;
        tracing::debug!("Disconnected from {}", self.peer);
        Ok(())
    }
}
