//! Synchronous request/response RPC between peers: one length-prefixed
//! bincode frame each way over a short-lived TCP connection. Failures are
//! values here; the roles decide whether an unreachable peer means failover.

use crate::node::PeerNode;
use log::{debug, warn};
use shared::{Request, Response};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

/// Frames larger than this are rejected outright.
const MAX_FRAME: u32 = 1024 * 1024;

#[derive(Debug)]
pub enum RpcError {
    /// The callee could not be reached or dropped the connection.
    Unreachable(String),
    /// The call did not complete within the deadline.
    Timeout,
    /// The bytes on the wire were not a valid frame.
    Protocol(String),
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable(m) => write!(f, "peer unreachable: {m}"),
            Self::Timeout => write!(f, "rpc timed out"),
            Self::Protocol(m) => write!(f, "protocol error: {m}"),
        }
    }
}

impl std::error::Error for RpcError {}

/// Invokes `request` on the peer listening at `addr`, bounded by `deadline`.
pub async fn call(
    addr: SocketAddr,
    request: &Request,
    deadline: Duration,
) -> Result<Response, RpcError> {
    match timeout(deadline, call_inner(addr, request)).await {
        Ok(result) => result,
        Err(_) => Err(RpcError::Timeout),
    }
}

async fn call_inner(addr: SocketAddr, request: &Request) -> Result<Response, RpcError> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| RpcError::Unreachable(e.to_string()))?;

    let payload = bincode::serialize(request).map_err(|e| RpcError::Protocol(e.to_string()))?;
    write_frame(&mut stream, &payload).await?;

    let reply = read_frame(&mut stream).await?;
    bincode::deserialize(&reply).map_err(|e| RpcError::Protocol(e.to_string()))
}

async fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> Result<(), RpcError> {
    let len = payload.len() as u32;
    if len > MAX_FRAME {
        return Err(RpcError::Protocol(format!("frame of {len} bytes")));
    }
    stream
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| RpcError::Unreachable(e.to_string()))?;
    stream
        .write_all(payload)
        .await
        .map_err(|e| RpcError::Unreachable(e.to_string()))?;
    Ok(())
}

async fn read_frame(stream: &mut TcpStream) -> Result<Vec<u8>, RpcError> {
    let mut len_bytes = [0u8; 4];
    stream
        .read_exact(&mut len_bytes)
        .await
        .map_err(|e| RpcError::Unreachable(e.to_string()))?;

    let len = u32::from_be_bytes(len_bytes);
    if len > MAX_FRAME {
        return Err(RpcError::Protocol(format!("frame of {len} bytes")));
    }

    let mut payload = vec![0u8; len as usize];
    stream
        .read_exact(&mut payload)
        .await
        .map_err(|e| RpcError::Unreachable(e.to_string()))?;
    Ok(payload)
}

/// The inbound half: every peer is an RPC server. Each accepted connection
/// carries exactly one request and is served on its own task.
pub struct RpcListener {
    listener: TcpListener,
}

impl RpcListener {
    /// Binding failure is fatal local misconfiguration; the caller aborts
    /// startup.
    pub async fn bind(addr: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// Accept loop. Runs until the owning task is aborted.
    pub async fn serve(self, node: Arc<PeerNode>) {
        loop {
            match self.listener.accept().await {
                Ok((stream, remote)) => {
                    let node = Arc::clone(&node);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, node).await {
                            debug!("request from {remote} failed: {e}");
                        }
                    });
                }
                Err(e) => {
                    warn!("accept failed: {e}");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

async fn handle_connection(mut stream: TcpStream, node: Arc<PeerNode>) -> Result<(), RpcError> {
    let payload = read_frame(&mut stream).await?;
    let request: Request =
        bincode::deserialize(&payload).map_err(|e| RpcError::Protocol(e.to_string()))?;

    let response = node.dispatch(request).await;

    let bytes = bincode::serialize(&response).map_err(|e| RpcError::Protocol(e.to_string()))?;
    write_frame(&mut stream, &bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_call_to_unbound_port_is_unreachable() {
        // Nothing listens on port 1.
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let request = Request::Join {
            caller: shared::PeerHandle(addr),
        };

        match call(addr, &request, Duration::from_millis(500)).await {
            Err(RpcError::Unreachable(_)) | Err(RpcError::Timeout) => {}
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            // Advertise an absurd frame length.
            stream
                .write_all(&(MAX_FRAME + 1).to_be_bytes())
                .await
                .unwrap();
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        match read_frame(&mut stream).await {
            Err(RpcError::Protocol(_)) => {}
            other => panic!("expected protocol error, got {other:?}"),
        }
    }
}
