// src/core/cluster/transport.rs

//! The internode RPC transport.
//!
//! The core routes HTTP-shaped requests (method, path, query parameters,
//! opaque body) and receives (status, error flag, bytes) back. Framing is
//! not part of the contract; the production transport carries requests as
//! length-prefixed bincode frames over TCP.

use crate::core::errors::LatticeDBError;
use async_trait::async_trait;
use bincode::config;
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder};

// Timeout constants for robust network operations.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);
const READ_TIMEOUT: Duration = Duration::from_secs(3);

/// Frames above this size are rejected rather than buffered.
const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Ordered query parameters, preserved verbatim across the wire.
pub type QueryParams = Vec<(String, String)>;

/// An internode request.
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct RpcRequest {
    pub method: String,
    pub path: String,
    pub params: QueryParams,
    pub body: Vec<u8>,
}

impl RpcRequest {
    pub fn new(method: &str, path: &str, params: QueryParams, body: Vec<u8>) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            params,
            body,
        }
    }
}

/// An internode response. `error` is the transport-level failure flag; the
/// status code itself is opaque to the core.
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct RpcResponse {
    pub status: u16,
    pub error: bool,
    pub body: Vec<u8>,
}

impl RpcResponse {
    /// A synthetic response for a failed transport exchange.
    pub fn transport_error(message: impl Into<String>) -> Self {
        Self {
            status: 0,
            error: true,
            body: message.into().into_bytes(),
        }
    }
}

/// One reusable connection to a peer. Handles are owned by the caller while
/// checked out of the pool.
#[async_trait]
pub trait NodeConnection: Send {
    async fn request(&mut self, request: &RpcRequest) -> Result<RpcResponse, LatticeDBError>;
}

/// Opens connections to peers. The mapper holds one connector for the
/// process lifetime; tests substitute their own.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        host: &str,
        port: u16,
    ) -> Result<Box<dyn NodeConnection>, LatticeDBError>;
}

/// Length-prefixed bincode framing for requests and responses.
pub struct RpcCodec;

impl<'a> Encoder<&'a RpcRequest> for RpcCodec {
    type Error = LatticeDBError;

    fn encode(&mut self, item: &'a RpcRequest, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = bincode::encode_to_vec(item, config::standard())
            .map_err(|e| LatticeDBError::Internal(e.to_string()))?;
        if payload.len() > MAX_FRAME_BYTES {
            return Err(LatticeDBError::Transport(format!(
                "request frame too large ({} bytes)",
                payload.len()
            )));
        }
        dst.reserve(4 + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.put_slice(&payload);
        Ok(())
    }
}

impl Decoder for RpcCodec {
    type Item = RpcResponse;
    type Error = LatticeDBError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > MAX_FRAME_BYTES {
            return Err(LatticeDBError::Transport(format!(
                "response frame too large ({len} bytes)"
            )));
        }
        if src.len() < 4 + len {
            src.reserve(4 + len - src.len());
            return Ok(None);
        }
        src.advance(4);
        let frame = src.split_to(len);
        let (response, _) = bincode::decode_from_slice(&frame, config::standard())
            .map_err(|e| LatticeDBError::Transport(format!("bad response frame: {e}")))?;
        Ok(Some(response))
    }
}

/// The production connector: plain TCP with connect/write/read timeouts.
pub struct TcpConnector {
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            write_timeout: WRITE_TIMEOUT,
            read_timeout: READ_TIMEOUT,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        host: &str,
        port: u16,
    ) -> Result<Box<dyn NodeConnection>, LatticeDBError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| LatticeDBError::Transport(format!("connect timeout to {host}:{port}")))??;
        Ok(Box::new(TcpNodeConnection {
            stream,
            codec: RpcCodec,
            write_timeout: self.write_timeout,
            read_timeout: self.read_timeout,
        }))
    }
}

struct TcpNodeConnection {
    stream: TcpStream,
    codec: RpcCodec,
    write_timeout: Duration,
    read_timeout: Duration,
}

#[async_trait]
impl NodeConnection for TcpNodeConnection {
    /// Sends one request frame and reads one reply frame.
    async fn request(&mut self, request: &RpcRequest) -> Result<RpcResponse, LatticeDBError> {
        let mut write_buf = BytesMut::new();
        self.codec.encode(request, &mut write_buf)?;

        let write_fut = self.stream.write_all(&write_buf);
        tokio::time::timeout(self.write_timeout, write_fut)
            .await
            .map_err(|_| LatticeDBError::Transport("write timeout while sending request".into()))??;

        let mut read_buf = BytesMut::with_capacity(4096);
        loop {
            if let Some(reply) = self.codec.decode(&mut read_buf)? {
                return Ok(reply);
            }
            let read_fut = self.stream.read_buf(&mut read_buf);
            match tokio::time::timeout(self.read_timeout, read_fut).await {
                Ok(Ok(0)) => {
                    return Err(LatticeDBError::Transport("connection closed by peer".into()));
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    return Err(LatticeDBError::Transport(
                        "read timeout while waiting for response".into(),
                    ));
                }
            }
        }
    }
}
