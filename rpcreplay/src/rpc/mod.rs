//! Client-side surface of the RPC layer. Messages cross this boundary as
//! opaque serialized bytes; typed stubs encode and decode at the edge.

use async_trait::async_trait;

use crate::err::RpcError;

pub mod local;

pub type CallResult<T> = Result<T, RpcError>;

/// A client connection. Both real transports and the record/replay
/// wrappers implement this, so the same generated stubs drive either.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Issue a single-request, single-response call.
    async fn unary(&self, method: &str, request: Vec<u8>) -> CallResult<Vec<u8>>;

    /// Open a streaming call. Whether the stream carries client messages,
    /// server messages, or both is up to the method's contract.
    async fn open_stream(&self, method: &str) -> CallResult<Box<dyn ClientStream>>;
}

/// The client half of one streaming call.
#[async_trait]
pub trait ClientStream: Send {
    /// Send one message to the server.
    async fn send(&mut self, message: Vec<u8>) -> CallResult<()>;

    /// Signal that no further messages will be sent.
    async fn close_send(&mut self) -> CallResult<()>;

    /// Receive the next message. `Ok(None)` is the clean end-of-stream
    /// signal; a status error terminates the stream.
    async fn recv(&mut self) -> CallResult<Option<Vec<u8>>>;
}
