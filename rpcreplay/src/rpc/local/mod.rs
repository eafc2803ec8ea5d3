//! In-process transport: a registry of handlers plus a channel that drives
//! them over bounded queues. Stands in for a network transport in tests and
//! single-process deployments.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use tokio::sync::{mpsc, RwLock};

use crate::err::{RpcErr, RpcError, StatusCode};
use crate::rpc::{CallResult, Channel, ClientStream};

const STREAM_BUFFER: usize = 16;

pub type HandlerFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Handler for a unary method: serialized request in, serialized response
/// (or status) out.
pub type UnaryHandler =
    Arc<dyn Fn(Vec<u8>) -> HandlerFuture<Result<Vec<u8>, RpcErr>> + Send + Sync>;

/// Handler for a streaming method. The handler owns the server half of the
/// stream: it reads client messages from `inbound` and writes messages or a
/// terminal status to `outbound`; dropping `outbound` ends the stream.
pub type StreamHandler = Arc<
    dyn Fn(mpsc::Receiver<Vec<u8>>, mpsc::Sender<Result<Vec<u8>, RpcErr>>) -> HandlerFuture<()>
        + Send
        + Sync,
>;

/// Registry mapping fully-qualified method names to handlers.
#[derive(Default)]
pub struct Dispatcher {
    unary: RwLock<HashMap<String, UnaryHandler>>,
    streams: RwLock<HashMap<String, StreamHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_unary(&self, method: &str, handler: UnaryHandler) {
        self.unary.write().await.insert(method.to_string(), handler);
    }

    pub async fn register_stream(&self, method: &str, handler: StreamHandler) {
        self.streams
            .write()
            .await
            .insert(method.to_string(), handler);
    }

    pub async fn dispatch_unary(&self, method: &str, request: Vec<u8>) -> Result<Vec<u8>, RpcErr> {
        let handler = self
            .unary
            .read()
            .await
            .get(method)
            .cloned()
            .ok_or_else(|| RpcErr::new(StatusCode::HandlerNotFound, method))?;
        handler(request).await
    }

    async fn dispatch_stream(
        &self,
        method: &str,
    ) -> Result<
        (
            mpsc::Sender<Vec<u8>>,
            mpsc::Receiver<Result<Vec<u8>, RpcErr>>,
        ),
        RpcErr,
    > {
        let handler = self
            .streams
            .read()
            .await
            .get(method)
            .cloned()
            .ok_or_else(|| RpcErr::new(StatusCode::HandlerNotFound, method))?;
        let (client_tx, server_rx) = mpsc::channel(STREAM_BUFFER);
        let (server_tx, client_rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(handler(server_rx, server_tx));
        debug!("opened stream handler for {method}");
        Ok((client_tx, client_rx))
    }
}

/// A `Channel` connected directly to a `Dispatcher`.
#[derive(Clone)]
pub struct LocalChannel {
    dispatcher: Arc<Dispatcher>,
}

impl LocalChannel {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl Channel for LocalChannel {
    async fn unary(&self, method: &str, request: Vec<u8>) -> CallResult<Vec<u8>> {
        self.dispatcher
            .dispatch_unary(method, request)
            .await
            .map_err(RpcError::Status)
    }

    async fn open_stream(&self, method: &str) -> CallResult<Box<dyn ClientStream>> {
        let (tx, rx) = self
            .dispatcher
            .dispatch_stream(method)
            .await
            .map_err(RpcError::Status)?;
        Ok(Box::new(LocalStream { tx: Some(tx), rx }))
    }
}

struct LocalStream {
    tx: Option<mpsc::Sender<Vec<u8>>>,
    rx: mpsc::Receiver<Result<Vec<u8>, RpcErr>>,
}

#[async_trait]
impl ClientStream for LocalStream {
    async fn send(&mut self, message: Vec<u8>) -> CallResult<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| RpcError::Transport("send half is closed".into()))?;
        tx.send(message)
            .await
            .map_err(|_| RpcError::Transport("stream handler is gone".into()))
    }

    async fn close_send(&mut self) -> CallResult<()> {
        // Dropping the sender is the close signal the handler observes.
        self.tx.take();
        Ok(())
    }

    async fn recv(&mut self) -> CallResult<Option<Vec<u8>>> {
        match self.rx.recv().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(status)) => Err(RpcError::Status(status)),
            None => Ok(None),
        }
    }
}
