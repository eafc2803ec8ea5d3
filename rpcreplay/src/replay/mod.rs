//! Replay side: load a recorded log into memory and serve it back through
//! a synthetic connection. No network is involved; every call is answered
//! by matching it against the log.

use std::collections::VecDeque;
use std::io::Read;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use crate::err::{ReplayError, RpcError};
use crate::rpc::{CallResult, Channel, ClientStream};
use crate::wire::{self, Message};
use crate::BeforeFn;

mod matcher;

use matcher::Matcher;

/// Options for [`Replayer::new`].
#[derive(Default)]
pub struct ReplayerOptions {
    /// Called with a private copy of every outgoing request before it is
    /// matched against the log; the mutated copy becomes the match key. A
    /// returned error fails the RPC and consumes nothing.
    pub before_match: Option<BeforeFn>,
}

/// Serves recorded RPCs back to clients.
pub struct Replayer {
    initial: Vec<u8>,
    shared: Arc<ReplayerShared>,
}

struct ReplayerShared {
    matcher: Matcher,
    before_match: Option<BeforeFn>,
}

impl Replayer {
    /// Read the whole log (either framing, auto-detected), build the match
    /// index, and keep everything in memory. Format violations, including
    /// back-pointers that do not resolve, fail here.
    pub fn new<R: Read + Send + 'static>(
        source: R,
        options: ReplayerOptions,
    ) -> Result<Self, ReplayError> {
        let mut reader = wire::new_reader(source)?;
        let initial = reader.read_header()?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.read_entry()? {
            entries.push(entry);
        }
        debug!("loaded {} log entries", entries.len());
        let matcher = Matcher::build(entries)?;
        Ok(Replayer {
            initial,
            shared: Arc::new(ReplayerShared {
                matcher,
                before_match: options.before_match,
            }),
        })
    }

    /// The header blob the recording was stamped with, byte-for-byte.
    pub fn initial(&self) -> &[u8] {
        &self.initial
    }

    /// A synthetic connection over the loaded log. Cheap to clone; all
    /// clones consume from the same index.
    pub fn channel(&self) -> ReplayChannel {
        ReplayChannel {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Release the in-memory log. Idempotent; calls through outstanding
    /// channels fail to match afterwards.
    pub fn close(&self) {
        self.shared.matcher.clear();
    }
}

impl ReplayerShared {
    fn apply_before_match(&self, method: &str, key: &mut Vec<u8>) -> CallResult<()> {
        if let Some(callback) = &self.before_match {
            callback(method, key).map_err(|err| RpcError::callback(method, err))?;
        }
        Ok(())
    }
}

/// The synthetic connection: answers calls from the log instead of a
/// server.
#[derive(Clone)]
pub struct ReplayChannel {
    shared: Arc<ReplayerShared>,
}

#[async_trait]
impl Channel for ReplayChannel {
    async fn unary(&self, method: &str, request: Vec<u8>) -> CallResult<Vec<u8>> {
        let mut key = request;
        self.shared.apply_before_match(method, &mut key)?;
        match self.shared.matcher.match_unary(method, &key)? {
            Message::Payload(reply) => Ok(reply),
            Message::Status(status) => Err(RpcError::Status(status)),
            Message::Eos => Err(RpcError::Replay(ReplayError::Corrupt(
                "recorded response is an end-of-stream marker".into(),
            ))),
        }
    }

    async fn open_stream(&self, method: &str) -> CallResult<Box<dyn ClientStream>> {
        // Slot selection waits for the first send (or its absence); the
        // log is not touched yet.
        Ok(Box::new(ReplayStream {
            shared: Arc::clone(&self.shared),
            method: method.to_string(),
            state: StreamState::Pending,
        }))
    }
}

enum StreamState {
    /// No slot claimed yet; waiting to learn the stream's first send.
    Pending,
    /// A slot is claimed; `recvs` is what remains of its receive sequence.
    Active { recvs: VecDeque<Message>, tail: Tail },
}

#[derive(PartialEq)]
enum Tail {
    Open,
    Eos,
    Failed,
}

struct ReplayStream {
    shared: Arc<ReplayerShared>,
    method: String,
    state: StreamState,
}

impl ReplayStream {
    fn select(&mut self, first_send: Option<&[u8]>) -> CallResult<()> {
        if let StreamState::Pending = self.state {
            let recvs = self.shared.matcher.match_stream(&self.method, first_send)?;
            self.state = StreamState::Active {
                recvs,
                tail: Tail::Open,
            };
        }
        Ok(())
    }
}

#[async_trait]
impl ClientStream for ReplayStream {
    async fn send(&mut self, message: Vec<u8>) -> CallResult<()> {
        if let StreamState::Pending = self.state {
            let mut key = message;
            self.shared.apply_before_match(&self.method, &mut key)?;
            self.select(Some(&key))?;
        }
        // Later sends are accepted and dropped: the stream's contents were
        // fixed when the slot was claimed.
        Ok(())
    }

    async fn close_send(&mut self) -> CallResult<()> {
        // Closing without ever sending selects a stream recorded without
        // sends.
        self.select(None)
    }

    async fn recv(&mut self) -> CallResult<Option<Vec<u8>>> {
        // A receive before any send also means the client will not key the
        // match: select a sendless stream.
        self.select(None)?;
        let StreamState::Active { recvs, tail } = &mut self.state else {
            unreachable!("stream selected above");
        };
        match recvs.pop_front() {
            Some(Message::Payload(message)) => Ok(Some(message)),
            Some(Message::Eos) => {
                *tail = Tail::Eos;
                Ok(None)
            }
            Some(Message::Status(status)) => {
                *tail = Tail::Failed;
                Err(RpcError::Status(status))
            }
            None if *tail == Tail::Eos => Ok(None),
            None => Err(RpcError::Replay(ReplayError::Exhausted {
                method: self.method.clone(),
            })),
        }
    }
}
