//! Recording side: a log writer plus channel wrappers that mirror every
//! observed message into the log while passing the traffic through to the
//! real connection untouched.

use std::io::{BufWriter, Write};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::debug;

use crate::err::{ReplayError, RpcError};
use crate::rpc::{CallResult, Channel, ClientStream};
use crate::wire::{self, Entry, EntryWriter, Message};
use crate::BeforeFn;

/// Options for [`Recorder::new`].
#[derive(Default)]
pub struct RecorderOptions {
    /// Header blob written once, before the first entry. Opaque to the
    /// recorder; round-tripped verbatim to [`crate::Replayer::initial`].
    pub initial: Vec<u8>,
    /// Select the text framing instead of the default binary one.
    pub text: bool,
    /// Called with a private copy of every message just before it is
    /// written to the log. The callback may rewrite the copy (what is
    /// logged) but never affects what is sent or received. A returned
    /// error fails the RPC and nothing is written for that message.
    pub before_write: Option<BeforeFn>,
}

/// Records every call made through a wrapped channel into a log.
pub struct Recorder {
    shared: Arc<RecorderShared>,
}

struct RecorderShared {
    before_write: Option<BeforeFn>,
    state: Mutex<WriteState>,
}

struct WriteState {
    writer: Box<dyn EntryWriter>,
    initial: Vec<u8>,
    header_written: bool,
    next_index: usize,
    closed: bool,
    failed: Option<String>,
}

impl Recorder {
    pub fn new<W: Write + Send + 'static>(sink: W, options: RecorderOptions) -> Self {
        let writer = wire::new_writer(BufWriter::new(sink), options.text);
        Recorder {
            shared: Arc::new(RecorderShared {
                before_write: options.before_write,
                state: Mutex::new(WriteState {
                    writer,
                    initial: options.initial,
                    header_written: false,
                    next_index: 1,
                    closed: false,
                    failed: None,
                }),
            }),
        }
    }

    /// Re-stamp the header blob. Legal only before the first entry is
    /// written; afterwards the header is committed and this fails with
    /// [`ReplayError::InitialCommitted`].
    pub fn set_initial(&self, initial: &[u8]) -> Result<(), ReplayError> {
        let mut state = self.shared.state.lock().unwrap();
        if state.header_written {
            return Err(ReplayError::InitialCommitted);
        }
        state.initial = initial.to_vec();
        Ok(())
    }

    /// Install the recording interceptors on a connection. Every call made
    /// through the returned channel is forwarded to `inner` and logged.
    pub fn wrap<C: Channel>(&self, inner: C) -> RecordingChannel<C> {
        RecordingChannel {
            inner,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Flush and seal the log. Later calls through a wrapped channel fail
    /// with [`ReplayError::Sealed`]. Reports the first write error the
    /// recording hit, if any.
    pub fn close(&self) -> Result<(), ReplayError> {
        let mut state = self.shared.state.lock().unwrap();
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        if let Some(message) = state.failed.take() {
            return Err(ReplayError::Failed(message));
        }
        if !state.header_written {
            // An empty recording still gets its header.
            let initial = std::mem::take(&mut state.initial);
            state.writer.write_header(&initial)?;
            state.header_written = true;
        }
        state.writer.flush()
    }
}

impl RecorderShared {
    /// Append one entry, writing the header first if this is the first
    /// entry. Returns the entry's 1-based index. Write failures stick: the
    /// recording is abandoned and `close` reports the first one.
    fn append(&self, entry: Entry) -> Result<usize, ReplayError> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(ReplayError::Sealed);
        }
        if let Some(message) = &state.failed {
            return Err(ReplayError::Failed(message.clone()));
        }
        if !state.header_written {
            let initial = std::mem::take(&mut state.initial);
            if let Err(err) = state.writer.write_header(&initial) {
                state.failed = Some(err.to_string());
                return Err(err);
            }
            state.header_written = true;
        }
        if let Err(err) = state.writer.write_entry(&entry) {
            state.failed = Some(err.to_string());
            return Err(err);
        }
        let index = state.next_index;
        state.next_index += 1;
        debug!(
            "recorded entry #{index}: {} {}",
            entry.kind.as_str(),
            entry.method
        );
        Ok(index)
    }

    /// Run the user callback on a private copy of a message. No internal
    /// lock is held here, so the callback may block freely.
    fn apply_before_write(&self, method: &str, logged: &mut Vec<u8>) -> CallResult<()> {
        if let Some(callback) = &self.before_write {
            callback(method, logged).map_err(|err| RpcError::callback(method, err))?;
        }
        Ok(())
    }
}

/// A channel that forwards to the real connection and logs what it sees.
pub struct RecordingChannel<C> {
    inner: C,
    shared: Arc<RecorderShared>,
}

#[async_trait]
impl<C: Channel> Channel for RecordingChannel<C> {
    async fn unary(&self, method: &str, request: Vec<u8>) -> CallResult<Vec<u8>> {
        let mut logged = request.clone();
        self.shared.apply_before_write(method, &mut logged)?;
        let request_index = self
            .shared
            .append(Entry::request(method, Message::Payload(logged)))?;

        // The server sees the caller's original request, not the logged copy.
        match self.inner.unary(method, request).await {
            Ok(reply) => {
                let mut logged = reply.clone();
                self.shared.apply_before_write(method, &mut logged)?;
                self.shared
                    .append(Entry::response(request_index, Message::Payload(logged)))?;
                Ok(reply)
            }
            Err(err) => {
                self.shared.append(Entry::response(
                    request_index,
                    Message::Status(err.recorded_status()),
                ))?;
                Err(err)
            }
        }
    }

    async fn open_stream(&self, method: &str) -> CallResult<Box<dyn ClientStream>> {
        let inner = self.inner.open_stream(method).await?;
        let stream_index = self.shared.append(Entry::create_stream(method))?;
        Ok(Box::new(RecordingStream {
            inner,
            shared: Arc::clone(&self.shared),
            method: method.to_string(),
            stream_index,
            eos_recorded: false,
        }))
    }
}

struct RecordingStream {
    inner: Box<dyn ClientStream>,
    shared: Arc<RecorderShared>,
    method: String,
    stream_index: usize,
    eos_recorded: bool,
}

#[async_trait]
impl ClientStream for RecordingStream {
    async fn send(&mut self, message: Vec<u8>) -> CallResult<()> {
        // Only sends the server actually accepted make it into the log.
        self.inner.send(message.clone()).await?;
        let mut logged = message;
        self.shared.apply_before_write(&self.method, &mut logged)?;
        self.shared
            .append(Entry::send(self.stream_index, Message::Payload(logged)))?;
        Ok(())
    }

    async fn close_send(&mut self) -> CallResult<()> {
        self.inner.close_send().await
    }

    async fn recv(&mut self) -> CallResult<Option<Vec<u8>>> {
        match self.inner.recv().await {
            Ok(Some(message)) => {
                let mut logged = message.clone();
                self.shared.apply_before_write(&self.method, &mut logged)?;
                self.shared
                    .append(Entry::recv(self.stream_index, Message::Payload(logged)))?;
                Ok(Some(message))
            }
            Ok(None) => {
                if !self.eos_recorded {
                    self.eos_recorded = true;
                    self.shared
                        .append(Entry::recv(self.stream_index, Message::Eos))?;
                }
                Ok(None)
            }
            Err(err) => {
                self.shared.append(Entry::recv(
                    self.stream_index,
                    Message::Status(err.recorded_status()),
                ))?;
                Err(err)
            }
        }
    }
}
