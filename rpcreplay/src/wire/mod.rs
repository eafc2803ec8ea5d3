//! The log: entry model, the two interchangeable framings, and format
//! auto-detection.
//!
//! A log is a magic prefix, one header record carrying the caller's opaque
//! initial-state blob, then zero or more entries. The binary framing
//! serializes records as length-prefixed protobuf; the text framing as JSON
//! blocks separated by `---` lines. Both share the record schema in
//! [`proto`] and round-trip entries semantically.

use std::io::{self, Read, Write};

use crate::err::{ReplayError, RpcErr, StatusCode};

pub mod binary;
pub mod proto;
pub mod text;

pub use proto::Kind;

pub const BINARY_MAGIC: &[u8] = b"rpcreplay/bin\n";
pub const TEXT_MAGIC: &[u8] = b"rpcreplay/txt\n";

// Auto-detection reads a fixed-size prefix, so the magics must agree on
// length and differ within it.
const MAGIC_LEN: usize = BINARY_MAGIC.len();
const _: () = assert!(TEXT_MAGIC.len() == MAGIC_LEN);

/// Wire code of the end-of-stream sentinel, outside the status catalogue.
pub const EOS_CODE: i32 = -1;

/// What one entry carries: a serialized message, a status error, or the
/// end-of-stream sentinel. Exactly one, by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Payload(Vec<u8>),
    Status(RpcErr),
    Eos,
}

impl Message {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Message::Payload(_))
    }
}

/// One record of the log. Entries are numbered by their 1-based position
/// and never change once written; `ref_index` points a derived entry back
/// at the call that owns it (`0` for none).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub kind: Kind,
    pub method: String,
    pub msg: Option<Message>,
    pub ref_index: usize,
}

impl Entry {
    pub fn request(method: &str, msg: Message) -> Self {
        Entry {
            kind: Kind::Request,
            method: method.to_string(),
            msg: Some(msg),
            ref_index: 0,
        }
    }

    pub fn response(ref_index: usize, msg: Message) -> Self {
        Entry {
            kind: Kind::Response,
            method: String::new(),
            msg: Some(msg),
            ref_index,
        }
    }

    pub fn create_stream(method: &str) -> Self {
        Entry {
            kind: Kind::CreateStream,
            method: method.to_string(),
            msg: None,
            ref_index: 0,
        }
    }

    pub fn send(ref_index: usize, msg: Message) -> Self {
        Entry {
            kind: Kind::Send,
            method: String::new(),
            msg: Some(msg),
            ref_index,
        }
    }

    pub fn recv(ref_index: usize, msg: Message) -> Self {
        Entry {
            kind: Kind::Recv,
            method: String::new(),
            msg: Some(msg),
            ref_index,
        }
    }

    /// Flatten the message wrapper into the wire fields shared by both
    /// framings: `(payload, status)`, mutually exclusive.
    pub(crate) fn wire_message(&self) -> (Option<Vec<u8>>, Option<(i32, String)>) {
        match &self.msg {
            None => (None, None),
            Some(Message::Payload(bytes)) => (Some(bytes.clone()), None),
            Some(Message::Status(status)) => {
                (None, Some((i32::from(status.code), status.message.clone())))
            }
            Some(Message::Eos) => (None, Some((EOS_CODE, String::new()))),
        }
    }
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Unspecified => "UNSPECIFIED",
            Kind::Request => "REQUEST",
            Kind::Response => "RESPONSE",
            Kind::CreateStream => "CREATE_STREAM",
            Kind::Send => "SEND",
            Kind::Recv => "RECV",
        }
    }

    pub fn from_name(name: &str) -> Option<Kind> {
        match name {
            "REQUEST" => Some(Kind::Request),
            "RESPONSE" => Some(Kind::Response),
            "CREATE_STREAM" => Some(Kind::CreateStream),
            "SEND" => Some(Kind::Send),
            "RECV" => Some(Kind::Recv),
            _ => None,
        }
    }
}

/// Rebuild an entry from the wire fields, enforcing the model invariants:
/// payload and status are mutually exclusive, only `CREATE_STREAM` carries
/// no message, originating entries name a method and carry no back-pointer.
pub(crate) fn assemble_entry(
    kind: Kind,
    method: String,
    payload: Option<Vec<u8>>,
    status: Option<(i32, String)>,
    ref_index: i64,
) -> Result<Entry, ReplayError> {
    let msg = match (payload, status) {
        (Some(_), Some(_)) => {
            return Err(ReplayError::Corrupt(
                "entry carries both a payload and a status".into(),
            ))
        }
        (Some(bytes), None) => Some(Message::Payload(bytes)),
        (None, Some((code, _))) if code == EOS_CODE => Some(Message::Eos),
        (None, Some((code, message))) => {
            Some(Message::Status(RpcErr::new(StatusCode::from(code), message)))
        }
        (None, None) => None,
    };

    match kind {
        Kind::Unspecified => {
            return Err(ReplayError::Corrupt("entry kind is unspecified".into()));
        }
        Kind::CreateStream => {
            if msg.is_some() {
                return Err(ReplayError::Corrupt(
                    "create-stream entry carries a message".into(),
                ));
            }
        }
        _ => {
            if msg.is_none() {
                return Err(ReplayError::Corrupt(format!(
                    "{} entry carries no message",
                    kind.as_str()
                )));
            }
        }
    }

    if matches!(kind, Kind::Request | Kind::CreateStream) {
        if method.is_empty() {
            return Err(ReplayError::Corrupt(format!(
                "{} entry names no method",
                kind.as_str()
            )));
        }
        if ref_index != 0 {
            return Err(ReplayError::Corrupt(format!(
                "{} entry carries a back-pointer",
                kind.as_str()
            )));
        }
    } else if ref_index < 1 {
        return Err(ReplayError::Corrupt(format!(
            "{} entry has back-pointer {ref_index}",
            kind.as_str()
        )));
    }

    Ok(Entry {
        kind,
        method,
        msg,
        ref_index: ref_index as usize,
    })
}

/// Serializer for one log. `write_header` must come first and also emits
/// the framing magic.
pub trait EntryWriter: Send {
    fn write_header(&mut self, initial: &[u8]) -> Result<(), ReplayError>;
    fn write_entry(&mut self, entry: &Entry) -> Result<(), ReplayError>;
    fn flush(&mut self) -> Result<(), ReplayError>;
}

/// Deserializer for one log. `read_header` must come first; `read_entry`
/// returns `None` at clean end-of-log.
pub trait EntryReader: Send {
    fn read_header(&mut self) -> Result<Vec<u8>, ReplayError>;
    fn read_entry(&mut self) -> Result<Option<Entry>, ReplayError>;
}

/// Writer for the framing selected by `text`.
pub fn new_writer<W: Write + Send + 'static>(sink: W, text: bool) -> Box<dyn EntryWriter> {
    if text {
        Box::new(text::TextWriter::new(sink))
    } else {
        Box::new(binary::BinaryWriter::new(sink))
    }
}

/// Reader over either framing, detected from the magic prefix.
pub fn new_reader<R: Read + Send + 'static>(
    mut source: R,
) -> Result<Box<dyn EntryReader>, ReplayError> {
    let mut magic = [0u8; MAGIC_LEN];
    let mut filled = 0;
    while filled < MAGIC_LEN {
        match source.read(&mut magic[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(ReplayError::Io(err)),
        }
    }
    match &magic[..filled] {
        m if m == BINARY_MAGIC => Ok(Box::new(binary::BinaryReader::with_magic_consumed(source))),
        m if m == TEXT_MAGIC => Ok(Box::new(text::TextReader::with_magic_consumed(source))),
        other => Err(ReplayError::UnknownMagic(
            String::from_utf8_lossy(other).into_owned(),
        )),
    }
}
