//! Text framing: a magic line, then one JSON block per record, each
//! terminated by a separator line. Byte fields render as base64. The form
//! is meant for human diffing; it round-trips records semantically, not
//! byte-for-byte against the binary framing.

use std::io::{BufRead, BufReader, Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::err::ReplayError;
use crate::wire::{assemble_entry, Entry, EntryReader, EntryWriter, Kind, TEXT_MAGIC};

const SEPARATOR: &str = "---";

#[derive(Serialize, Deserialize)]
struct HeaderRecord {
    #[serde(default)]
    initial: String,
}

#[derive(Serialize, Deserialize)]
struct StatusRecord {
    code: i32,
    message: String,
}

#[derive(Serialize, Deserialize)]
struct EntryRecord {
    kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<StatusRecord>,
    #[serde(default)]
    ref_index: i64,
}

pub struct TextWriter<W> {
    sink: W,
}

impl<W: Write + Send> TextWriter<W> {
    pub fn new(sink: W) -> Self {
        Self { sink }
    }

    fn write_block(&mut self, record: &impl Serialize) -> Result<(), ReplayError> {
        let block = serde_json::to_string_pretty(record)
            .map_err(|err| ReplayError::Corrupt(format!("unencodable record: {err}")))?;
        self.sink.write_all(block.as_bytes())?;
        self.sink.write_all(b"\n")?;
        self.sink.write_all(SEPARATOR.as_bytes())?;
        self.sink.write_all(b"\n")?;
        Ok(())
    }
}

impl<W: Write + Send> EntryWriter for TextWriter<W> {
    fn write_header(&mut self, initial: &[u8]) -> Result<(), ReplayError> {
        self.sink.write_all(TEXT_MAGIC)?;
        self.write_block(&HeaderRecord {
            initial: BASE64.encode(initial),
        })
    }

    fn write_entry(&mut self, entry: &Entry) -> Result<(), ReplayError> {
        let (payload, status) = entry.wire_message();
        self.write_block(&EntryRecord {
            kind: entry.kind.as_str().to_string(),
            method: entry.method.clone(),
            payload: payload.map(|bytes| BASE64.encode(bytes)),
            status: status.map(|(code, message)| StatusRecord { code, message }),
            ref_index: entry.ref_index as i64,
        })
    }

    fn flush(&mut self) -> Result<(), ReplayError> {
        self.sink.flush()?;
        Ok(())
    }
}

pub struct TextReader<R> {
    source: BufReader<R>,
    magic_done: bool,
}

impl<R: Read + Send> TextReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            source: BufReader::new(source),
            magic_done: false,
        }
    }

    pub(crate) fn with_magic_consumed(source: R) -> Self {
        Self {
            source: BufReader::new(source),
            magic_done: true,
        }
    }

    fn read_magic(&mut self) -> Result<(), ReplayError> {
        if self.magic_done {
            return Ok(());
        }
        let mut line = String::new();
        self.source.read_line(&mut line)?;
        if line.as_bytes() != TEXT_MAGIC {
            return Err(ReplayError::UnknownMagic(line.trim_end().to_string()));
        }
        self.magic_done = true;
        Ok(())
    }

    /// Buffer lines until a separator; `None` at clean end-of-log. A
    /// non-empty block without its separator is corrupt.
    fn read_block(&mut self) -> Result<Option<String>, ReplayError> {
        let mut block = String::new();
        loop {
            let mut line = String::new();
            let n = self.source.read_line(&mut line)?;
            if n == 0 {
                if block.trim().is_empty() {
                    return Ok(None);
                }
                return Err(ReplayError::Corrupt("log ends inside a record".into()));
            }
            if line.trim_end() == SEPARATOR {
                if block.trim().is_empty() {
                    return Err(ReplayError::Corrupt("empty record".into()));
                }
                return Ok(Some(block));
            }
            block.push_str(&line);
        }
    }

    fn decode_bytes(field: &str, value: &str) -> Result<Vec<u8>, ReplayError> {
        BASE64
            .decode(value)
            .map_err(|err| ReplayError::Corrupt(format!("{field} is not valid base64: {err}")))
    }
}

impl<R: Read + Send> EntryReader for TextReader<R> {
    fn read_header(&mut self) -> Result<Vec<u8>, ReplayError> {
        self.read_magic()?;
        let block = self
            .read_block()?
            .ok_or_else(|| ReplayError::Corrupt("log has no header record".into()))?;
        let header: HeaderRecord = serde_json::from_str(&block)
            .map_err(|err| ReplayError::Corrupt(format!("malformed header record: {err}")))?;
        Self::decode_bytes("header initial state", &header.initial)
    }

    fn read_entry(&mut self) -> Result<Option<Entry>, ReplayError> {
        let Some(block) = self.read_block()? else {
            return Ok(None);
        };
        let record: EntryRecord = serde_json::from_str(&block)
            .map_err(|err| ReplayError::Corrupt(format!("malformed entry record: {err}")))?;
        let kind = Kind::from_name(&record.kind)
            .ok_or_else(|| ReplayError::Corrupt(format!("invalid entry kind {:?}", record.kind)))?;
        let payload = match record.payload {
            Some(value) => Some(Self::decode_bytes("entry payload", &value)?),
            None => None,
        };
        let entry = assemble_entry(
            kind,
            record.method,
            payload,
            record.status.map(|s| (s.code, s.message)),
            record.ref_index,
        )?;
        Ok(Some(entry))
    }
}
