//! Binary framing.
//!
//! Log layout:
//! [14 bytes] magic "rpcreplay/bin\n"
//! [4 bytes]  big-endian record length
//! [N bytes]  protobuf-encoded record (header first, then entries)
//!
//! Clean end-of-stream on the first length byte ends the log; a partial
//! length or short body is a corrupt-log error.

use std::io::{self, Read, Write};

use bytes::{BufMut, BytesMut};
use prost::Message as _;

use crate::err::ReplayError;
use crate::wire::{assemble_entry, proto, Entry, EntryReader, EntryWriter, Kind, BINARY_MAGIC};

pub struct BinaryWriter<W> {
    sink: W,
}

impl<W: Write + Send> BinaryWriter<W> {
    pub fn new(sink: W) -> Self {
        Self { sink }
    }

    fn write_record(&mut self, body: &[u8]) -> Result<(), ReplayError> {
        let len = u32::try_from(body.len())
            .map_err(|_| ReplayError::Corrupt("record exceeds the 4-byte length prefix".into()))?;
        let mut buf = BytesMut::with_capacity(4 + body.len());
        buf.put_u32(len);
        buf.put_slice(body);
        self.sink.write_all(&buf)?;
        Ok(())
    }
}

impl<W: Write + Send> EntryWriter for BinaryWriter<W> {
    fn write_header(&mut self, initial: &[u8]) -> Result<(), ReplayError> {
        self.sink.write_all(BINARY_MAGIC)?;
        let header = proto::HeaderMsg {
            initial: initial.to_vec(),
        };
        self.write_record(&header.encode_to_vec())
    }

    fn write_entry(&mut self, entry: &Entry) -> Result<(), ReplayError> {
        let (payload, status) = entry.wire_message();
        let record = proto::EntryMsg {
            kind: entry.kind as i32,
            method: entry.method.clone(),
            payload,
            status: status.map(|(code, message)| proto::StatusMsg { code, message }),
            ref_index: entry.ref_index as i64,
        };
        self.write_record(&record.encode_to_vec())
    }

    fn flush(&mut self) -> Result<(), ReplayError> {
        self.sink.flush()?;
        Ok(())
    }
}

pub struct BinaryReader<R> {
    source: R,
    magic_done: bool,
}

impl<R: Read + Send> BinaryReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            magic_done: false,
        }
    }

    pub(crate) fn with_magic_consumed(source: R) -> Self {
        Self {
            source,
            magic_done: true,
        }
    }

    fn read_magic(&mut self) -> Result<(), ReplayError> {
        if self.magic_done {
            return Ok(());
        }
        let mut magic = [0u8; BINARY_MAGIC.len()];
        self.source
            .read_exact(&mut magic)
            .map_err(|_| ReplayError::UnknownMagic(String::new()))?;
        if &magic[..] != BINARY_MAGIC {
            return Err(ReplayError::UnknownMagic(
                String::from_utf8_lossy(&magic).into_owned(),
            ));
        }
        self.magic_done = true;
        Ok(())
    }

    /// One length-prefixed record; `None` at clean end-of-log.
    fn read_record(&mut self) -> Result<Option<Vec<u8>>, ReplayError> {
        let mut len_buf = [0u8; 4];
        let mut filled = 0;
        while filled < len_buf.len() {
            match self.source.read(&mut len_buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => {
                    return Err(ReplayError::Corrupt(
                        "log ends inside a record length".into(),
                    ))
                }
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(ReplayError::Io(err)),
            }
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut body = vec![0u8; len];
        self.source.read_exact(&mut body).map_err(|err| {
            if err.kind() == io::ErrorKind::UnexpectedEof {
                ReplayError::Corrupt("log ends inside a record body".into())
            } else {
                ReplayError::Io(err)
            }
        })?;
        Ok(Some(body))
    }
}

impl<R: Read + Send> EntryReader for BinaryReader<R> {
    fn read_header(&mut self) -> Result<Vec<u8>, ReplayError> {
        self.read_magic()?;
        let body = self
            .read_record()?
            .ok_or_else(|| ReplayError::Corrupt("log has no header record".into()))?;
        let header = proto::HeaderMsg::decode(body.as_slice())
            .map_err(|err| ReplayError::Corrupt(format!("malformed header record: {err}")))?;
        Ok(header.initial)
    }

    fn read_entry(&mut self) -> Result<Option<Entry>, ReplayError> {
        let Some(body) = self.read_record()? else {
            return Ok(None);
        };
        let record = proto::EntryMsg::decode(body.as_slice())
            .map_err(|err| ReplayError::Corrupt(format!("malformed entry record: {err}")))?;
        let kind = Kind::try_from(record.kind)
            .map_err(|_| ReplayError::Corrupt(format!("invalid entry kind {}", record.kind)))?;
        let entry = assemble_entry(
            kind,
            record.method,
            record.payload,
            record.status.map(|s| (s.code, s.message)),
            record.ref_index,
        )?;
        Ok(Some(entry))
    }
}
