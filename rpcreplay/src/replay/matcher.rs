//! The correlator behind replay: an index of every recorded call, keyed by
//! method and, for streams, by the first message sent. Matching tolerates
//! calls arriving in a different order than they were recorded, while each
//! recorded call satisfies at most one replayed call.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use log::{debug, warn};
use sha2::{Digest, Sha256};

use crate::err::ReplayError;
use crate::wire::{Entry, Kind, Message};

/// One recorded unary call: the request that keys the match and the
/// response handed out when it fires.
struct UnarySlot {
    request: Vec<u8>,
    response: Message,
    consumed: bool,
}

/// One recorded stream: everything the client sent and everything the
/// server produced, in per-direction order.
#[derive(Default)]
struct StreamSlot {
    sends: Vec<Vec<u8>>,
    recvs: Vec<Message>,
    consumed: bool,
}

#[derive(Default)]
struct Slots {
    // Per method, in log order.
    unary: HashMap<String, Vec<UnarySlot>>,
    streams: HashMap<String, Vec<StreamSlot>>,
}

pub(crate) struct Matcher {
    slots: Mutex<Slots>,
}

impl Matcher {
    /// Index a loaded log. Back-pointers that do not resolve to an open
    /// call of the right kind reject the log as corrupt. A request whose
    /// response never made it into the log (the call was torn down
    /// mid-flight) is skipped with a warning rather than rejected.
    pub fn build(entries: Vec<Entry>) -> Result<Matcher, ReplayError> {
        let mut pending_unary: BTreeMap<usize, (String, Vec<u8>)> = BTreeMap::new();
        let mut pending_streams: BTreeMap<usize, (String, StreamSlot)> = BTreeMap::new();
        let mut finished_unary: Vec<(usize, String, UnarySlot)> = Vec::new();

        for (position, entry) in entries.into_iter().enumerate() {
            let index = position + 1;
            match entry.kind {
                Kind::Request => {
                    let Some(Message::Payload(request)) = entry.msg else {
                        return Err(ReplayError::Corrupt(format!(
                            "request entry #{index} does not carry a payload"
                        )));
                    };
                    pending_unary.insert(index, (entry.method, request));
                }
                Kind::CreateStream => {
                    pending_streams.insert(index, (entry.method, StreamSlot::default()));
                }
                Kind::Response => {
                    let (method, request) =
                        pending_unary.remove(&entry.ref_index).ok_or_else(|| {
                            ReplayError::Corrupt(format!(
                                "response entry #{index} references #{}, which is not an open request",
                                entry.ref_index
                            ))
                        })?;
                    let response = entry.msg.ok_or_else(|| {
                        ReplayError::Corrupt(format!(
                            "response entry #{index} does not carry a message"
                        ))
                    })?;
                    if response == Message::Eos {
                        return Err(ReplayError::Corrupt(format!(
                            "response entry #{index} carries an end-of-stream marker"
                        )));
                    }
                    finished_unary.push((
                        entry.ref_index,
                        method,
                        UnarySlot {
                            request,
                            response,
                            consumed: false,
                        },
                    ));
                }
                Kind::Send => {
                    let (_, slot) =
                        pending_streams.get_mut(&entry.ref_index).ok_or_else(|| {
                            ReplayError::Corrupt(format!(
                                "send entry #{index} references #{}, which is not a stream",
                                entry.ref_index
                            ))
                        })?;
                    let Some(Message::Payload(message)) = entry.msg else {
                        return Err(ReplayError::Corrupt(format!(
                            "send entry #{index} does not carry a payload"
                        )));
                    };
                    slot.sends.push(message);
                }
                Kind::Recv => {
                    let (_, slot) =
                        pending_streams.get_mut(&entry.ref_index).ok_or_else(|| {
                            ReplayError::Corrupt(format!(
                                "recv entry #{index} references #{}, which is not a stream",
                                entry.ref_index
                            ))
                        })?;
                    let message = entry.msg.ok_or_else(|| {
                        ReplayError::Corrupt(format!(
                            "recv entry #{index} does not carry a message"
                        ))
                    })?;
                    slot.recvs.push(message);
                }
                Kind::Unspecified => {
                    return Err(ReplayError::Corrupt(format!(
                        "entry #{index} has an unspecified kind"
                    )));
                }
            }
        }

        for (index, (method, _)) in &pending_unary {
            warn!("request entry #{index} for {method} has no response; skipping it");
        }

        let mut slots = Slots::default();
        // Ordered by request position: the scan below walks log order.
        finished_unary.sort_by_key(|(index, _, _)| *index);
        for (_, method, slot) in finished_unary {
            slots.unary.entry(method).or_default().push(slot);
        }
        for (_, (method, slot)) in pending_streams {
            slots.streams.entry(method).or_default().push(slot);
        }

        Ok(Matcher {
            slots: Mutex::new(slots),
        })
    }

    /// Claim the first unconsumed unary slot for `method` whose recorded
    /// request equals `request`, and return its response.
    pub fn match_unary(&self, method: &str, request: &[u8]) -> Result<Message, ReplayError> {
        let mut slots = self.slots.lock().unwrap();
        if let Some(list) = slots.unary.get_mut(method) {
            for slot in list.iter_mut() {
                if !slot.consumed && slot.request == request {
                    slot.consumed = true;
                    debug!("matched unary call on {method}");
                    return Ok(slot.response.clone());
                }
            }
        }
        Err(ReplayError::NoMatch {
            method: method.to_string(),
            digest: digest(request),
        })
    }

    /// Claim the first unconsumed stream slot for `method` keyed by the
    /// first client message: `Some(bytes)` selects a stream whose first
    /// recorded send equals `bytes`, `None` selects a stream recorded with
    /// no sends at all. Returns the stream's recorded receive sequence.
    pub fn match_stream(
        &self,
        method: &str,
        first_send: Option<&[u8]>,
    ) -> Result<VecDeque<Message>, ReplayError> {
        let mut slots = self.slots.lock().unwrap();
        if let Some(list) = slots.streams.get_mut(method) {
            for slot in list.iter_mut() {
                if slot.consumed {
                    continue;
                }
                let matched = match first_send {
                    None => slot.sends.is_empty(),
                    Some(key) => slot.sends.first().map(Vec::as_slice) == Some(key),
                };
                if matched {
                    slot.consumed = true;
                    debug!("matched stream on {method} ({} recvs)", slot.recvs.len());
                    return Ok(slot.recvs.drain(..).collect());
                }
            }
        }
        Err(ReplayError::NoMatch {
            method: method.to_string(),
            digest: digest(first_send.unwrap_or_default()),
        })
    }

    /// Drop every slot. Used by `close`; any later match fails.
    pub fn clear(&self) {
        let mut slots = self.slots.lock().unwrap();
        slots.unary.clear();
        slots.streams.clear();
    }
}

/// Short content digest used in mismatch diagnostics.
fn digest(bytes: &[u8]) -> String {
    let mut hex = hex::encode(Sha256::digest(bytes));
    hex.truncate(12);
    hex
}
