//! Record RPC traffic against a real service, then replay it later with no
//! network and no server: a synthetic connection answers each call by
//! matching it against the recorded log. Calls may replay in a different
//! order than they were recorded; streams are correlated by method and
//! first message sent, so concurrent streams tolerate reordering while each
//! stream's own messages stay in order.

pub mod err;
pub mod record;
pub mod replay;
pub mod rpc;
pub mod wire;

pub use err::{ReplayError, RpcErr, RpcError, StatusCode};
pub use record::{Recorder, RecorderOptions, RecordingChannel};
pub use replay::{ReplayChannel, Replayer, ReplayerOptions};
pub use rpc::{CallResult, Channel, ClientStream};
pub use wire::{new_reader, new_writer, Entry, EntryReader, EntryWriter, Kind, Message};

/// Callback applied to a private copy of a serialized message: before it is
/// logged on the recording side, or before it keys a match on the replay
/// side. The copy may be rewritten; the live traffic is never affected.
pub type BeforeFn = Box<dyn Fn(&str, &mut Vec<u8>) -> anyhow::Result<()> + Send + Sync>;
