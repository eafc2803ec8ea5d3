//! Schema-encoded record types shared by both log framings.

/// Kind of a log entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Kind {
    Unspecified = 0,
    Request = 1,
    Response = 2,
    CreateStream = 3,
    Send = 4,
    Recv = 5,
}

/// First record of every log: the caller-supplied initial-state blob.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HeaderMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub initial: Vec<u8>,
}

/// Status half of a message: code from the catalogue plus text. The
/// end-of-stream sentinel uses the distinguished code `-1`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StatusMsg {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
}

/// One log entry. `payload` and `status` are mutually exclusive; both
/// absent is legal only for `CREATE_STREAM`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EntryMsg {
    #[prost(enumeration = "Kind", tag = "1")]
    pub kind: i32,
    #[prost(string, tag = "2")]
    pub method: String,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub payload: Option<Vec<u8>>,
    #[prost(message, optional, tag = "4")]
    pub status: Option<StatusMsg>,
    #[prost(int64, tag = "5")]
    pub ref_index: i64,
}
