//! An in-process "integer store" service and its typed client, used to
//! exercise record/replay against every call shape: unary, server-streaming,
//! client-streaming, and bidirectional.

pub mod client;
pub mod messages;
pub mod server;

pub use client::{ChatCall, IntStoreClient, ItemStream, SetStreamCall};
pub use messages::{GetRequest, Item, ListItemsRequest, SetResponse, Summary};
pub use server::IntStoreServer;

pub const SET_METHOD: &str = "/intstore.IntStore/Set";
pub const GET_METHOD: &str = "/intstore.IntStore/Get";
pub const LIST_ITEMS_METHOD: &str = "/intstore.IntStore/ListItems";
pub const SET_STREAM_METHOD: &str = "/intstore.IntStore/SetStream";
pub const STREAM_CHAT_METHOD: &str = "/intstore.IntStore/StreamChat";
