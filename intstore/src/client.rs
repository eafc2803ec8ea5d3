//! Typed client stubs over any [`Channel`]: a real transport, a recording
//! wrapper, or a replay connection.

use prost::Message;

use rpcreplay::err::RpcError;
use rpcreplay::rpc::{CallResult, Channel, ClientStream};

use crate::messages::{GetRequest, Item, ListItemsRequest, SetResponse, Summary};
use crate::{GET_METHOD, LIST_ITEMS_METHOD, SET_METHOD, SET_STREAM_METHOD, STREAM_CHAT_METHOD};

pub struct IntStoreClient<C> {
    channel: C,
}

impl<C: Channel> IntStoreClient<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    pub async fn set(&self, item: &Item) -> CallResult<SetResponse> {
        let reply = self
            .channel
            .unary(SET_METHOD, item.encode_to_vec())
            .await?;
        Ok(SetResponse::decode(reply.as_slice())?)
    }

    pub async fn get(&self, name: &str) -> CallResult<Item> {
        let request = GetRequest {
            name: name.to_string(),
        };
        let reply = self
            .channel
            .unary(GET_METHOD, request.encode_to_vec())
            .await?;
        Ok(Item::decode(reply.as_slice())?)
    }

    /// Server-streaming: one request, then a stream of items.
    pub async fn list_items(&self, greater_than: i32) -> CallResult<ItemStream> {
        let mut stream = self.channel.open_stream(LIST_ITEMS_METHOD).await?;
        let request = ListItemsRequest { greater_than };
        stream.send(request.encode_to_vec()).await?;
        stream.close_send().await?;
        Ok(ItemStream { inner: stream })
    }

    /// Client-streaming: a stream of items, then one summary.
    pub async fn set_stream(&self) -> CallResult<SetStreamCall> {
        let inner = self.channel.open_stream(SET_STREAM_METHOD).await?;
        Ok(SetStreamCall { inner })
    }

    /// Bidirectional: items in, items out.
    pub async fn stream_chat(&self) -> CallResult<ChatCall> {
        let inner = self.channel.open_stream(STREAM_CHAT_METHOD).await?;
        Ok(ChatCall { inner })
    }
}

pub struct ItemStream {
    inner: Box<dyn ClientStream>,
}

impl ItemStream {
    pub async fn recv(&mut self) -> CallResult<Option<Item>> {
        match self.inner.recv().await? {
            Some(bytes) => Ok(Some(Item::decode(bytes.as_slice())?)),
            None => Ok(None),
        }
    }
}

pub struct SetStreamCall {
    inner: Box<dyn ClientStream>,
}

impl SetStreamCall {
    pub async fn send(&mut self, item: &Item) -> CallResult<()> {
        self.inner.send(item.encode_to_vec()).await
    }

    pub async fn close_and_recv(&mut self) -> CallResult<Summary> {
        self.inner.close_send().await?;
        match self.inner.recv().await? {
            Some(bytes) => Ok(Summary::decode(bytes.as_slice())?),
            None => Err(RpcError::Transport(
                "stream closed without a summary".into(),
            )),
        }
    }
}

pub struct ChatCall {
    inner: Box<dyn ClientStream>,
}

impl ChatCall {
    pub async fn send(&mut self, item: &Item) -> CallResult<()> {
        self.inner.send(item.encode_to_vec()).await
    }

    pub async fn close_send(&mut self) -> CallResult<()> {
        self.inner.close_send().await
    }

    pub async fn recv(&mut self) -> CallResult<Option<Item>> {
        match self.inner.recv().await? {
            Some(bytes) => Ok(Some(Item::decode(bytes.as_slice())?)),
            None => Ok(None),
        }
    }
}
