//! The integer store service, registered on an in-process dispatcher.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::debug;
use prost::Message;

use rpcreplay::err::{RpcErr, StatusCode};
use rpcreplay::rpc::local::{Dispatcher, LocalChannel, StreamHandler, UnaryHandler};

use crate::messages::{GetRequest, Item, ListItemsRequest, SetResponse, Summary};
use crate::{GET_METHOD, LIST_ITEMS_METHOD, SET_METHOD, SET_STREAM_METHOD, STREAM_CHAT_METHOD};

type Store = Arc<Mutex<HashMap<String, i32>>>;

fn bad_request(err: prost::DecodeError) -> RpcErr {
    RpcErr::new(StatusCode::InvalidRequest, err.to_string())
}

/// Holds the item map and serves the five IntStore methods.
#[derive(Default)]
pub struct IntStoreServer {
    items: Store,
}

impl IntStoreServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every handler on a fresh dispatcher and return a channel
    /// connected to it.
    pub async fn serve(&self) -> LocalChannel {
        let dispatcher = Arc::new(Dispatcher::new());

        let items = Arc::clone(&self.items);
        let set: UnaryHandler = Arc::new(move |request| {
            let items = Arc::clone(&items);
            Box::pin(async move {
                let item = Item::decode(request.as_slice()).map_err(bad_request)?;
                let prev = items
                    .lock()
                    .unwrap()
                    .insert(item.name, item.value)
                    .unwrap_or(0);
                debug!("set -> prev {prev}");
                Ok(SetResponse { prev_value: prev }.encode_to_vec())
            })
        });
        dispatcher.register_unary(SET_METHOD, set).await;

        let items = Arc::clone(&self.items);
        let get: UnaryHandler = Arc::new(move |request| {
            let items = Arc::clone(&items);
            Box::pin(async move {
                let req = GetRequest::decode(request.as_slice()).map_err(bad_request)?;
                match items.lock().unwrap().get(&req.name) {
                    Some(&value) => Ok(Item {
                        name: req.name,
                        value,
                    }
                    .encode_to_vec()),
                    None => Err(RpcErr::new(StatusCode::NotFound, format!("{:?}", req.name))),
                }
            })
        });
        dispatcher.register_unary(GET_METHOD, get).await;

        let items = Arc::clone(&self.items);
        let list_items: StreamHandler = Arc::new(move |mut inbound, outbound| {
            let items = Arc::clone(&items);
            Box::pin(async move {
                let Some(request) = inbound.recv().await else {
                    return;
                };
                let req = match ListItemsRequest::decode(request.as_slice()) {
                    Ok(req) => req,
                    Err(err) => {
                        let _ = outbound.send(Err(bad_request(err))).await;
                        return;
                    }
                };
                let mut listed: Vec<Item> = items
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|(_, &value)| value > req.greater_than)
                    .map(|(name, &value)| Item {
                        name: name.clone(),
                        value,
                    })
                    .collect();
                // Deterministic order so recordings are stable.
                listed.sort_by_key(|item| item.value);
                for item in listed {
                    if outbound.send(Ok(item.encode_to_vec())).await.is_err() {
                        return;
                    }
                }
            })
        });
        dispatcher.register_stream(LIST_ITEMS_METHOD, list_items).await;

        let items = Arc::clone(&self.items);
        let set_stream: StreamHandler = Arc::new(move |mut inbound, outbound| {
            let items = Arc::clone(&items);
            Box::pin(async move {
                let mut count = 0;
                while let Some(request) = inbound.recv().await {
                    let item = match Item::decode(request.as_slice()) {
                        Ok(item) => item,
                        Err(err) => {
                            let _ = outbound.send(Err(bad_request(err))).await;
                            return;
                        }
                    };
                    items.lock().unwrap().insert(item.name, item.value);
                    count += 1;
                }
                let _ = outbound.send(Ok(Summary { count }.encode_to_vec())).await;
            })
        });
        dispatcher.register_stream(SET_STREAM_METHOD, set_stream).await;

        let stream_chat: StreamHandler = Arc::new(|mut inbound, outbound| {
            Box::pin(async move {
                while let Some(message) = inbound.recv().await {
                    if outbound.send(Ok(message)).await.is_err() {
                        return;
                    }
                }
            })
        });
        dispatcher.register_stream(STREAM_CHAT_METHOD, stream_chat).await;

        LocalChannel::new(dispatcher)
    }
}
