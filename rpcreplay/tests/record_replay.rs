//! End-to-end record/replay against the integer store fixture: record a
//! client session over a live in-process server, then run the same session
//! against the log with no server at all.

use anyhow::Result;
use prost::Message as _;
use tempfile::NamedTempFile;

use intstore::{
    GetRequest, IntStoreClient, IntStoreServer, Item, ListItemsRequest, SetResponse, Summary,
    GET_METHOD, LIST_ITEMS_METHOD, SET_METHOD, SET_STREAM_METHOD, STREAM_CHAT_METHOD,
};
use rpcreplay::err::{ReplayError, RpcErr, RpcError, StatusCode};
use rpcreplay::wire::{self, Entry, Kind, Message};
use rpcreplay::{BeforeFn, Channel, Recorder, RecorderOptions, Replayer, ReplayerOptions};

const INITIAL: &[u8] = &[1, 2, 3];

/// The standard session: every call shape, including a unary error.
async fn drive_int_store<C: Channel>(client: &IntStoreClient<C>) -> Result<()> {
    let item = Item::new("a", 1);
    let resp = client.set(&item).await?;
    assert_eq!(resp.prev_value, 0);

    assert_eq!(client.get("a").await?, item);

    let err = client.get("x").await.unwrap_err();
    let status = err.status().expect("expected a status error").clone();
    assert_eq!(status.code, StatusCode::NotFound);
    assert_eq!(status.message, "\"x\"");

    let mut items = client.list_items(0).await?;
    assert_eq!(items.recv().await?, Some(item));
    assert_eq!(items.recv().await?, None);

    let mut call = client.set_stream().await?;
    call.send(&Item::new("b", 2)).await?;
    call.send(&Item::new("c", 3)).await?;
    let summary = call.close_and_recv().await?;
    assert_eq!(summary.count, 2);

    let mut chat = client.stream_chat().await?;
    for item in [Item::new("d", 4), Item::new("e", 5)] {
        chat.send(&item).await?;
        assert_eq!(chat.recv().await?, Some(item));
    }
    chat.close_send().await?;
    assert_eq!(chat.recv().await?, None);

    Ok(())
}

async fn record_int_store_session(text: bool) -> Result<NamedTempFile> {
    let file = NamedTempFile::new()?;
    let recorder = Recorder::new(
        file.reopen()?,
        RecorderOptions {
            initial: INITIAL.to_vec(),
            text,
            ..Default::default()
        },
    );
    let server = IntStoreServer::new();
    let client = IntStoreClient::new(recorder.wrap(server.serve().await));
    drive_int_store(&client).await?;
    recorder.close()?;
    Ok(file)
}

/// What the standard session must leave in the log, entry by entry.
fn expected_entries() -> Vec<Entry> {
    let item_a = Item::new("a", 1).encode_to_vec();
    vec![
        // Set
        Entry::request(SET_METHOD, Message::Payload(item_a.clone())),
        Entry::response(
            1,
            Message::Payload(SetResponse { prev_value: 0 }.encode_to_vec()),
        ),
        // Get
        Entry::request(
            GET_METHOD,
            Message::Payload(GetRequest { name: "a".into() }.encode_to_vec()),
        ),
        Entry::response(3, Message::Payload(item_a.clone())),
        Entry::request(
            GET_METHOD,
            Message::Payload(GetRequest { name: "x".into() }.encode_to_vec()),
        ),
        Entry::response(5, Message::Status(RpcErr::new(StatusCode::NotFound, "\"x\""))),
        // ListItems
        Entry::create_stream(LIST_ITEMS_METHOD),
        Entry::send(
            7,
            Message::Payload(ListItemsRequest { greater_than: 0 }.encode_to_vec()),
        ),
        Entry::recv(7, Message::Payload(item_a)),
        Entry::recv(7, Message::Eos),
        // SetStream
        Entry::create_stream(SET_STREAM_METHOD),
        Entry::send(11, Message::Payload(Item::new("b", 2).encode_to_vec())),
        Entry::send(11, Message::Payload(Item::new("c", 3).encode_to_vec())),
        Entry::recv(11, Message::Payload(Summary { count: 2 }.encode_to_vec())),
        // StreamChat
        Entry::create_stream(STREAM_CHAT_METHOD),
        Entry::send(15, Message::Payload(Item::new("d", 4).encode_to_vec())),
        Entry::recv(15, Message::Payload(Item::new("d", 4).encode_to_vec())),
        Entry::send(15, Message::Payload(Item::new("e", 5).encode_to_vec())),
        Entry::recv(15, Message::Payload(Item::new("e", 5).encode_to_vec())),
        Entry::recv(15, Message::Eos),
    ]
}

#[tokio::test]
async fn record_produces_the_expected_entries() -> Result<()> {
    for text in [false, true] {
        let file = record_int_store_session(text).await?;
        let mut reader = wire::new_reader(file.reopen()?)?;
        assert_eq!(reader.read_header()?, INITIAL);
        for (number, want) in expected_entries().into_iter().enumerate() {
            let got = reader
                .read_entry()?
                .unwrap_or_else(|| panic!("log ended before entry #{}", number + 1));
            assert_eq!(got, want, "entry #{} (text: {text})", number + 1);
        }
        assert!(reader.read_entry()?.is_none());
    }
    Ok(())
}

#[tokio::test]
async fn record_then_replay() -> Result<()> {
    for text in [false, true] {
        let file = record_int_store_session(text).await?;
        let replayer = Replayer::new(file.reopen()?, ReplayerOptions::default())?;
        assert_eq!(replayer.initial(), INITIAL);
        let client = IntStoreClient::new(replayer.channel());
        drive_int_store(&client).await?;
        replayer.close();
    }
    Ok(())
}

#[tokio::test]
async fn before_write_rewrites_the_log_but_not_the_traffic() -> Result<()> {
    for text in [false, true] {
        let file = NamedTempFile::new()?;
        // Rewrite every item logged for Set; leave everything else alone.
        let before: BeforeFn = Box::new(|method, payload| {
            if !method.ends_with("Set") {
                return Ok(());
            }
            let Ok(item) = Item::decode(payload.as_slice()) else {
                return Ok(());
            };
            if item.name.is_empty() {
                return Ok(());
            }
            *payload = Item::new("bar", 2).encode_to_vec();
            Ok(())
        });
        let recorder = Recorder::new(
            file.reopen()?,
            RecorderOptions {
                text,
                before_write: Some(before),
                ..Default::default()
            },
        );
        let server = IntStoreServer::new();
        let client = IntStoreClient::new(recorder.wrap(server.serve().await));

        client.set(&Item::new("foo", 1)).await?;
        // The server stored the original request, not the rewritten copy.
        assert_eq!(client.get("foo").await?, Item::new("foo", 1));
        recorder.close()?;

        let mut reader = wire::new_reader(file.reopen()?)?;
        reader.read_header()?;
        let entry = reader.read_entry()?.expect("missing request entry");
        assert_eq!(entry.kind, Kind::Request);
        assert_eq!(
            entry.msg,
            Some(Message::Payload(Item::new("bar", 2).encode_to_vec()))
        );
    }
    Ok(())
}

#[tokio::test]
async fn before_write_cannot_alter_returned_responses() -> Result<()> {
    let file = NamedTempFile::new()?;
    let before: BeforeFn = Box::new(|method, payload| {
        if !method.ends_with("Get") {
            return Ok(());
        }
        let Ok(mut item) = Item::decode(payload.as_slice()) else {
            return Ok(());
        };
        item.value = 2;
        *payload = item.encode_to_vec();
        Ok(())
    });
    let recorder = Recorder::new(
        file.reopen()?,
        RecorderOptions {
            before_write: Some(before),
            ..Default::default()
        },
    );
    let server = IntStoreServer::new();
    let client = IntStoreClient::new(recorder.wrap(server.serve().await));

    client.set(&Item::new("foo", 1)).await?;
    // The caller still sees the live response.
    assert_eq!(client.get("foo").await?, Item::new("foo", 1));
    recorder.close()?;
    Ok(())
}

#[tokio::test]
async fn before_write_error_fails_the_rpc_and_writes_nothing() -> Result<()> {
    for text in [false, true] {
        let file = NamedTempFile::new()?;
        let before: BeforeFn = Box::new(|_, _| Err(anyhow::anyhow!("err")));
        let recorder = Recorder::new(
            file.reopen()?,
            RecorderOptions {
                text,
                before_write: Some(before),
                ..Default::default()
            },
        );
        let server = IntStoreServer::new();
        let client = IntStoreClient::new(recorder.wrap(server.serve().await));

        let err = client.set(&Item::new("foo", 1)).await.unwrap_err();
        assert!(matches!(err, RpcError::Callback { .. }));
        recorder.close()?;

        let mut reader = wire::new_reader(file.reopen()?)?;
        reader.read_header()?;
        assert!(reader.read_entry()?.is_none(), "no entry should be written");
    }
    Ok(())
}

#[tokio::test]
async fn before_match_rewrites_requests_before_matching() -> Result<()> {
    let file = NamedTempFile::new()?;
    let recorder = Recorder::new(file.reopen()?, RecorderOptions::default());
    let server = IntStoreServer::new();
    let client = IntStoreClient::new(recorder.wrap(server.serve().await));
    client.set(&Item::new("foo", 1)).await?;
    recorder.close()?;

    let before: BeforeFn = Box::new(|_, payload| {
        let mut item = Item::decode(payload.as_slice())?;
        item.name = "foo".to_string();
        *payload = item.encode_to_vec();
        Ok(())
    });
    let replayer = Replayer::new(
        file.reopen()?,
        ReplayerOptions {
            before_match: Some(before),
        },
    )?;
    let client = IntStoreClient::new(replayer.channel());
    // The raw request would never match the log; the callback fixes it up.
    client.set(&Item::new("bar", 1)).await?;
    Ok(())
}

#[tokio::test]
async fn before_match_error_fails_the_rpc() -> Result<()> {
    let file = NamedTempFile::new()?;
    let recorder = Recorder::new(file.reopen()?, RecorderOptions::default());
    let server = IntStoreServer::new();
    let client = IntStoreClient::new(recorder.wrap(server.serve().await));
    client.set(&Item::new("foo", 1)).await?;
    recorder.close()?;

    let before: BeforeFn = Box::new(|_, _| Err(anyhow::anyhow!("err")));
    let replayer = Replayer::new(
        file.reopen()?,
        ReplayerOptions {
            before_match: Some(before),
        },
    )?;
    let client = IntStoreClient::new(replayer.channel());
    let err = client.set(&Item::new("foo", 1)).await.unwrap_err();
    assert!(matches!(err, RpcError::Callback { .. }));
    Ok(())
}

const LISTED: [(&str, i32); 3] = [("a", 1), ("b", 2), ("c", 3)];

async fn expect_listed<C: Channel>(
    client: &IntStoreClient<C>,
    greater_than: i32,
) -> Result<()> {
    let want: Vec<Item> = LISTED
        .iter()
        .filter(|&&(_, value)| value > greater_than)
        .map(|&(name, value)| Item::new(name, value))
        .collect();
    let mut stream = client.list_items(greater_than).await?;
    let mut got = Vec::new();
    while let Some(item) = stream.recv().await? {
        got.push(item);
    }
    assert_eq!(got, want);
    Ok(())
}

/// Set three items, then list twice with different thresholds.
async fn drive_two_lists<C: Channel>(
    client: &IntStoreClient<C>,
    first: i32,
    second: i32,
) -> Result<()> {
    for (name, value) in LISTED {
        client.set(&Item::new(name, value)).await?;
    }
    expect_listed(client, first).await?;
    expect_listed(client, second).await?;
    Ok(())
}

async fn record_two_lists() -> Result<NamedTempFile> {
    let file = NamedTempFile::new()?;
    let recorder = Recorder::new(file.reopen()?, RecorderOptions::default());
    let server = IntStoreServer::new();
    let client = IntStoreClient::new(recorder.wrap(server.serve().await));
    drive_two_lists(&client, 1, 2).await?;
    recorder.close()?;
    Ok(file)
}

#[tokio::test]
async fn streams_replay_in_recorded_order() -> Result<()> {
    let file = record_two_lists().await?;
    let replayer = Replayer::new(file.reopen()?, ReplayerOptions::default())?;
    let client = IntStoreClient::new(replayer.channel());
    drive_two_lists(&client, 1, 2).await?;
    Ok(())
}

#[tokio::test]
async fn streams_replay_out_of_order() -> Result<()> {
    // Streams are keyed by method plus first message sent, not by log
    // position, so the two list calls can swap places.
    let file = record_two_lists().await?;
    let replayer = Replayer::new(file.reopen()?, ReplayerOptions::default())?;
    let client = IntStoreClient::new(replayer.channel());
    for (name, value) in LISTED {
        client.set(&Item::new(name, value)).await?;
    }
    expect_listed(&client, 2).await?;
    expect_listed(&client, 1).await?;
    Ok(())
}

#[tokio::test]
async fn set_initial_stamps_the_header() -> Result<()> {
    let file = NamedTempFile::new()?;
    let recorder = Recorder::new(file.reopen()?, RecorderOptions::default());
    recorder.set_initial(INITIAL)?;
    let server = IntStoreServer::new();
    let client = IntStoreClient::new(recorder.wrap(server.serve().await));
    client.set(&Item::new("a", 1)).await?;
    // The first entry committed the header.
    assert!(matches!(
        recorder.set_initial(&[9]),
        Err(ReplayError::InitialCommitted)
    ));
    recorder.close()?;

    let replayer = Replayer::new(file.reopen()?, ReplayerOptions::default())?;
    assert_eq!(replayer.initial(), INITIAL);
    Ok(())
}

#[tokio::test]
async fn unmatched_unary_call_is_a_typed_error() -> Result<()> {
    let file = record_int_store_session(false).await?;
    let replayer = Replayer::new(file.reopen()?, ReplayerOptions::default())?;
    let client = IntStoreClient::new(replayer.channel());
    let err = client.set(&Item::new("never-recorded", 99)).await.unwrap_err();
    match err {
        RpcError::Replay(ReplayError::NoMatch { method, .. }) => {
            assert_eq!(method, SET_METHOD);
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}
