//! Integration tests for the stream multiplexer over an in-memory transport.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    collector, mock_transport, next_event, next_message, stream_config, MockConnector, MockServer,
    MockSession,
};
use pairlink_core::{ChannelKey, ExchangeConfig, Timeframe};
use pairlink_exchange::{
    ChannelHandler, ConnectionState, ExchangeClient, ExchangeError, ExchangeResult, StreamClient,
    StreamEvent, SubscriptionState, WireMessage,
};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

async fn connected() -> (StreamClient, Arc<MockConnector>, MockServer, MockSession) {
    let (connector, mut server) = mock_transport();
    let client = StreamClient::with_connector(connector.clone(), &stream_config());
    client.open().await.expect("open should succeed");
    let session = server.accept().await;
    (client, connector, server, session)
}

fn spawn_subscribe(
    client: &StreamClient,
    key: ChannelKey,
    handler: &ChannelHandler,
) -> JoinHandle<ExchangeResult<()>> {
    let client = client.clone();
    let handler = handler.clone();
    tokio::spawn(async move { client.subscribe(key, &handler).await })
}

fn spawn_unsubscribe(
    client: &StreamClient,
    key: ChannelKey,
    handler: &ChannelHandler,
) -> JoinHandle<ExchangeResult<()>> {
    let client = client.clone();
    let handler = handler.clone();
    tokio::spawn(async move { client.unsubscribe(key, &handler).await })
}

/// Subscribes and acknowledges the resulting frame, returning it.
async fn subscribe_acked(
    client: &StreamClient,
    session: &mut MockSession,
    key: ChannelKey,
    handler: &ChannelHandler,
) -> Value {
    let task = spawn_subscribe(client, key, handler);
    let frame = session.next_frame().await;
    assert_eq!(frame["op"], "subscribe");
    session.ack(&frame);
    task.await.unwrap().expect("subscribe should be acknowledged");
    frame
}

#[tokio::test(start_paused = true)]
async fn test_orderbook_subscribe_frame_shape() {
    let (client, _connector, _server, mut session) = connected().await;
    let (handler, _rx) = collector();

    let task = spawn_subscribe(&client, ChannelKey::orderbook("BTC-USDT", "1E-1"), &handler);
    let frame = session.next_frame().await;

    assert_eq!(frame["op"], "subscribe");
    assert_eq!(frame["channel"], "orderbook");
    assert_eq!(
        frame["params"],
        json!({"trading_pair_id": "BTC-USDT", "precision": "1E-1"})
    );
    assert!(frame["id"].is_u64());

    session.ack(&frame);
    assert!(task.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_each_distinct_handler_receives_frame_once() {
    let (client, _connector, _server, mut session) = connected().await;
    let key = ChannelKey::ticker("BTC-USDT");
    let (first, mut first_rx) = collector();
    let (second, mut second_rx) = collector();

    subscribe_acked(&client, &mut session, key.clone(), &first).await;

    // Already active: no further frames
    client.subscribe(key.clone(), &first).await.unwrap();
    client.subscribe(key.clone(), &second).await.unwrap();
    assert!(session.try_frame().is_none());

    session.data("ticker", json!({"trading_pair_id": "BTC-USDT"}), json!({"last": "30000"}));

    let message = next_message(&mut first_rx).await;
    assert_eq!(message.key, key);
    assert_eq!(message.data["last"], "30000");
    next_message(&mut second_rx).await;
    assert!(first_rx.try_recv().is_err());
    assert!(second_rx.try_recv().is_err());

    let subscriptions = client.subscriptions().await.unwrap();
    assert_eq!(subscriptions.len(), 1);
    assert_eq!(subscriptions[0].handler_count, 2);
    assert_eq!(subscriptions[0].state, SubscriptionState::Active);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_subscribes_share_one_frame() {
    let (client, _connector, _server, mut session) = connected().await;
    let key = ChannelKey::public_trade("ETH-USDT");
    let handlers: Vec<_> = (0..3).map(|_| collector().0).collect();

    let tasks: Vec<_> = handlers
        .iter()
        .map(|handler| spawn_subscribe(&client, key.clone(), handler))
        .collect();

    let frame = session.next_frame().await;
    session.ack(&frame);
    for task in tasks {
        assert!(task.await.unwrap().is_ok());
    }

    assert!(session.try_frame().is_none());
    let subscriptions = client.subscriptions().await.unwrap();
    assert_eq!(subscriptions[0].handler_count, 3);
}

#[tokio::test(start_paused = true)]
async fn test_equivalent_precisions_share_channel() {
    let (client, _connector, _server, mut session) = connected().await;
    let (first, mut first_rx) = collector();
    let (second, mut second_rx) = collector();

    let frame = subscribe_acked(
        &client,
        &mut session,
        ChannelKey::orderbook("BTC-USDT", dec!(0.1)),
        &first,
    )
    .await;
    assert_eq!(frame["params"]["precision"], "1E-1");

    client
        .subscribe(ChannelKey::orderbook("BTC-USDT", "1E-1"), &second)
        .await
        .unwrap();
    assert!(session.try_frame().is_none());

    session.data(
        "orderbook",
        json!({"trading_pair_id": "BTC-USDT", "precision": "0.1"}),
        json!({"bids": [], "asks": []}),
    );
    next_message(&mut first_rx).await;
    next_message(&mut second_rx).await;
}

#[tokio::test(start_paused = true)]
async fn test_last_unsubscribe_sends_single_frame() {
    let (client, _connector, _server, mut session) = connected().await;
    let key = ChannelKey::candle("BTC-USDT", Timeframe::M1);
    let (first, _first_rx) = collector();
    let (second, mut second_rx) = collector();

    subscribe_acked(&client, &mut session, key.clone(), &first).await;
    client.subscribe(key.clone(), &second).await.unwrap();

    // Other handler still registered
    client.unsubscribe(key.clone(), &first).await.unwrap();
    assert!(session.try_frame().is_none());

    let task = spawn_unsubscribe(&client, key.clone(), &second);
    let frame = session.next_frame().await;
    assert_eq!(frame["op"], "unsubscribe");
    assert_eq!(frame["channel"], "candle");
    session.ack(&frame);
    assert!(task.await.unwrap().is_ok());

    assert!(client.subscriptions().await.unwrap().is_empty());

    session.data(
        "candle",
        json!({"trading_pair_id": "BTC-USDT", "timeframe": "1m"}),
        json!({"close": "1"}),
    );
    // Unknown handler is a no-op
    client.unsubscribe(key, &second).await.unwrap();
    assert!(session.try_frame().is_none());
    assert!(second_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_waits_for_pending_subscribe() {
    let (client, _connector, _server, mut session) = connected().await;
    let key = ChannelKey::ticker("XRP-USDT");
    let (handler, _rx) = collector();

    let subscribe = spawn_subscribe(&client, key.clone(), &handler);
    let first = session.next_frame().await;
    assert_eq!(first["op"], "subscribe");

    let unsubscribe = spawn_unsubscribe(&client, key.clone(), &handler);
    session.ack(&first);
    assert!(subscribe.await.unwrap().is_ok());

    let second = session.next_frame().await;
    assert_eq!(second["op"], "unsubscribe");
    assert_ne!(first["id"], second["id"]);
    session.ack(&second);
    assert!(unsubscribe.await.unwrap().is_ok());

    assert!(client.subscriptions().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_handler_panic_does_not_block_others() {
    let (client, _connector, _server, mut session) = connected().await;
    let key = ChannelKey::ticker("BTC-USDT");
    let faulty = ChannelHandler::new(|_| panic!("handler failure"));
    let (healthy, mut healthy_rx) = collector();

    subscribe_acked(&client, &mut session, key.clone(), &faulty).await;
    client.subscribe(key.clone(), &healthy).await.unwrap();

    session.data("ticker", json!({"trading_pair_id": "BTC-USDT"}), json!({"seq": 1}));
    session.data("ticker", json!({"trading_pair_id": "BTC-USDT"}), json!({"seq": 2}));

    assert_eq!(next_message(&mut healthy_rx).await.data["seq"], 1);
    assert_eq!(next_message(&mut healthy_rx).await.data["seq"], 2);
    assert_eq!(client.connection_state(), ConnectionState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_subscribe_reports_reason_and_retries() {
    let (client, _connector, _server, mut session) = connected().await;
    let key = ChannelKey::orderbook("NOPE-USDT", "1E-1");
    let (handler, _rx) = collector();

    let task = spawn_subscribe(&client, key.clone(), &handler);
    let frame = session.next_frame().await;
    session.reject(&frame, "unknown trading pair");

    assert_eq!(
        task.await.unwrap(),
        Err(ExchangeError::SubscriptionRejected(
            "unknown trading pair".to_string()
        ))
    );
    let subscriptions = client.subscriptions().await.unwrap();
    assert_eq!(subscriptions[0].state, SubscriptionState::Failed);
    assert_eq!(subscriptions[0].handler_count, 1);

    // Retry with the same handler sends a fresh frame
    let task = spawn_subscribe(&client, key, &handler);
    let retry = session.next_frame().await;
    assert!(retry["id"].as_u64() > frame["id"].as_u64());
    session.ack(&retry);
    assert!(task.await.unwrap().is_ok());

    let subscriptions = client.subscriptions().await.unwrap();
    assert_eq!(subscriptions[0].state, SubscriptionState::Active);
    assert_eq!(subscriptions[0].handler_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_unacknowledged_subscribe_times_out() {
    let (client, _connector, _server, mut session) = connected().await;
    let key = ChannelKey::fundingbook("USDT", "1E-4");
    let (handler, _rx) = collector();

    let task = spawn_subscribe(&client, key.clone(), &handler);
    let stale = session.next_frame().await;

    let result = task.await.unwrap();
    assert!(matches!(result, Err(ExchangeError::SubscriptionTimeout(_))));

    let mut task = spawn_subscribe(&client, key, &handler);
    let retry = session.next_frame().await;
    assert_ne!(stale["id"], retry["id"]);

    // Ack for the expired request is ignored
    session.ack(&stale);
    assert!(tokio::time::timeout(Duration::from_millis(100), &mut task)
        .await
        .is_err());

    session.ack(&retry);
    assert!(task.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_subscribe_still_becomes_active() {
    let (client, _connector, _server, mut session) = connected().await;
    let key = ChannelKey::ticker("SOL-USDT");
    let (handler, mut rx) = collector();

    let task = spawn_subscribe(&client, key.clone(), &handler);
    let frame = session.next_frame().await;
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    session.ack(&frame);
    session.data("ticker", json!({"trading_pair_id": "SOL-USDT"}), json!({"last": "150"}));
    let message = next_message(&mut rx).await;
    assert_eq!(message.key, key);
    assert_eq!(message.data["last"], "150");

    let subscriptions = client.subscriptions().await.unwrap();
    assert_eq!(subscriptions.len(), 1);
    assert_eq!(subscriptions[0].state, SubscriptionState::Active);
    // No unsubscribe is sent for the abandoned caller
    assert!(session.try_frame().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_send_failure_reconnects_and_resends() {
    let (connector, mut server) = mock_transport();
    let client = StreamClient::with_connector(connector, &stream_config());
    let mut events = client.events();
    client.open().await.unwrap();
    let mut session = server.accept().await;
    assert_eq!(next_event(&mut events).await, StreamEvent::Open);

    // Inbound stays open, only the client's sink is broken
    session.close_outbound();
    let key = ChannelKey::ticker("BTC-USDT");
    let (handler, _rx) = collector();
    let task = spawn_subscribe(&client, key.clone(), &handler);

    assert_eq!(next_event(&mut events).await, StreamEvent::Close);
    assert!(matches!(
        next_event(&mut events).await,
        StreamEvent::Reconnecting { attempt: 1, .. }
    ));

    let mut session = server.accept().await;
    let frame = session.next_frame().await;
    assert_eq!(frame["op"], "subscribe");
    assert_eq!(frame["channel"], "ticker");
    session.ack(&frame);
    assert!(task.await.unwrap().is_ok());

    let subscriptions = client.subscriptions().await.unwrap();
    assert_eq!(subscriptions[0].key, key);
    assert_eq!(subscriptions[0].state, SubscriptionState::Active);

    // A later subscribe on the same key does not join a dead request
    let (other, _other_rx) = collector();
    client.subscribe(key, &other).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_before_open_is_not_connected() {
    let (connector, _server) = mock_transport();
    let client = StreamClient::with_connector(connector, &stream_config());
    let (handler, _rx) = collector();

    let result = client.subscribe(ChannelKey::order(), &handler).await;
    assert_eq!(result, Err(ExchangeError::NotConnected));
    assert!(client.subscriptions().await.unwrap().is_empty());
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_replays_active_subscriptions_in_order() {
    let (connector, mut server) = mock_transport();
    let client = StreamClient::with_connector(connector, &stream_config());
    let mut events = client.events();

    client.open().await.unwrap();
    let mut session = server.accept().await;
    assert_eq!(next_event(&mut events).await, StreamEvent::Open);

    let ticker = ChannelKey::ticker("BTC-USDT");
    let orderbook = ChannelKey::orderbook("ETH-USDT", "1E-2");
    let (ticker_handler, mut ticker_rx) = collector();
    let (book_handler, mut book_rx) = collector();
    subscribe_acked(&client, &mut session, ticker.clone(), &ticker_handler).await;
    subscribe_acked(&client, &mut session, orderbook.clone(), &book_handler).await;

    session.disconnect();
    assert_eq!(next_event(&mut events).await, StreamEvent::Close);
    assert_eq!(
        next_event(&mut events).await,
        StreamEvent::Reconnecting {
            attempt: 1,
            delay: Duration::from_millis(100)
        }
    );

    let mut session = server.accept().await;
    assert_eq!(next_event(&mut events).await, StreamEvent::Open);

    let first = session.next_frame().await;
    let second = session.next_frame().await;
    assert_eq!(first["channel"], "ticker");
    assert_eq!(second["channel"], "orderbook");
    assert_eq!(second["params"]["precision"], "1E-2");
    session.ack(&first);
    session.ack(&second);

    session.data("ticker", json!({"trading_pair_id": "BTC-USDT"}), json!({"last": "1"}));
    session.data(
        "orderbook",
        json!({"trading_pair_id": "ETH-USDT", "precision": "1E-2"}),
        json!({"bids": []}),
    );
    assert_eq!(next_message(&mut ticker_rx).await.key, ticker);
    assert_eq!(next_message(&mut book_rx).await.key, orderbook);

    let subscriptions = client.subscriptions().await.unwrap();
    assert!(subscriptions
        .iter()
        .all(|info| info.state == SubscriptionState::Active));
}

#[tokio::test(start_paused = true)]
async fn test_rejected_replay_emits_subscription_failed() {
    let (connector, mut server) = mock_transport();
    let client = StreamClient::with_connector(connector, &stream_config());
    client.open().await.unwrap();
    let mut session = server.accept().await;

    let key = ChannelKey::public_loan("USDT");
    let (handler, _rx) = collector();
    subscribe_acked(&client, &mut session, key.clone(), &handler).await;

    let mut events = client.events();
    session.disconnect();
    let mut session = server.accept().await;

    let replay = session.next_frame().await;
    session.reject(&replay, "channel unavailable");

    loop {
        match next_event(&mut events).await {
            StreamEvent::SubscriptionFailed { key: failed, reason } => {
                assert_eq!(failed, key);
                assert!(reason.contains("channel unavailable"));
                break;
            }
            _ => continue,
        }
    }

    let subscriptions = client.subscriptions().await.unwrap();
    assert_eq!(subscriptions[0].state, SubscriptionState::Failed);
    assert_eq!(subscriptions[0].handler_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_while_reconnecting_is_sent_after_reopen() {
    let (client, _connector, mut server, mut session) = connected().await;
    let existing = ChannelKey::ticker("BTC-USDT");
    let (handler, _rx) = collector();
    subscribe_acked(&client, &mut session, existing, &handler).await;

    let mut state = client.watch_state();
    session.disconnect();
    state
        .wait_for(|state| *state == ConnectionState::Reconnecting)
        .await
        .unwrap();

    let task = spawn_subscribe(&client, ChannelKey::public_trade("BTC-USDT"), &handler);

    let mut session = server.accept().await;
    let mut channels = Vec::new();
    for _ in 0..2 {
        let frame = session.next_frame().await;
        channels.push(frame["channel"].as_str().unwrap().to_string());
        session.ack(&frame);
    }
    channels.sort();
    assert_eq!(channels, vec!["public_trade", "ticker"]);
    assert!(task.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_reconnect_fails_subscriptions() {
    let (connector, mut server) = mock_transport();
    let mut config = stream_config();
    config.reconnect.max_attempts = 2;
    let client = StreamClient::with_connector(connector.clone(), &config);
    client.open().await.unwrap();
    let mut session = server.accept().await;

    let key = ChannelKey::ticker("BTC-USDT");
    let (handler, _rx) = collector();
    subscribe_acked(&client, &mut session, key.clone(), &handler).await;

    let mut events = client.events();
    connector.refuse(true);
    session.disconnect();

    assert_eq!(next_event(&mut events).await, StreamEvent::Close);
    assert_eq!(
        next_event(&mut events).await,
        StreamEvent::Reconnecting {
            attempt: 1,
            delay: Duration::from_millis(100)
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        StreamEvent::Reconnecting {
            attempt: 2,
            delay: Duration::from_millis(200)
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        StreamEvent::Error("reconnect attempts exhausted".to_string())
    );
    assert_eq!(
        next_event(&mut events).await,
        StreamEvent::SubscriptionFailed {
            key: key.clone(),
            reason: "reconnect attempts exhausted".to_string()
        }
    );

    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    let subscriptions = client.subscriptions().await.unwrap();
    assert_eq!(subscriptions[0].state, SubscriptionState::Failed);

    let (other, _other_rx) = collector();
    assert_eq!(
        client.subscribe(ChannelKey::order(), &other).await,
        Err(ExchangeError::NotConnected)
    );
}

#[tokio::test(start_paused = true)]
async fn test_close_is_terminal() {
    let (client, _connector, _server, mut session) = connected().await;
    let (handler, _rx) = collector();

    let pending = spawn_subscribe(&client, ChannelKey::order(), &handler);
    session.next_frame().await;

    client.close().await;
    assert_eq!(pending.await.unwrap(), Err(ExchangeError::Closed));
    assert_eq!(client.connection_state(), ConnectionState::Closed);

    assert_eq!(
        client.subscribe(ChannelKey::order(), &handler).await,
        Err(ExchangeError::Closed)
    );
    assert_eq!(client.open().await, Err(ExchangeError::Closed));
    assert!(matches!(
        client.subscriptions().await,
        Err(ExchangeError::Closed)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_unmatched_error_frame_emits_event() {
    let (client, _connector, _server, session) = connected().await;
    let mut events = client.events();

    session.push(json!({"error": "rate limited"}));
    assert_eq!(
        next_event(&mut events).await,
        StreamEvent::Error("rate limited".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn test_server_ping_is_answered() {
    let (_client, _connector, _server, mut session) = connected().await;

    session.push_raw(WireMessage::Ping(b"hb".to_vec()));
    assert_eq!(session.next_message().await, WireMessage::Pong(b"hb".to_vec()));
}

#[tokio::test(start_paused = true)]
async fn test_facade_loan_ticker_unsubscribe_uses_loan_channel() {
    let (connector, mut server) = mock_transport();
    let config = ExchangeConfig::new("http://127.0.0.1:1", "ws://127.0.0.1:1");
    let client = ExchangeClient::with_connector(&config, &stream_config(), connector).unwrap();
    client.open().await.unwrap();
    let mut session = server.accept().await;
    let (handler, _rx) = collector();

    let (result, frame) = tokio::join!(client.subscribe_loan_ticker("USDT", &handler), async {
        let frame = session.next_frame().await;
        session.ack(&frame);
        frame
    });
    result.unwrap();
    assert_eq!(frame["channel"], "loan_ticker");

    let (result, frame) = tokio::join!(client.unsubscribe_loan_ticker("USDT", &handler), async {
        let frame = session.next_frame().await;
        session.ack(&frame);
        frame
    });
    result.unwrap();
    assert_eq!(frame["op"], "unsubscribe");
    assert_eq!(frame["channel"], "loan_ticker");
    assert_eq!(frame["params"], json!({"currency_id": "USDT"}));
    assert!(client.subscriptions().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shared_orderbook_lifecycle() {
    let (client, _connector, _server, mut session) = connected().await;
    let key = ChannelKey::orderbook("BTC-USDT", "1E-1");
    let params = json!({"trading_pair_id": "BTC-USDT", "precision": "1E-1"});
    let (a, mut a_rx) = collector();
    let (b, mut b_rx) = collector();

    subscribe_acked(&client, &mut session, key.clone(), &a).await;
    client.subscribe(key.clone(), &b).await.unwrap();
    assert!(session.try_frame().is_none());

    session.data("orderbook", params.clone(), json!({"seq": 1}));
    assert_eq!(next_message(&mut a_rx).await.data["seq"], 1);
    assert_eq!(next_message(&mut b_rx).await.data["seq"], 1);

    client.unsubscribe(key.clone(), &a).await.unwrap();
    assert!(session.try_frame().is_none());

    session.data("orderbook", params.clone(), json!({"seq": 2}));
    assert_eq!(next_message(&mut b_rx).await.data["seq"], 2);
    assert!(a_rx.try_recv().is_err());

    let task = spawn_unsubscribe(&client, key, &b);
    let frame = session.next_frame().await;
    assert_eq!(frame["op"], "unsubscribe");
    assert_eq!(frame["params"], params);
    session.ack(&frame);
    assert!(task.await.unwrap().is_ok());
    assert!(session.try_frame().is_none());
}
