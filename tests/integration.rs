// tests/integration.rs

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::time::timeout;

use krpc::{
    //
    build_error,
    build_query,
    build_response,
    byte_string,
    dict,
    encode,
    Dict,
    Krpc,
    KrpcConfig,
    MalformedReason,
    Message,
    QueryOptions,
    Result,
    RpcError,
    TransactionId,
    Value,
};

fn addr(s: &str) -> SocketAddr {
    s.parse().expect("bad socket address")
}

/// Issue a query whose outcomes land on the returned channel.
fn issue(krpc: &Krpc, options: QueryOptions) -> (TransactionId, UnboundedReceiver<Result<Dict>>) {
    // ---
    let (tx, rx) = unbounded_channel();
    let id = krpc.issue_query(options, move |outcome| {
        let _ = tx.send(outcome);
    });
    (id, rx)
}

async fn next(rx: &mut UnboundedReceiver<Result<Dict>>) -> Result<Dict> {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for callback")
        .expect("callback channel closed")
}

async fn wait_for_pending(krpc: &Krpc, expected: usize) {
    // ---
    timeout(Duration::from_secs(2), async {
        while krpc.pending_count() != expected {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("pending count never settled");
}

#[tokio::test]
async fn test_error_reply_reaches_pending_query() -> Result<()> {
    // ---
    init_logging();

    let krpc = Krpc::new(KrpcConfig::default())?;
    let (id, mut rx) = issue(&krpc, QueryOptions::new().no_timeout());

    let raw = Value::Dict(dict([
        ("t", byte_string(id.as_bytes())),
        ("y", byte_string("e")),
        ("e", Value::List(vec![Value::Int(123), byte_string("boom")])),
    ]));
    let message = krpc.parse(&encode(&raw)?, addr("9.9.9.9:4000"))?;
    assert!(matches!(message, Message::Error { .. }));

    match next(&mut rx).await {
        Err(RpcError::Peer(err)) => {
            assert_eq!(err.code, 123);
            assert_eq!(err.message, "boom");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(krpc.pending_count(), 1);

    Ok(())
}

#[tokio::test]
async fn test_query_times_out() -> Result<()> {
    // ---
    init_logging();

    let krpc = Krpc::new(KrpcConfig::default().with_default_timeout(Duration::from_millis(50)))?;
    let (_id, mut rx) = issue(&krpc, QueryOptions::new());
    assert_eq!(krpc.pending_count(), 1);

    assert!(matches!(next(&mut rx).await, Err(RpcError::Timeout)));
    assert_eq!(krpc.pending_count(), 0);

    // The listener is gone: the channel closes without further outcomes.
    assert!(timeout(Duration::from_secs(1), rx.recv()).await.unwrap().is_none());

    Ok(())
}

#[tokio::test]
async fn test_response_before_timeout_then_timeout() -> Result<()> {
    // ---
    let krpc = Krpc::new(KrpcConfig::default())?;
    let (id, mut rx) = issue(&krpc, QueryOptions::new().timeout(Duration::from_millis(100)));

    krpc.parse(
        &build_response(&id, dict([("id", byte_string("node"))]))?,
        addr("1.2.3.4:5"),
    )?;

    let result = next(&mut rx).await?;
    assert_eq!(result.get(&b"id"[..]), Some(&byte_string("node")));
    assert!(matches!(next(&mut rx).await, Err(RpcError::Timeout)));

    Ok(())
}

#[tokio::test]
async fn test_filters_ignore_other_senders() -> Result<()> {
    // ---
    let krpc = Krpc::new(KrpcConfig::default())?;
    let trusted = addr("10.0.0.1:6881");
    let (id, mut rx) = issue(&krpc, QueryOptions::new().filter_peer(trusted).no_timeout());

    let reply = |tag: &str| build_response(&id, dict([("tag", byte_string(tag))]));

    krpc.parse(&reply("wrong ip")?, addr("10.0.0.2:6881"))?;
    krpc.parse(&reply("wrong port")?, addr("10.0.0.1:6882"))?;
    krpc.parse(&reply("trusted")?, trusted)?;

    let result = next(&mut rx).await?;
    assert_eq!(result.get(&b"tag"[..]), Some(&byte_string("trusted")));

    Ok(())
}

#[tokio::test]
async fn test_every_reply_is_delivered_until_close() -> Result<()> {
    // ---
    let krpc = Krpc::new(KrpcConfig::default())?;
    let (id, mut rx) = issue(&krpc, QueryOptions::new().no_timeout());

    for n in 0..3 {
        krpc.parse(
            &build_response(&id, dict([("n", Value::Int(n))]))?,
            addr("1.1.1.1:1"),
        )?;
    }
    for n in 0..3 {
        let result = next(&mut rx).await?;
        assert_eq!(result.get(&b"n"[..]), Some(&Value::Int(n)));
    }
    assert_eq!(krpc.pending_count(), 1);

    krpc.close();
    wait_for_pending(&krpc, 0).await;

    // Disposed without a timeout callback.
    assert!(timeout(Duration::from_secs(1), rx.recv()).await.unwrap().is_none());

    Ok(())
}

#[tokio::test]
async fn test_colliding_ids_keep_both_listeners() -> Result<()> {
    // ---
    let krpc = Krpc::new(KrpcConfig::default())?;
    let id = krpc.issue_transaction_id();

    let (tx_a, mut rx_a) = unbounded_channel();
    let (tx_b, mut rx_b) = unbounded_channel();
    krpc.register(
        id.clone(),
        QueryOptions::new().no_timeout(),
        Some(Box::new(move |outcome: Result<Dict>| {
            let _ = tx_a.send(outcome);
        })),
    );
    krpc.register(
        id.clone(),
        QueryOptions::new().no_timeout(),
        Some(Box::new(move |outcome: Result<Dict>| {
            let _ = tx_b.send(outcome);
        })),
    );
    assert_eq!(krpc.pending_count(), 2);

    krpc.parse(&build_response(&id, Dict::new())?, addr("1.1.1.1:1"))?;

    assert!(next(&mut rx_a).await.is_ok());
    assert!(next(&mut rx_b).await.is_ok());

    Ok(())
}

#[tokio::test]
async fn test_query_handlers_see_inbound_queries() -> Result<()> {
    // ---
    let krpc = Krpc::new(KrpcConfig::default())?;
    let (tx, mut rx) = unbounded_channel();

    let generic = tx.clone();
    krpc.on_query(move |event| {
        let _ = generic.send(format!("any:{}", event.name));
        Ok(())
    });
    krpc.on_query_named("find_node", move |event| {
        let _ = tx.send(format!("named:{}", event.from));
        Ok(())
    });

    let id = krpc.issue_transaction_id();
    let args = dict([("target", byte_string([7u8; 20]))]);
    krpc.parse(&build_query(&id, "find_node", args)?, addr("5.5.5.5:55"))?;

    assert_eq!(rx.recv().await.as_deref(), Some("any:find_node"));
    assert_eq!(rx.recv().await.as_deref(), Some("named:5.5.5.5:55"));

    Ok(())
}

#[tokio::test]
async fn test_failing_handler_surfaces_as_foreign_error() -> Result<()> {
    // ---
    let krpc = Krpc::new(KrpcConfig::default())?;
    krpc.on_query(|_| Err("Tada!".into()));

    let id = krpc.issue_transaction_id();
    let err = krpc
        .parse(&build_query(&id, "ping", Dict::new())?, addr("1.1.1.1:1"))
        .expect_err("handler failure swallowed");

    assert!(err.is_foreign());
    assert!(!err.is_malformed());
    assert_eq!(
        std::error::Error::source(&err).map(ToString::to_string).as_deref(),
        Some("Tada!")
    );

    Ok(())
}

#[tokio::test]
async fn test_invalid_query_emits_parse_error() -> Result<()> {
    // ---
    let krpc = Krpc::new(KrpcConfig::default())?;
    let (tx, mut rx) = unbounded_channel();
    krpc.on_parse_error(move |event| {
        let _ = tx.send((event.transaction_id.clone(), event.reason.clone()));
        Ok(())
    });

    let raw = Value::Dict(dict([
        ("t", byte_string("aa")),
        ("y", byte_string("q")),
        ("q", byte_string("ping")),
    ]));
    let err = krpc
        .parse(&encode(&raw)?, addr("1.1.1.1:1"))
        .expect_err("query without arguments accepted");
    assert_eq!(err.malformed_reason(), Some(&MalformedReason::MissingArguments));

    let (id, reason) = rx.recv().await.expect("no parse_error event");
    assert_eq!(id.as_bytes(), b"aa");
    assert_eq!(reason, MalformedReason::MissingArguments);

    Ok(())
}

#[tokio::test]
async fn test_garbage_is_malformed() -> Result<()> {
    // ---
    let krpc = Krpc::new(KrpcConfig::default())?;

    let err = krpc
        .parse(b"this is not bencode", addr("1.1.1.1:1"))
        .expect_err("garbage accepted");
    assert!(err.is_malformed());

    let err = krpc
        .parse(
            &build_error(&krpc.issue_transaction_id(), 201, "x")?[..5],
            addr("1.1.1.1:1"),
        )
        .expect_err("truncated message accepted");
    assert!(err.is_malformed());

    Ok(())
}

#[cfg(feature = "logging")]
mod imp {
    use std::sync::Once;

    static INIT: Once = Once::new();

    pub fn init() {
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        });
    }
}

#[cfg(not(feature = "logging"))]
mod imp {
    #[inline]
    pub fn init() {}
}

pub fn init_logging() {
    imp::init();
}
