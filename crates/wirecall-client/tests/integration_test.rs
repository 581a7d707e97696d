//! End-to-end tests: real servers on ephemeral ports, real clients, and the
//! registry in between.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use wirecall_client::{BalancedClient, Client, Discovery, RegistryDiscovery, SelectMode, StaticDiscovery};
use wirecall_common::codec::{CodecRegistry, JSON_TYPE};
use wirecall_common::error::WirecallError;
use wirecall_common::protocol::ConnectOptions;
use wirecall_registry::{heartbeat, Registry};
use wirecall_server::{Server, Service};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct SumArgs {
    a: i64,
    b: i64,
}

fn arith_service() -> Service {
    Service::builder("T", ())
        .method("Sum", |_: &(), args: SumArgs, reply: &mut i64| {
            *reply = args.a + args.b;
            Ok(())
        })
        .method("Div", |_: &(), args: SumArgs, reply: &mut i64| {
            if args.b == 0 {
                return Err("divide by zero".into());
            }
            *reply = args.a / args.b;
            Ok(())
        })
        .method("Nap", |_: &(), ms: u64, reply: &mut u64| {
            std::thread::sleep(Duration::from_millis(ms));
            *reply = ms;
            Ok(())
        })
        .build()
}

fn init_logging() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

async fn start_server(service: Service) -> String {
    init_logging();
    let server = Server::new();
    server.register(service).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(Arc::new(server).serve(listener));
    addr
}

#[tokio::test]
async fn test_sum_end_to_end() {
    let addr = start_server(arith_service()).await;
    let client = Client::dial(&addr, ConnectOptions::default()).await.unwrap();

    let sum: i64 = client.call("T.Sum", &SumArgs { a: 3, b: 4 }).await.unwrap();
    assert_eq!(sum, 7);
}

#[tokio::test]
async fn test_sum_end_to_end_with_json_codec() {
    let addr = start_server(arith_service()).await;
    let opts = ConnectOptions::default().with_codec(JSON_TYPE);
    let client = Client::dial(&addr, opts).await.unwrap();

    let sum: i64 = client.call("T.Sum", &SumArgs { a: 40, b: 2 }).await.unwrap();
    assert_eq!(sum, 42);
}

#[tokio::test]
async fn test_method_error_reaches_caller_and_connection_survives() {
    let addr = start_server(arith_service()).await;
    let client = Client::dial(&addr, ConnectOptions::default()).await.unwrap();

    let err = client
        .call::<_, i64>("T.Div", &SumArgs { a: 1, b: 0 })
        .await
        .unwrap_err();
    assert!(matches!(&err, WirecallError::Remote(msg) if msg == "divide by zero"));

    let quotient: i64 = client.call("T.Div", &SumArgs { a: 8, b: 2 }).await.unwrap();
    assert_eq!(quotient, 4);
}

#[tokio::test]
async fn test_unresolvable_names_come_back_as_remote_errors() {
    let addr = start_server(arith_service()).await;
    let client = Client::dial(&addr, ConnectOptions::default()).await.unwrap();
    let args = SumArgs { a: 1, b: 2 };

    let err = client.call::<_, i64>("Nope.Sum", &args).await.unwrap_err();
    assert!(matches!(&err, WirecallError::Remote(msg) if msg.contains("can't find service")));

    let err = client.call::<_, i64>("T.Nope", &args).await.unwrap_err();
    assert!(matches!(&err, WirecallError::Remote(msg) if msg.contains("can't find method")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_call_times_out_fast_call_does_not() {
    let addr = start_server(arith_service()).await;
    let opts = ConnectOptions::default().with_handle_timeout(Duration::from_millis(100));
    let client = Client::dial(&addr, opts).await.unwrap();

    // slower than the handle timeout: the synthetic timeout error comes back
    let err = client.call::<_, u64>("T.Nap", &400u64).await.unwrap_err();
    match &err {
        WirecallError::Remote(msg) => {
            assert!(msg.contains("request handle timeout"), "got: {msg}");
            assert!(msg.contains("100ms"), "got: {msg}");
        }
        other => panic!("expected remote timeout error, got {other:?}"),
    }

    // faster than the handle timeout: the method's actual result
    let reply: u64 = client.call("T.Nap", &10u64).await.unwrap();
    assert_eq!(reply, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_on_one_connection() {
    let addr = start_server(arith_service()).await;
    let client = Arc::new(Client::dial(&addr, ConnectOptions::default()).await.unwrap());

    let calls = (0..32).map(|i| {
        let client = Arc::clone(&client);
        async move {
            let sum: i64 = client
                .call("T.Sum", &SumArgs { a: i, b: 1000 })
                .await
                .unwrap();
            (i, sum)
        }
    });

    // every response decodes cleanly and matches its own request
    for (i, sum) in futures::future::join_all(calls).await {
        assert_eq!(sum, i + 1000);
    }
}

#[tokio::test]
async fn test_unregistered_codec_tag_aborts_connection() {
    let addr = start_server(arith_service()).await;

    // a codec the client knows but the server was never built with
    let mut codecs = CodecRegistry::empty();
    codecs.register("application/gob", || {
        wirecall_common::codec::BodyCodec::Json(wirecall_common::codec::JsonCodec)
    });
    let opts = ConnectOptions::default().with_codec("application/gob");
    let client = Client::dial_with(&addr, opts, &codecs).await.unwrap();

    // no response ever arrives; the call observes the closed connection
    let result = client.call::<_, i64>("T.Sum", &SumArgs { a: 1, b: 1 }).await;
    assert!(result.is_err());

    // the receive loop notices the hangup shortly after
    for _ in 0..50 {
        if client.is_closed() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(client.is_closed());
}

#[tokio::test]
async fn test_balanced_client_round_robin_hits_every_server() {
    let mut addrs = Vec::new();
    for id in 0..2u32 {
        let service = Service::builder("Who", ())
            .method("Id", move |_: &(), _: (), reply: &mut u32| {
                *reply = id;
                Ok(())
            })
            .build();
        addrs.push(start_server(service).await);
    }

    let balanced = BalancedClient::new(
        StaticDiscovery::new(addrs),
        SelectMode::RoundRobin,
        ConnectOptions::default(),
    );

    let mut seen = Vec::new();
    for _ in 0..4 {
        let id: u32 = balanced.call("Who.Id", &()).await.unwrap();
        seen.push(id);
    }
    // strict alternation over two servers, wherever the cursor started
    assert_eq!(seen[0], seen[2]);
    assert_eq!(seen[1], seen[3]);
    assert_ne!(seen[0], seen[1]);

    balanced.close().await;
}

#[tokio::test]
async fn test_registry_backed_discovery_end_to_end() {
    let registry = Arc::new(Registry::new(Duration::from_secs(5)));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let registry_url = format!(
        "http://{}{}",
        listener.local_addr().unwrap(),
        wirecall_registry::DEFAULT_PATH
    );
    tokio::spawn(Arc::clone(&registry).serve(listener));

    let mut addrs = Vec::new();
    for _ in 0..2 {
        let addr = start_server(arith_service()).await;
        heartbeat(registry_url.clone(), addr.clone(), Some(Duration::from_secs(1))).await;
        addrs.push(addr);
    }

    let discovery = RegistryDiscovery::new(registry_url, None);
    discovery.refresh().await.unwrap();

    let mut known = discovery.get_all();
    known.sort();
    addrs.sort();
    assert_eq!(known, addrs);

    let balanced = BalancedClient::new(discovery, SelectMode::RoundRobin, ConnectOptions::default());
    for i in 0..4 {
        let sum: i64 = balanced.call("T.Sum", &SumArgs { a: i, b: i }).await.unwrap();
        assert_eq!(sum, i + i);
    }
}
