//! Black-box end-to-end tests driving real loopback TCP connections
//! through the proxy engine.
//!
//! Each test stands up a fake upstream (a plain `tokio::net::TcpListener`
//! loop), wires a `Proxy` in front of it via `ProxyManager`, and drives
//! the admin-side `ToxicCollection` operations while a real client socket
//! talks through the bridge.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use toxiproxy::proxy::collection::ToxicEnvelope;
use toxiproxy::proxy::ProxyManager;
use toxiproxy::toxics::{Stream, ToxicRegistry};

async fn free_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().to_string()
}

fn manager() -> Arc<ProxyManager> {
    Arc::new(ProxyManager::new(Arc::new(ToxicRegistry::with_defaults()), Some(42)))
}

async fn proxy_client(manager: &ProxyManager, name: &str, upstream: &str) -> TcpStream {
    let listen = free_addr().await;
    let proxy = manager.create(name.to_string(), listen, upstream.to_string(), true).await.unwrap();
    let addr = proxy.local_addr().await.expect("proxy bound a local address");
    TcpStream::connect(addr).await.unwrap()
}

/// A bare pass-through chain; upstream lowercases whatever it receives.
async fn spawn_lowercasing_echo() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap_or(0);
            if n == 0 {
                let _ = socket.shutdown().await;
                return;
            }
            let lower: Vec<u8> = buf[..n].iter().map(|b| b.to_ascii_lowercase()).collect();
            if socket.write_all(&lower).await.is_err() {
                return;
            }
        }
    });
    addr
}

#[tokio::test]
async fn empty_chain_passes_bytes_through_unchanged() {
    let mgr = manager();
    let upstream = spawn_lowercasing_echo().await;
    let mut client = proxy_client(&mgr, "lowercaser", &upstream).await;

    client.write_all(b"ABC").await.unwrap();
    let mut buf = [0u8; 3];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"abc");
}

/// An upstream that echoes verbatim, half-closing its own write side as
/// soon as it sees EOF from the client, and signals the instant it
/// observed that EOF.
async fn spawn_eof_signalling_echo() -> (String, oneshot::Receiver<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => {
                    let _ = tx.send(());
                    let _ = socket.shutdown().await;
                    return;
                }
                Ok(n) => {
                    if socket.write_all(&buf[..n]).await.is_err() {
                        return;
                    }
                }
            }
        }
    });
    (addr, rx)
}

/// A `slow_close` toxic on the downstream link keeps the
/// client-facing half open for `delay` ms after the upstream closes.
#[tokio::test]
async fn slow_close_delays_downstream_teardown() {
    let mgr = manager();
    let (upstream, eof_signal) = spawn_eof_signalling_echo().await;
    let listen = free_addr().await;
    let proxy = mgr.create("slow-downstream".into(), listen, upstream, true).await.unwrap();
    proxy
        .toxics
        .add(ToxicEnvelope {
            name: Some("sc".into()),
            kind: "slow_close".into(),
            stream: Stream::Downstream,
            toxicity: 1.0,
            attributes: serde_json::json!({"delay": 400}),
        })
        .await
        .unwrap();

    let addr = proxy.local_addr().await.unwrap();
    let mut client = TcpStream::connect(addr).await.unwrap();

    let start = Instant::now();
    client.shutdown().await.unwrap();

    // Upstream observes EOF quickly, well before the slow_close delay.
    tokio::time::timeout(Duration::from_millis(200), eof_signal)
        .await
        .expect("upstream should see EOF promptly")
        .unwrap();

    // The downstream link should still be readable (i.e. not yet EOF)
    // immediately after upstream closed.
    let mut probe = [0u8; 1];
    let immediate = tokio::time::timeout(Duration::from_millis(50), client.read(&mut probe)).await;
    assert!(immediate.is_err(), "downstream closed before the slow_close delay elapsed");

    // But it does close, once the delay has elapsed.
    let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut probe))
        .await
        .expect("downstream should close once the slow_close delay elapses")
        .unwrap();
    assert_eq!(n, 0);
    assert!(start.elapsed() >= Duration::from_millis(350));
}

/// A plain byte-for-byte echo with no case transformation, used by the
/// tests below that only care about flow/teardown, not content.
async fn spawn_plain_echo() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => {
                    let _ = socket.shutdown().await;
                    return;
                }
                Ok(n) => {
                    if socket.write_all(&buf[..n]).await.is_err() {
                        return;
                    }
                }
            }
        }
    });
    addr
}

/// A `timeout` toxic swallows data and, past its deadline, tears
/// the pipeline down — which cascades through the real upstream (EOF on
/// its read causes it to close its own write side) back into a clean
/// EOF on the client's socket.
#[tokio::test]
async fn timeout_closes_the_connection_after_its_deadline() {
    let mgr = manager();
    let upstream = spawn_plain_echo().await;
    let listen = free_addr().await;
    let proxy = mgr.create("swallower".into(), listen, upstream, true).await.unwrap();
    proxy
        .toxics
        .add(ToxicEnvelope {
            name: Some("to".into()),
            kind: "timeout".into(),
            stream: Stream::Upstream,
            toxicity: 1.0,
            attributes: serde_json::json!({"timeout": 150}),
        })
        .await
        .unwrap();

    let addr = proxy.local_addr().await.unwrap();
    let mut client = TcpStream::connect(addr).await.unwrap();

    let start = Instant::now();
    client.write_all(b"hello").await.unwrap();

    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
        .await
        .expect("connection should close within the test deadline")
        .unwrap();
    assert_eq!(n, 0, "client should observe a clean EOF once the timeout fires");
    assert!(start.elapsed() >= Duration::from_millis(130));
}

/// Adding a toxic to a live, flowing stream never loses or
/// duplicates a byte.
#[tokio::test]
async fn add_under_load_preserves_every_byte() {
    let mgr = manager();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = listener.local_addr().unwrap().to_string();
    let (received_tx, received_rx) = oneshot::channel();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        let mut buf = vec![0u8; 4096];
        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => received.extend_from_slice(&buf[..n]),
            }
        }
        let _ = received_tx.send(received);
    });

    let listen = free_addr().await;
    let proxy = mgr.create("under-load".into(), listen, upstream_addr, true).await.unwrap();
    let addr = proxy.local_addr().await.unwrap();
    let mut client = TcpStream::connect(addr).await.unwrap();

    let toxics = proxy.toxics.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(15)).await;
        let _ = toxics
            .add(ToxicEnvelope {
                name: Some("lag".into()),
                kind: "latency".into(),
                stream: Stream::Upstream,
                toxicity: 1.0,
                attributes: serde_json::json!({"latency": 5, "jitter": 2}),
            })
            .await;
    });

    let mut expected = Vec::new();
    for i in 0..200u32 {
        let chunk: Vec<u8> = (0..32).map(|j| ((i + j) % 256) as u8).collect();
        client.write_all(&chunk).await.unwrap();
        expected.extend_from_slice(&chunk);
        if i % 20 == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
    client.shutdown().await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), received_rx)
        .await
        .expect("upstream should finish receiving well within the test deadline")
        .unwrap();
    assert_eq!(received.len(), expected.len());
    assert_eq!(received, expected);
}

/// `reset()` with toxics installed restores every live link to a
/// bare pass-through chain.
#[tokio::test]
async fn reset_restores_plain_pass_through() {
    let mgr = manager();
    let upstream = spawn_plain_echo().await;
    let listen = free_addr().await;
    let proxy = mgr.create("resettable".into(), listen, upstream, true).await.unwrap();

    for (name, stream) in [("lag", Stream::Upstream), ("bw", Stream::Downstream), ("slicer", Stream::Downstream)] {
        proxy
            .toxics
            .add(ToxicEnvelope {
                name: Some(name.into()),
                kind: match name {
                    "lag" => "latency",
                    "bw" => "bandwidth",
                    _ => "slicer",
                }
                .into(),
                stream,
                toxicity: 1.0,
                attributes: serde_json::json!({"latency": 300, "rate": 1, "average_size": 4}),
            })
            .await
            .unwrap();
    }
    assert_eq!(proxy.toxics.list().await.len(), 3);

    let addr = proxy.local_addr().await.unwrap();
    let mut client = TcpStream::connect(addr).await.unwrap();
    // Give the accept loop time to bridge the connection and start the
    // link with the three toxics snapshotted above, so `reset()` below
    // exercises the live hot-swap path rather than just clearing state
    // no connection has seen yet.
    tokio::time::sleep(Duration::from_millis(50)).await;

    proxy.toxics.reset().await;
    assert!(proxy.toxics.list().await.is_empty());

    let start = Instant::now();
    client.write_all(b"fast now").await.unwrap();
    let mut buf = [0u8; 8];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"fast now");
    assert!(start.elapsed() < Duration::from_millis(250), "post-reset chain should be bare pass-through, not the old 300ms latency");
}
