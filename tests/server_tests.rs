//! Integration tests for the inference server
//!
//! Each test binds a real TCP listener on an ephemeral port, drives it with
//! raw socket clients, and shuts it down explicitly. The simulated engine
//! delay is turned down so the suite stays fast.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use npud::config::ServerConfig;
use npud::diag::{self, NpuCapabilities};
use npud::engine::{EngineState, InferenceEngine};
use npud::frame::{read_frame, write_frame};
use npud::server::NpuServer;

/// Test config: loopback, ephemeral port, fast simulated engine
fn test_config() -> ServerConfig {
    ServerConfig {
        bind_addr: "127.0.0.1".to_string(),
        port: 0,
        simulated_output_elems: 50,
        simulated_delay: Duration::from_millis(20),
        ..ServerConfig::default()
    }
}

/// Bind a server, spawn its accept loop, and return the bound address plus
/// a shutdown trigger
async fn start_server(config: ServerConfig) -> (SocketAddr, oneshot::Sender<()>, JoinHandle<()>) {
    let caps = diag::probe();
    let engine = Arc::new(InferenceEngine::from_config(&config, &caps));
    let server = NpuServer::bind(config, engine).await.unwrap();
    let addr = server.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn(server.serve_with_shutdown(async move {
        let _ = shutdown_rx.await;
    }));

    (addr, shutdown_tx, handle)
}

/// One full exchange: connect, send a request frame, read the response frame
async fn roundtrip(addr: SocketAddr, payload: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    write_frame(&mut stream, payload).await.unwrap();
    read_frame(&mut stream).await.unwrap()
}

/// With no model path, every request gets a fixed-length simulated response
#[tokio::test]
async fn test_simulated_mode_fixed_length_response() {
    let (addr, shutdown, handle) = start_server(test_config()).await;

    let response = roundtrip(addr, b"some input bytes").await;
    assert_eq!(response.len(), 50 * 4);

    let _ = shutdown.send(());
    handle.await.unwrap();
}

/// Simulated responses are not cached: identical requests get different bytes
#[tokio::test]
async fn test_simulated_mode_no_idempotence() {
    let (addr, shutdown, handle) = start_server(test_config()).await;

    let first = roundtrip(addr, b"identical").await;
    let second = roundtrip(addr, b"identical").await;
    assert_eq!(first.len(), second.len());
    assert_ne!(first, second);

    let _ = shutdown.send(());
    handle.await.unwrap();
}

/// An invalid model path is not startup-fatal; the server runs simulated
#[tokio::test]
async fn test_invalid_model_path_still_serves() {
    let config = ServerConfig {
        model_path: Some(PathBuf::from("/nonexistent/model.rknn")),
        ..test_config()
    };

    let caps = diag::probe();
    let engine = Arc::new(InferenceEngine::from_config(&config, &caps));
    assert_eq!(engine.state(), EngineState::Simulated);

    let server = NpuServer::bind(config, engine).await.unwrap();
    let addr = server.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn(server.serve_with_shutdown(async move {
        let _ = shutdown_rx.await;
    }));

    let response = roundtrip(addr, b"payload").await;
    assert_eq!(response.len(), 50 * 4);

    let _ = shutdown_tx.send(());
    handle.await.unwrap();
}

/// A declared length of 0 is a valid request and gets a well-formed
/// response, never a hang
#[tokio::test]
async fn test_zero_length_request() {
    let (addr, shutdown, handle) = start_server(test_config()).await;

    let response = roundtrip(addr, &[]).await;
    assert_eq!(response.len(), 50 * 4);

    let _ = shutdown.send(());
    handle.await.unwrap();
}

/// A client that declares N bytes but closes early gets no response frame
#[tokio::test]
async fn test_truncated_body_gets_no_response() {
    let (addr, shutdown, handle) = start_server(test_config()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    // Header promises 100 bytes, only 10 arrive.
    tokio::io::AsyncWriteExt::write_all(&mut stream, &100u32.to_le_bytes())
        .await
        .unwrap();
    tokio::io::AsyncWriteExt::write_all(&mut stream, &[0u8; 10])
        .await
        .unwrap();
    tokio::io::AsyncWriteExt::shutdown(&mut stream).await.unwrap();

    // The server aborts the connection without writing anything, so the
    // read side sees EOF or a reset, never a frame.
    assert!(read_frame(&mut stream).await.is_err());

    let _ = shutdown.send(());
    handle.await.unwrap();
}

/// Concurrent clients each get exactly one well-formed response, and the
/// engine critical section keeps inference executions from overlapping
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_connections() {
    const CLIENTS: usize = 8;
    let (addr, shutdown, handle) = start_server(test_config()).await;

    let start = Instant::now();
    let mut clients = Vec::new();
    for i in 0..CLIENTS {
        clients.push(tokio::spawn(async move {
            let payload = vec![i as u8; 512];
            let mut stream = TcpStream::connect(addr).await.unwrap();
            write_frame(&mut stream, &payload).await.unwrap();

            let response = read_frame(&mut stream).await.unwrap();
            assert_eq!(response.len(), 50 * 4);

            // Exactly one response per connection: the next read is EOF.
            let mut probe = [0u8; 1];
            assert_eq!(stream.read(&mut probe).await.unwrap(), 0);
        }));
    }
    for client in clients {
        client.await.unwrap();
    }

    // 8 requests x 20ms simulated delay, serialized by the engine mutex.
    assert!(start.elapsed() >= Duration::from_millis(CLIENTS as u64 * 20));

    let _ = shutdown.send(());
    handle.await.unwrap();
}

/// Past the configured worker capacity, connections are rejected without a
/// response frame
#[tokio::test]
async fn test_capacity_rejection() {
    let config = ServerConfig {
        max_connections: 1,
        simulated_delay: Duration::from_millis(500),
        ..test_config()
    };
    let (addr, shutdown, handle) = start_server(config).await;

    // First client occupies the only worker slot.
    let mut busy = TcpStream::connect(addr).await.unwrap();
    write_frame(&mut busy, b"slow request").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Second client is rejected: closed without a frame.
    let mut rejected = TcpStream::connect(addr).await.unwrap();
    let _ = write_frame(&mut rejected, b"over capacity").await;
    assert!(read_frame(&mut rejected).await.is_err());

    // The in-flight client still completes normally.
    let response = read_frame(&mut busy).await.unwrap();
    assert_eq!(response.len(), 50 * 4);

    let _ = shutdown.send(());
    handle.await.unwrap();
}

/// A bind failure must not leak the engine: the model resource is
/// released (via Drop) before the process gets a chance to exit
#[tokio::test]
async fn test_bind_failure_releases_engine() {
    // A model file and capabilities that look like a real NPU host, so the
    // engine holds a live hardware handle rather than the simulated stub.
    let model_path = std::env::temp_dir()
        .join(format!("npud-test-bind-{}.rknn", uuid::Uuid::now_v7()));
    std::fs::write(&model_path, vec![0xC3u8; 256]).unwrap();
    let caps = NpuCapabilities {
        render_nodes: vec![PathBuf::from("/dev/dri/renderD128")],
        kernel_module_loaded: Some(true),
        driver_version: None,
    };

    // Occupy a port so the server's bind fails.
    let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = ServerConfig {
        bind_addr: "127.0.0.1".to_string(),
        port: occupied.local_addr().unwrap().port(),
        model_path: Some(model_path.clone()),
        ..ServerConfig::default()
    };

    let engine = Arc::new(InferenceEngine::from_config(&config, &caps));
    assert_eq!(engine.state(), EngineState::Initialized);

    let weak = Arc::downgrade(&engine);
    assert!(NpuServer::bind(config, engine).await.is_err());

    // The failed bind dropped the last strong reference, which released
    // the model handle through its Drop impl.
    assert!(weak.upgrade().is_none());

    std::fs::remove_file(&model_path).unwrap();
}

/// Workers still running at the drain deadline are abandoned: shutdown
/// returns at roughly the window, not after the slow request
#[tokio::test]
async fn test_drain_window_abandons_slow_workers() {
    let config = ServerConfig {
        drain_timeout: Duration::from_millis(100),
        simulated_delay: Duration::from_secs(2),
        ..test_config()
    };
    let (addr, shutdown, handle) = start_server(config).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    write_frame(&mut stream, b"very slow request").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let shutdown_at = Instant::now();
    let _ = shutdown.send(());
    handle.await.unwrap();
    assert!(
        shutdown_at.elapsed() < Duration::from_secs(1),
        "server waited past the drain window"
    );

    // The abandoned worker never produced a response frame.
    assert!(read_frame(&mut stream).await.is_err());
}

/// Shutdown drains an in-flight request before the server task finishes
#[tokio::test]
async fn test_graceful_drain_completes_in_flight_request() {
    let config = ServerConfig {
        simulated_delay: Duration::from_millis(200),
        ..test_config()
    };
    let (addr, shutdown, handle) = start_server(config).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    write_frame(&mut stream, b"in flight").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Interrupt while the request is still inside the engine.
    let _ = shutdown.send(());

    let response = read_frame(&mut stream).await.unwrap();
    assert_eq!(response.len(), 50 * 4);

    handle.await.unwrap();
}
