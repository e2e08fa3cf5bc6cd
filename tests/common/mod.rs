//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use http_gatekeeper::config::GatekeeperConfig;
use http_gatekeeper::http::{HttpServer, RequestHandler};
use http_gatekeeper::lifecycle::Shutdown;
use http_gatekeeper::net::ConnectionLimitingListener;

/// A server running on an ephemeral loopback port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub task: JoinHandle<()>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for the server to stop.
    #[allow(dead_code)]
    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server did not stop")
            .unwrap();
    }
}

/// Config bound to an ephemeral port with short timeouts.
pub fn test_config() -> GatekeeperConfig {
    let mut config = GatekeeperConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.timeouts.tick_millis = 50;
    config.timeouts.shutdown_grace_secs = 1;
    config
}

pub async fn start_server(config: GatekeeperConfig, handler: Arc<dyn RequestHandler>) -> TestServer {
    let listener = ConnectionLimitingListener::bind(&config.listener).await.unwrap();
    let addr = match listener.local_address().unwrap() {
        http_gatekeeper::net::SocketAddress::Inet(addr) => addr,
        other => panic!("unexpected listener address {other}"),
    };

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config.timeouts.clone(), handler);
    let server_shutdown = shutdown.clone();
    let task = tokio::spawn(async move {
        server.run(listener, server_shutdown).await.unwrap();
    });

    TestServer {
        addr,
        shutdown,
        task,
    }
}

/// A reqwest client that never reuses connections.
#[allow(dead_code)]
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Send a raw HTTP/1.1 request on `stream` and return the status line.
#[allow(dead_code)]
pub async fn raw_get(stream: &mut TcpStream, path: &str) -> String {
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut buf = vec![0u8; 1024];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("no response")
        .unwrap();
    let response = String::from_utf8_lossy(&buf[..n]);
    response.lines().next().unwrap_or_default().to_string()
}

/// Wait until the peer closes `stream`. Returns false on timeout.
#[allow(dead_code)]
pub async fn closed_by_peer(stream: &mut TcpStream, within: Duration) -> bool {
    let mut buf = [0u8; 64];
    loop {
        match tokio::time::timeout(within, stream.read(&mut buf)).await {
            Err(_) => return false,
            Ok(Ok(0)) | Ok(Err(_)) => return true,
            Ok(Ok(_)) => continue,
        }
    }
}
