//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use route_guard::http::HttpServer;
use route_guard::observability::metrics::{MetricsSink, Observation};
use route_guard::{AppConfig, GuardedRouter, Shutdown};
use tokio::net::TcpListener;

/// Sink keeping every observation in memory.
#[derive(Default)]
pub struct CapturingSink {
    observations: Mutex<Vec<Observation>>,
}

impl CapturingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[allow(dead_code)]
    pub fn observations(&self) -> Vec<Observation> {
        self.observations.lock().unwrap().clone()
    }

    #[allow(dead_code)]
    pub fn count(&self) -> usize {
        self.observations.lock().unwrap().len()
    }
}

impl MetricsSink for CapturingSink {
    fn observe(&self, observation: &Observation) {
        self.observations.lock().unwrap().push(observation.clone());
    }
}

/// Serve `routes` on an ephemeral port. Returns the bound address.
#[allow(dead_code)]
pub async fn spawn_server(routes: GuardedRouter, shutdown: &Shutdown) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut config = AppConfig::default();
    config.listener.bind_address = addr.to_string();

    let server = HttpServer::new(config, routes);
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    addr
}

/// Non-pooled client so each request opens its own connection.
#[allow(dead_code)]
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
