use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future;
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::listener::ListenerAddress;

/// Implemented once per ingress kind (SOCKS5, HTTP proxy, portal). Unlike a
/// generic byte-relay stub, `handle_connection` owns the full per-connection
/// lifecycle for that ingress.
#[async_trait]
pub trait ServiceType: Send + Sync + 'static {
    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr);
}

/// Binds one `ServiceType` implementation to one or more listen addresses
/// and drives its accept loop.
pub struct Service<A> {
    name: String,
    handler: Arc<A>,
    addresses: Vec<ListenerAddress>,
}

impl<A: ServiceType> Service<A> {
    pub fn new(name: &str, handler: A) -> Self {
        Service { name: name.to_string(), handler: Arc::new(handler), addresses: Vec::new() }
    }

    pub fn add_tcp_address(&mut self, address: impl Into<String>) {
        self.addresses.push(ListenerAddress::new(address));
    }

    pub fn addresses(&self) -> Vec<ListenerAddress> {
        self.addresses.clone()
    }

    /// Spawns one accept loop per bound address and waits for all of them
    /// (they normally run forever; this only returns on a bind failure or
    /// process shutdown).
    pub async fn start_service(self) {
        let name = self.name.clone();
        let handler = self.handler;
        let tasks = self.addresses.into_iter().map(|address| {
            let handler = handler.clone();
            let name = name.clone();
            tokio::spawn(async move { Self::run_accept_loop(name, address, handler).await })
        });
        future::join_all(tasks).await;
    }

    async fn run_accept_loop(name: String, address: ListenerAddress, handler: Arc<A>) {
        let listener = match address.bind().await {
            Ok(listener) => listener,
            Err(e) => {
                warn!(service = %name, address = %address.0, error = %e, "failed to bind listener");
                return;
            }
        };
        info!(service = %name, address = %address.0, "listening");
        loop {
            match listener.accept_stream().await {
                Ok((stream, peer)) => {
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        handler.handle_connection(stream, peer).await;
                    });
                }
                Err(e) => {
                    warn!(service = %name, error = %e, "failed to accept connection");
                }
            }
        }
    }
}
