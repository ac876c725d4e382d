use std::net::{SocketAddr as StdSocketAddr, ToSocketAddrs};

use tokio::net::{TcpListener, TcpStream};

use crate::error::{CoreError, CoreResult};

const LISTENER_BACKLOG: u32 = 4096;

/// A bind target for a service. Only TCP is needed: every ingress this
/// crate serves (SOCKS5, the HTTP proxy, the portal) speaks TCP.
#[derive(Clone, Debug)]
pub struct ListenerAddress(pub String);

impl ListenerAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub async fn bind(&self) -> CoreResult<Listener> {
        let socket_address = self
            .0
            .to_socket_addrs()
            .map_err(|_| CoreError::UnresolvedAddress(self.0.clone()))?
            .next()
            .ok_or_else(|| CoreError::UnresolvedAddress(self.0.clone()))?;

        let tcp_socket = match socket_address {
            StdSocketAddr::V4(_) => tokio::net::TcpSocket::new_v4(),
            StdSocketAddr::V6(_) => tokio::net::TcpSocket::new_v6(),
        }
        .map_err(|source| CoreError::Bind { address: self.0.clone(), source })?;

        tcp_socket
            .set_reuseaddr(true)
            .map_err(|source| CoreError::Bind { address: self.0.clone(), source })?;
        tcp_socket
            .bind(socket_address)
            .map_err(|source| CoreError::Bind { address: self.0.clone(), source })?;
        let listener = tcp_socket
            .listen(LISTENER_BACKLOG)
            .map_err(|source| CoreError::Bind { address: self.0.clone(), source })?;

        Ok(Listener { inner: listener })
    }
}

/// A bound, listening socket ready to accept downstream connections.
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    pub async fn accept_stream(&self) -> CoreResult<(TcpStream, StdSocketAddr)> {
        self.inner.accept().await.map_err(CoreError::Accept)
    }
}
