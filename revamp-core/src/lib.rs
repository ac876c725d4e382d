//! Networking primitives shared by every ingress the proxy exposes: address
//! binding, the accept-loop/service-handler pattern, bounded-size LRU
//! storage, and process shutdown-signal plumbing.

pub mod error;
pub mod listener;
pub mod server;
pub mod service;
pub mod sized_lru;

pub use error::{CoreError, CoreResult};
pub use listener::{Listener, ListenerAddress};
pub use server::{wait_for_shutdown_signal, ShutdownReason};
pub use service::{Service, ServiceType};
pub use sized_lru::{BoundedLruSet, SizedLru};
