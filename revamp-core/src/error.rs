use std::io;

/// Errors surfaced by the networking primitives (listener bind/accept, server
/// bootstrap). Request-level failures live in `revamp-proxy`'s own error
/// taxonomy; this type only covers the plumbing this crate owns.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("failed to bind listener on {address}: {source}")]
    Bind { address: String, source: io::Error },

    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    #[error("address could not be resolved: {0}")]
    UnresolvedAddress(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
