//! The shared membership registry: the contract the reconciliation engine
//! speaks, and the concrete drivers behind it.

mod consul;
mod etcd;
mod http;

pub use crate::{
    consul::ConsulBackend,
    etcd::EtcdBackend,
    http::{BasicAuth, HttpBackend},
};

use shared::Peer;
use thiserror::Error;

/// The `User-Agent` drivers send on every request they make.
pub(crate) fn user_agent() -> String {
    format!("wirey/{}", env!("CARGO_PKG_VERSION"))
}

/// A membership registry for one or more tunnels.
///
/// The driver is selected once at startup and the engine only ever sees
/// this contract, so new drivers require no engine changes. Upserts are
/// last-writer-wins; no compare-and-set is expected of a driver.
pub trait Backend {
    /// Upsert `peer` into the registry under `ifname`.
    fn join(&self, ifname: &str, peer: &Peer) -> Result<(), BackendError>;

    /// Every peer currently registered under `ifname`, in arbitrary order.
    fn get_peers(&self, ifname: &str) -> Result<Vec<Peer>, BackendError>;
}

/// Errors surfaced by registry drivers. All of them are transient from the
/// engine's point of view and go through its retry policy.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request error during {operation}: {source}")]
    Request {
        operation: &'static str,
        #[source]
        source: Box<ureq::Error>,
    },

    #[error("the {operation} request gave an unexpected status code: {status}")]
    Status { operation: &'static str, status: u16 },

    #[error("error decoding peers: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid base64 payload from the store: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("no registry endpoints configured")]
    NoEndpoints,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Split a `ureq` failure into the transport and status-code cases.
pub(crate) fn classify(operation: &'static str, error: ureq::Error) -> BackendError {
    match error {
        ureq::Error::Status(status, _) => BackendError::Status { operation, status },
        transport => BackendError::Request {
            operation,
            source: Box::new(transport),
        },
    }
}
