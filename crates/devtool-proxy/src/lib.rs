//! DevTool Proxy - supervision and control of the intercepting proxy.
//!
//! This crate drives an external intercepting-proxy process and ingests the
//! traffic it captures.
//!
//! ## Features
//!
//! - Launches and terminates the bundled proxy binary
//! - Talks to the proxy's HTTP control plane (status, filters, sessions)
//! - Caches proxy-owned state for non-blocking reads
//! - Streams captured events over WebSocket with reconnect
//! - Installs the proxy CA certificate into the user trust store
//!
//! ## Architecture
//!
//! ```text
//! ProxySupervisor ──spawn──► proxy-inspector -proxy :8888 -api :9999
//!                                    │              │
//!                 ControlClient ◄────┤ HTTP         │
//!                 (FilterCache,      │              │
//!                  StatusCache)      │              │
//!                                    │              │
//!                 LiveStream ◄───────┘ ws://…/ws    │
//!                     │                             │
//!                     ▼                             │
//!          subscribers (filtered by devtool-core)   │
//!                                                   │
//!          CertificateInstaller ◄── GET /proxy/cert ┘
//! ```

pub mod cache;
pub mod certificate;
pub mod control;
mod error;
pub mod readiness;
pub mod stream;
pub mod supervisor;

#[cfg(test)]
mod test_support;

pub use cache::{FilterCache, StatusCache};
pub use certificate::{CertificateInstaller, SystemTrustStore, TrustStore};
pub use control::{ControlClient, DEFAULT_HOST, DEFAULT_REQUEST_TIMEOUT};
pub use error::{
    CertificateError, ControlError, DecodeError, Error, Result, StreamError, SupervisorError,
};
pub use readiness::{wait_until_ready, Backoff};
pub use stream::{LiveStream, ReconnectPolicy, StreamState, StreamStatus};
pub use supervisor::{
    default_resource_dir, ExitRecord, ProxyProcess, ProxySupervisor, SupervisorConfig,
    DEFAULT_API_PORT, DEFAULT_PROXY_PORT, PROXY_BINARY_NAME,
};
