//! DevTool Core - network event model and filter evaluation.
//!
//! This crate holds the data contracts shared by every part of DevTool:
//!
//! - [`NetworkEvent`] and its request/response payloads, decoded from the
//!   intercepting proxy's JSON with a locally minted id
//! - [`ProxyStatus`] reported by the proxy control plane
//! - [`NetworkFilters`] and the single [`matches`] evaluator used for both
//!   live traffic and session history
//! - [`EventBuffer`], the newest-first view the UI renders
//!
//! Nothing here performs I/O.

pub mod buffer;
pub mod error;
pub mod event;
pub mod filter;

pub use buffer::EventBuffer;
pub use error::DecodeError;
pub use event::{EventKind, Headers, NetworkEvent, ProxyStatus, RequestData, ResponseData};
pub use filter::{filter_events, matches, NetworkFilters};
