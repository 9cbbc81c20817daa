//! Network event model shared by the live stream and session history.
//!
//! Events arrive from the intercepting proxy as JSON objects with
//! snake_case field names. Decoding always mints a new [`NetworkEvent::id`];
//! identifiers on the wire are not trusted to be unique across reconnects.
//!
//! ## Wire format
//!
//! ```text
//! {
//!   "type": "request" | "response" | <other>,
//!   "src_ip": "10.0.0.4",
//!   "time": "12:00:01",
//!   "request":  { "method": "GET", "url": "...", "header": {..}, "body": ".." },
//!   "response": { "status": "200 OK", "status_code": 200, "header": {..}, "body": ".." }
//! }
//! ```
//!
//! A request and its response are not linked by a transaction id. Consumers
//! correlate them by adjacency in the stream.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::DecodeError;

/// Header map as delivered by the proxy: one name, many values.
pub type Headers = BTreeMap<String, Vec<String>>;

/// Discriminator of a captured event.
///
/// Unknown discriminators are preserved in [`EventKind::Other`] so newer
/// proxy builds do not break decoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// An outgoing request was captured.
    Request,
    /// A response was captured.
    Response,
    /// Any other event type.
    Other(String),
}

impl EventKind {
    /// Returns the wire representation.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Other(other) => other,
        }
    }
}

impl From<&str> for EventKind {
    fn from(value: &str) -> Self {
        match value {
            "request" => Self::Request,
            "response" => Self::Response,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(EventKind::from(raw.as_str()))
    }
}

/// Captured request payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestData {
    /// HTTP method exactly as captured.
    pub method: String,
    /// Absolute request URL.
    pub url: String,
    /// Request headers.
    #[serde(rename = "header", alias = "headers", default)]
    pub headers: Headers,
    /// Body as text, when the proxy could render it.
    #[serde(default)]
    pub body: Option<String>,
}

/// Captured response payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseData {
    /// Status line text, e.g. `200 OK`.
    #[serde(rename = "status", default)]
    pub status_text: String,
    /// Numeric status code.
    pub status_code: u16,
    /// Response headers.
    #[serde(rename = "header", alias = "headers", default)]
    pub headers: Headers,
    /// Body as text, when the proxy could render it.
    #[serde(default)]
    pub body: Option<String>,
}

/// Event exactly as it appears on the wire, before an id is minted.
#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    src_ip: Option<String>,
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    request: Option<RequestData>,
    #[serde(default)]
    response: Option<ResponseData>,
}

/// One captured transaction or transaction phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkEvent {
    /// Locally minted identifier, unique per decode.
    pub id: Uuid,
    /// Event discriminator (wire key `type`).
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Origin address of the traffic.
    pub src_ip: Option<String>,
    /// Capture time as reported by the proxy, if any.
    pub time: Option<String>,
    /// Request payload.
    pub request: Option<RequestData>,
    /// Response payload.
    pub response: Option<ResponseData>,
    /// When this process decoded the event.
    pub received_at: DateTime<Utc>,
}

impl NetworkEvent {
    /// Decodes one JSON-encoded event, minting a fresh id.
    pub fn from_wire(text: &str) -> Result<Self, DecodeError> {
        let wire: WireEvent = serde_json::from_str(text)?;
        Self::from_wire_event(wire)
    }

    /// Decodes an already parsed JSON value, minting a fresh id.
    pub fn from_wire_value(value: serde_json::Value) -> Result<Self, DecodeError> {
        let wire: WireEvent = serde_json::from_value(value)?;
        Self::from_wire_event(wire)
    }

    /// Decodes a JSON array of events (the session history payload).
    ///
    /// The whole payload fails if any element fails; history is a single
    /// response and a partial list would silently misrepresent it.
    pub fn decode_sessions(bytes: &[u8]) -> Result<Vec<Self>, DecodeError> {
        let wires: Vec<WireEvent> = serde_json::from_slice(bytes)?;
        wires.into_iter().map(Self::from_wire_event).collect()
    }

    fn from_wire_event(wire: WireEvent) -> Result<Self, DecodeError> {
        if wire.kind.is_empty() {
            return Err(DecodeError::EmptyType);
        }

        Ok(Self {
            id: Uuid::new_v4(),
            kind: EventKind::from(wire.kind.as_str()),
            src_ip: wire.src_ip,
            time: wire.time,
            request: wire.request,
            response: wire.response,
            received_at: Utc::now(),
        })
    }

    /// Returns true for request events.
    pub fn is_request(&self) -> bool {
        self.kind == EventKind::Request
    }

    /// Returns true for response events.
    pub fn is_response(&self) -> bool {
        self.kind == EventKind::Response
    }

    /// Request method, if a request payload is present.
    pub fn method(&self) -> Option<&str> {
        self.request.as_ref().map(|r| r.method.as_str())
    }

    /// Request URL, if a request payload is present.
    pub fn url(&self) -> Option<&str> {
        self.request.as_ref().map(|r| r.url.as_str())
    }

    /// Response status code, if a response payload is present.
    pub fn status_code(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status_code)
    }

    /// Destination host parsed from the request URL.
    ///
    /// Accepts absolute URLs and the authority form used by `CONNECT`
    /// (`example.com:443`). IPv6 hosts are returned without brackets.
    pub fn host(&self) -> Option<String> {
        let raw = self.url()?;

        match raw.split_once("://") {
            Some((_, rest)) => match url::Url::parse(raw) {
                Ok(url) => url.host().map(|host| match host {
                    url::Host::Ipv6(addr) => addr.to_string(),
                    other => other.to_string(),
                }),
                Err(_) => authority_host(rest),
            },
            None => authority_host(raw),
        }
    }

    /// One-line rendering used by list views.
    pub fn summary(&self) -> String {
        let mut parts = vec![self.kind.as_str().to_string()];

        if let Some(req) = &self.request {
            parts.push(format!("{} {}", req.method, req.url));
        }
        if let Some(resp) = &self.response {
            parts.push(format!("{} [{}]", resp.status_text, resp.status_code));
        }
        if let Some(src) = &self.src_ip {
            parts.push(format!("from {}", src));
        }

        parts.join(" ")
    }
}

/// Whether the proxy is actively intercepting.
///
/// Distinct from the supervised process running: the process can be alive
/// with interception disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProxyStatus {
    /// Interception enabled.
    pub enabled: bool,
}

/// Host part of `[userinfo@]host[:port][/path]`.
fn authority_host(raw: &str) -> Option<String> {
    let authority = raw.split(['/', '?', '#']).next()?;
    let authority = authority.rsplit('@').next()?;

    let host = match authority.strip_prefix('[') {
        Some(bracketed) => bracketed.split(']').next()?,
        None => authority.split(':').next()?,
    };

    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}
