//! Include/exclude filters applied to captured traffic.
//!
//! The same evaluator runs over live stream events and over session history,
//! so both views always agree on what is surfaced.
//!
//! ## Evaluation Order
//!
//! 1. Host: `include_hosts`, then `exclude_hosts`
//! 2. Method: `include_methods`, then `exclude_methods`
//! 3. Status code: `include_status_codes`, then `exclude_status_codes`
//! 4. URL substring: `include_url_contains`, then `exclude_url_contains`
//!
//! An event is surfaced only if it passes every check. An empty list never
//! restricts anything, and a value present in both the include and exclude
//! list of one dimension is rejected. A dimension the event does not carry
//! (no request payload, no response payload) is not restricted.
//!
//! Host and method comparisons are exact and case-sensitive.

use serde::{Deserialize, Serialize};

use crate::event::NetworkEvent;

/// Filter configuration owned by the proxy.
///
/// Always fetched and pushed as a whole snapshot, never merged.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkFilters {
    /// Hosts that must match, empty for any.
    pub include_hosts: Vec<String>,
    /// Hosts that are never surfaced.
    pub exclude_hosts: Vec<String>,
    /// Methods that must match, empty for any.
    pub include_methods: Vec<String>,
    /// Methods that are never surfaced.
    pub exclude_methods: Vec<String>,
    /// Status codes that must match, empty for any.
    pub include_status_codes: Vec<u16>,
    /// Status codes that are never surfaced.
    pub exclude_status_codes: Vec<u16>,
    /// URL substrings of which at least one must occur, empty for any.
    pub include_url_contains: Vec<String>,
    /// URL substrings that hide an event when present.
    pub exclude_url_contains: Vec<String>,
}

impl NetworkFilters {
    /// Creates an empty filter set that surfaces everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no list restricts anything.
    pub fn is_empty(&self) -> bool {
        self.include_hosts.is_empty()
            && self.exclude_hosts.is_empty()
            && self.include_methods.is_empty()
            && self.exclude_methods.is_empty()
            && self.include_status_codes.is_empty()
            && self.exclude_status_codes.is_empty()
            && self.include_url_contains.is_empty()
            && self.exclude_url_contains.is_empty()
    }

    /// Returns true if the event should be surfaced.
    pub fn matches(&self, event: &NetworkEvent) -> bool {
        matches(event, self)
    }

    /// Splits comma separated user input into a trimmed, non-empty list.
    pub fn parse_list(input: &str) -> Vec<String> {
        input
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Like [`parse_list`](Self::parse_list), dropping entries that are not
    /// valid status codes.
    pub fn parse_status_codes(input: &str) -> Vec<u16> {
        Self::parse_list(input)
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect()
    }
}

/// Outcome of one include/exclude dimension.
fn check_dimension<T, F>(candidates: &[T], include: &[T], exclude: &[T], eq: F) -> bool
where
    F: Fn(&T, &T) -> bool,
{
    if candidates.is_empty() {
        return true;
    }

    if !include.is_empty()
        && !candidates
            .iter()
            .any(|c| include.iter().any(|i| eq(c, i)))
    {
        return false;
    }

    if !exclude.is_empty() && candidates.iter().any(|c| exclude.iter().any(|e| eq(c, e))) {
        return false;
    }

    true
}

/// Decides whether an event passes the filter set.
pub fn matches(event: &NetworkEvent, filters: &NetworkFilters) -> bool {
    // Destination host and source address both identify the peer.
    let mut hosts: Vec<String> = Vec::with_capacity(2);
    if let Some(host) = event.host() {
        hosts.push(host);
    }
    if let Some(src) = &event.src_ip {
        hosts.push(src.clone());
    }
    if !check_dimension(&hosts, &filters.include_hosts, &filters.exclude_hosts, |a, b| a == b) {
        return false;
    }

    let methods: Vec<String> = event.method().map(str::to_string).into_iter().collect();
    if !check_dimension(
        &methods,
        &filters.include_methods,
        &filters.exclude_methods,
        |a, b| a == b,
    ) {
        return false;
    }

    let codes: Vec<u16> = event.status_code().into_iter().collect();
    if !check_dimension(
        &codes,
        &filters.include_status_codes,
        &filters.exclude_status_codes,
        |a, b| a == b,
    ) {
        return false;
    }

    let urls: Vec<String> = event.url().map(str::to_string).into_iter().collect();
    check_dimension(
        &urls,
        &filters.include_url_contains,
        &filters.exclude_url_contains,
        |url, needle| url.contains(needle.as_str()),
    )
}

/// Keeps only the events that pass the filter set, preserving order.
pub fn filter_events<'a, I>(events: I, filters: &'a NetworkFilters) -> impl Iterator<Item = I::Item> + 'a
where
    I: IntoIterator<Item = &'a NetworkEvent>,
    I::IntoIter: 'a,
{
    events.into_iter().filter(move |e| matches(e, filters))
}
