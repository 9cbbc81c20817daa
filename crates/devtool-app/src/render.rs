//! Plain-text rendering for terminal output.

use devtool_core::{NetworkEvent, NetworkFilters, ProxyStatus};

/// One line per event: capture time (or local receive time) then the summary.
pub fn event_line(event: &NetworkEvent) -> String {
    let time = event
        .time
        .clone()
        .unwrap_or_else(|| event.received_at.format("%H:%M:%S%.3f").to_string());
    format!("{}  {}", time, event.summary())
}

/// Event line followed by indented headers and body.
pub fn event_detail(event: &NetworkEvent) -> String {
    let mut out = event_line(event);

    if let Some(request) = &event.request {
        for (name, values) in &request.headers {
            out.push_str(&format!("\n    > {}: {}", name, values.join(", ")));
        }
        if let Some(body) = request.body.as_deref().filter(|b| !b.is_empty()) {
            out.push_str(&format!("\n    > {}", body));
        }
    }
    if let Some(response) = &event.response {
        for (name, values) in &response.headers {
            out.push_str(&format!("\n    < {}: {}", name, values.join(", ")));
        }
        if let Some(body) = response.body.as_deref().filter(|b| !b.is_empty()) {
            out.push_str(&format!("\n    < {}", body));
        }
    }

    out
}

/// Human readable interception status.
pub fn status_line(status: &ProxyStatus) -> &'static str {
    if status.enabled {
        "Proxy is intercepting traffic"
    } else {
        "Proxy is running with interception disabled"
    }
}

/// One line per non-empty filter list.
pub fn filters_text(filters: &NetworkFilters) -> String {
    if filters.is_empty() {
        return "No filters (all traffic is shown)".to_string();
    }

    let codes = |codes: &[u16]| {
        codes
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };

    let rows = [
        ("include hosts", filters.include_hosts.join(", ")),
        ("exclude hosts", filters.exclude_hosts.join(", ")),
        ("include methods", filters.include_methods.join(", ")),
        ("exclude methods", filters.exclude_methods.join(", ")),
        ("include status codes", codes(&filters.include_status_codes)),
        ("exclude status codes", codes(&filters.exclude_status_codes)),
        ("include URL contains", filters.include_url_contains.join(", ")),
        ("exclude URL contains", filters.exclude_url_contains.join(", ")),
    ];

    rows.iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(label, value)| format!("{:<22}{}", format!("{}:", label), value))
        .collect::<Vec<_>>()
        .join("\n")
}
