//! Minimal server-sent events decoding for HTTP POST replies.

/// Split an SSE body into its event payloads.
///
/// Only `data:` lines matter. Each blank-line-delimited event becomes one
/// payload, multiple `data:` lines within an event are joined with `\n`, and
/// comments and other fields are ignored.
pub fn decode_events(body: &str) -> Vec<String> {
    let mut events = Vec::new();
    let mut data: Vec<&str> = Vec::new();

    for line in body.split('\n') {
        let line = line.trim_end_matches('\r');

        if line.is_empty() {
            if !data.is_empty() {
                events.push(data.join("\n"));
                data.clear();
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }

    if !data.is_empty() {
        events.push(data.join("\n"));
    }

    events
}

/// Whether a `Content-Type` header value announces an SSE body.
pub fn is_event_stream(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|mime| mime.trim().eq_ignore_ascii_case("text/event-stream"))
        .unwrap_or(false)
}
