//! Incremental server-sent-events parsing for the listening client. The
//! stream arrives as arbitrary byte chunks; events are only complete at a
//! blank line, so the parser buffers across chunk boundaries.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    /// Feeds one chunk of the response body and returns every event completed
    /// by it. Partial trailing events stay buffered until a later chunk closes
    /// them.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut events = Vec::new();
        while let Some(boundary) = self.buffer.find("\n\n") {
            let raw: String = self.buffer.drain(..boundary + 2).collect();
            if let Some(event) = parse_event(&raw) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_event(raw: &str) -> Option<SseEvent> {
    let mut event = String::from("message");
    let mut data_lines = Vec::new();

    for line in raw.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            event = value.trim_start().to_string();
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.trim_start().to_string());
        }
    }

    if data_lines.is_empty() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data_lines.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_event() {
        let mut parser = SseParser::default();
        let events = parser.push(b"event: message\ndata: {\"a\":1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "{\"a\":1}");
    }

    #[test]
    fn buffers_events_split_across_chunks() {
        let mut parser = SseParser::default();
        assert!(parser.push(b"data: first ha").is_empty());
        let events = parser.push(b"lf\n\ndata: second\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "first half");
        assert_eq!(events[1].data, "second");
    }

    #[test]
    fn ignores_comment_only_blocks() {
        let mut parser = SseParser::default();
        assert!(parser.push(b": keep-alive\n\n").is_empty());
    }

    #[test]
    fn defaults_event_name_to_message() {
        let mut parser = SseParser::default();
        let events = parser.push(b"data: x\n\n");
        assert_eq!(events[0].event, "message");
    }
}
