//! Incremental Server-Sent Events parser.
//!
//! Bytes arrive in arbitrary chunks; [`SseParser::feed`] buffers partial lines
//! and returns every event completed by the chunk.

/// One dispatched SSE event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field; `message` when the stream omitted it.
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        events
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            // `retry` and unknown fields are ignored.
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        let id = self.id.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
            id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_events_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"id: 1\nevent: PB_CON").is_empty());
        let events = parser.feed(b"NECT\ndata: {\"clientId\":\"abc\"}\n\n");

        assert_eq!(
            events,
            vec![SseEvent {
                event: "PB_CONNECT".into(),
                data: r#"{"clientId":"abc"}"#.into(),
                id: Some("1".into()),
            }]
        );
    }

    #[test]
    fn joins_multi_line_data_and_handles_crlf() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"event: jobs/*\r\ndata: line one\r\ndata: line two\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "jobs/*");
        assert_eq!(events[0].data, "line one\nline two");
    }

    #[test]
    fn skips_comments_and_empty_events() {
        let mut parser = SseParser::new();
        let events = parser.feed(b": keep-alive\n\nevent: ping\n\ndata:x\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "x");
    }
}
