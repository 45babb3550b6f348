//! SSE wire encoding and frame parsing
//!
//! The proxy owns the wire format: `event: <name>\ndata: <json>\n\n`
//! frames plus comment keep-alive lines. The parser is used on the
//! upstream-proxy path to inspect frames inside a forwarded byte
//! stream; a malformed frame is logged and skipped, never fatal.

use serde_json::json;

/// One client-facing SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Init {
        interaction_id: String,
    },
    Token {
        token: String,
    },
    Sources {
        sources: Vec<String>,
    },
    Error {
        error: String,
        detail: Option<String>,
        interaction_id: Option<String>,
    },
    End,
}

impl SseEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SseEvent::Init { .. } => "init",
            SseEvent::Token { .. } => "token",
            SseEvent::Sources { .. } => "sources",
            SseEvent::Error { .. } => "error",
            SseEvent::End => "end",
        }
    }

    /// Encode as one `\n\n`-terminated wire frame.
    pub fn to_wire(&self) -> String {
        let data = match self {
            SseEvent::Init { interaction_id } => json!({ "interaction_id": interaction_id }),
            SseEvent::Token { token } => json!({ "token": token }),
            SseEvent::Sources { sources } => json!({ "sources": sources }),
            SseEvent::Error {
                error,
                detail,
                interaction_id,
            } => {
                let mut data = json!({ "error": error });
                if let Some(detail) = detail {
                    data["detail"] = json!(detail);
                }
                if let Some(id) = interaction_id {
                    data["interaction_id"] = json!(id);
                }
                data
            }
            SseEvent::End => json!({}),
        };
        format!("event: {}\ndata: {}\n\n", self.name(), data)
    }
}

/// Comment-form keep-alive line.
pub fn keepalive_line(unix_ts: i64) -> String {
    format!(": ping {}\n\n", unix_ts)
}

/// Frame recognized inside an upstream byte stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedFrame {
    Init,
    Token(String),
    Sources(Vec<String>),
    Error { error: String },
    End,
    Comment,
    /// Recognized as a frame but not as a known event kind
    Other,
}

/// One complete upstream frame: the raw wire text and what it parsed to.
#[derive(Debug, Clone)]
pub struct UpstreamFrame {
    pub raw: String,
    pub parsed: ParsedFrame,
}

/// Incremental SSE frame parser over a chunked byte stream.
///
/// Chunk boundaries need not align with frame boundaries; partial
/// frames stay buffered until their terminating blank line arrives.
#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: String,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every frame completed by it.
    pub fn push(&mut self, chunk: &str) -> Vec<UpstreamFrame> {
        self.buffer.push_str(chunk);

        let mut frames = Vec::new();
        while let Some(boundary) = self.buffer.find("\n\n") {
            let raw: String = self.buffer.drain(..boundary + 2).collect();
            let parsed = parse_frame(&raw);
            frames.push(UpstreamFrame { raw, parsed });
        }
        frames
    }

    /// Unconsumed partial input (diagnostics only).
    pub fn pending(&self) -> &str {
        &self.buffer
    }
}

fn parse_frame(frame: &str) -> ParsedFrame {
    let mut event_name: Option<&str> = None;
    let mut data_line: Option<&str> = None;
    let mut comment_only = true;

    for line in frame.lines() {
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix(':') {
            let _ = rest;
            continue;
        }
        comment_only = false;
        if let Some(rest) = line.strip_prefix("event:") {
            event_name = Some(rest.trim());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_line = Some(rest.trim());
        }
    }

    if comment_only {
        return ParsedFrame::Comment;
    }

    let data: serde_json::Value = match data_line {
        Some(raw) => match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed SSE data line, skipping frame");
                metrics::counter!("sse_chunk_parse_errors_total").increment(1);
                return ParsedFrame::Other;
            }
        },
        None => json!({}),
    };

    match event_name {
        Some("init") => ParsedFrame::Init,
        Some("token") => {
            let token = data
                .get("token")
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .to_string();
            ParsedFrame::Token(token)
        }
        Some("sources") => {
            let sources = data
                .get("sources")
                .and_then(|s| s.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default();
            ParsedFrame::Sources(sources)
        }
        Some("error") => {
            let error = data
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("unknown")
                .to_string();
            ParsedFrame::Error { error }
        }
        Some("end") => ParsedFrame::End,
        _ => ParsedFrame::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let wire = SseEvent::Init {
            interaction_id: "abc".to_string(),
        }
        .to_wire();
        assert_eq!(wire, "event: init\ndata: {\"interaction_id\":\"abc\"}\n\n");

        let wire = SseEvent::End.to_wire();
        assert_eq!(wire, "event: end\ndata: {}\n\n");
    }

    #[test]
    fn test_error_event_optional_fields() {
        let wire = SseEvent::Error {
            error: "validation_error".to_string(),
            detail: Some("missing query".to_string()),
            interaction_id: None,
        }
        .to_wire();
        assert!(wire.contains("\"error\":\"validation_error\""));
        assert!(wire.contains("\"detail\":\"missing query\""));
        assert!(!wire.contains("interaction_id"));
    }

    #[test]
    fn test_keepalive_is_comment() {
        let line = keepalive_line(1700000000);
        assert!(line.starts_with(": ping 1700000000"));
        assert!(line.ends_with("\n\n"));
    }

    #[test]
    fn test_parser_handles_split_frames() {
        let mut parser = FrameParser::new();
        assert!(parser.push("event: token\nda").is_empty());
        let frames = parser.push("ta: {\"token\":\"hi\"}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].parsed, ParsedFrame::Token("hi".to_string()));
        assert!(parser.pending().is_empty());
    }

    #[test]
    fn test_parser_multiple_frames_one_chunk() {
        let mut parser = FrameParser::new();
        let frames = parser.push(
            "event: token\ndata: {\"token\":\"a\"}\n\nevent: end\ndata: {}\n\n",
        );
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].parsed, ParsedFrame::Token("a".to_string()));
        assert_eq!(frames[1].parsed, ParsedFrame::End);
    }

    #[test]
    fn test_parser_malformed_data_not_fatal() {
        let mut parser = FrameParser::new();
        let frames = parser.push("event: token\ndata: {not json\n\nevent: token\ndata: {\"token\":\"b\"}\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].parsed, ParsedFrame::Other);
        assert_eq!(frames[1].parsed, ParsedFrame::Token("b".to_string()));
    }

    #[test]
    fn test_parser_comment_frame() {
        let mut parser = FrameParser::new();
        let frames = parser.push(": ping 1700000000\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].parsed, ParsedFrame::Comment);
    }

    #[test]
    fn test_parser_error_frame() {
        let mut parser = FrameParser::new();
        let frames =
            parser.push("event: error\ndata: {\"error\":\"upstream_stream_error\"}\n\n");
        assert_eq!(
            frames[0].parsed,
            ParsedFrame::Error {
                error: "upstream_stream_error".to_string()
            }
        );
    }
}
