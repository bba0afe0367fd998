//! Minimal HTTP/1.x response parser for upstream origin responses.
//!
//! The real streaming HTTP wire parser is an out-of-scope collaborator named
//! in §1; `relay-core` ships only the minimal conforming implementation an
//! HTTP relay needs to read an origin's status line, headers, and body
//! prefix (§4.6 `ReadingResponse`). The client-facing side gets a real parser
//! for free from `axum`.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};

use crate::error::RelayError;

/// Parsed status line + headers + whatever body bytes were read past the
/// header terminator in the same buffer.
#[derive(Debug, Clone)]
pub struct ParsedResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body_prefix: Bytes,
}

impl ParsedResponse {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Result of feeding another chunk of bytes to the parser.
pub enum ParseOutcome {
    /// Headers not yet fully received; keep reading.
    Incomplete,
    Complete(ParsedResponse),
}

/// Out-of-scope collaborator trait: a streaming parser that accumulates
/// response bytes and produces a parsed response once headers terminate.
pub trait HttpResponseParser: Send {
    fn feed(&mut self, data: &[u8]) -> Result<ParseOutcome, RelayError>;
}

/// Minimal HTTP/1.x response parser: status line + `Name: value` headers
/// terminated by a blank line, nothing else (no chunked/continuation
/// handling — upstream origins speak plain HTTP/1.0 or 1.1 status + headers).
#[derive(Default)]
pub struct MinimalResponseParser {
    buf: BytesMut,
}

impl MinimalResponseParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn try_parse(&mut self) -> Result<ParseOutcome, RelayError> {
        let Some(header_end) = find_header_terminator(&self.buf) else {
            return Ok(ParseOutcome::Incomplete);
        };

        let head = self.buf.split_to(header_end);
        // Drop the terminator itself (\r\n\r\n or \n\n) from the remaining buffer.
        let terminator_len = if self.buf.starts_with(b"\r\n\r\n") { 4 } else { 2 };
        let _ = self.buf.split_to(terminator_len);

        let head_str = String::from_utf8_lossy(&head);
        let mut lines = head_str.split("\r\n").flat_map(|l| l.split('\n'));

        let status_line = lines
            .next()
            .ok_or_else(|| RelayError::UpstreamProtocol {
                url: String::new(),
                detail: "empty response".into(),
            })?;
        let status = parse_status_line(status_line)?;

        let mut headers = HashMap::new();
        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_string(), value.trim().to_string());
            }
        }

        let body_prefix = self.buf.split().freeze();

        Ok(ParseOutcome::Complete(ParsedResponse {
            status,
            headers,
            body_prefix,
        }))
    }
}

impl HttpResponseParser for MinimalResponseParser {
    fn feed(&mut self, data: &[u8]) -> Result<ParseOutcome, RelayError> {
        self.buf.extend_from_slice(data);
        self.try_parse()
    }
}

fn find_header_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .or_else(|| buf.windows(2).position(|w| w == b"\n\n"))
}

fn parse_status_line(line: &str) -> Result<u16, RelayError> {
    let mut parts = line.split_whitespace();
    let _http_version = parts
        .next()
        .ok_or_else(|| RelayError::UpstreamProtocol {
            url: String::new(),
            detail: format!("malformed status line: {line:?}"),
        })?;
    let status = parts
        .next()
        .ok_or_else(|| RelayError::UpstreamProtocol {
            url: String::new(),
            detail: format!("malformed status line: {line:?}"),
        })?;
    status.parse::<u16>().map_err(|_| RelayError::UpstreamProtocol {
        url: String::new(),
        detail: format!("non-numeric status code: {status:?}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_headers_and_body_prefix_in_one_shot() {
        let mut parser = MinimalResponseParser::new();
        let data = b"HTTP/1.0 200 OK\r\nContent-Type: video/MP2T\r\n\r\nBODYBODY";
        match parser.feed(data).unwrap() {
            ParseOutcome::Complete(resp) => {
                assert_eq!(resp.status, 200);
                assert_eq!(resp.header("Content-Type"), Some("video/MP2T"));
                assert_eq!(resp.body_prefix.as_ref(), b"BODYBODY");
            }
            ParseOutcome::Incomplete => panic!("expected complete parse"),
        }
    }

    #[test]
    fn incomplete_headers_return_incomplete() {
        let mut parser = MinimalResponseParser::new();
        let outcome = parser.feed(b"HTTP/1.0 200 OK\r\nContent-Type: ").unwrap();
        assert!(matches!(outcome, ParseOutcome::Incomplete));
    }

    #[test]
    fn headers_split_across_two_feeds() {
        let mut parser = MinimalResponseParser::new();
        assert!(matches!(
            parser.feed(b"HTTP/1.0 200 OK\r\nContent-Ty").unwrap(),
            ParseOutcome::Incomplete
        ));
        match parser.feed(b"pe: audio/mpeg\r\n\r\n").unwrap() {
            ParseOutcome::Complete(resp) => {
                assert_eq!(resp.header("Content-Type"), Some("audio/mpeg"));
            }
            ParseOutcome::Incomplete => panic!("expected complete parse"),
        }
    }

    #[test]
    fn non_200_status_parses_fine_disposition_is_caller_decision() {
        let mut parser = MinimalResponseParser::new();
        match parser.feed(b"HTTP/1.0 404 Not Found\r\n\r\n").unwrap() {
            ParseOutcome::Complete(resp) => assert_eq!(resp.status, 404),
            ParseOutcome::Incomplete => panic!("expected complete parse"),
        }
    }

    #[test]
    fn malformed_status_line_is_an_error() {
        let mut parser = MinimalResponseParser::new();
        let err = parser.feed(b"garbage\r\n\r\n").unwrap_err();
        assert!(matches!(err, RelayError::UpstreamProtocol { .. }));
    }
}
