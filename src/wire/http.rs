//! Minimal HTTP/1.1 parsing for the socket-upgrade path
//!
//! Only the request head is parsed; header keys are lowercased the way
//! the rest of the codebase expects them. Anything beyond what the two
//! upgrade endpoints need is out of scope.

use crate::error::{Error, Result};
use std::collections::HashMap;

/// Parsed HTTP upgrade request head
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    /// Request method (GET for upgrades)
    pub method: String,
    /// Request path without the query string
    pub path: String,
    /// Headers with lowercased keys
    pub headers: HashMap<String, String>,
}

impl UpgradeRequest {
    /// Parse a request head (everything before the blank line)
    pub fn parse(head: &str) -> Result<Self> {
        let mut lines = head.split("\r\n");
        let request_line = lines
            .next()
            .ok_or_else(|| Error::Handshake("empty request".to_string()))?;

        let mut parts = request_line.split_whitespace();
        let method = parts
            .next()
            .ok_or_else(|| Error::Handshake("missing method".to_string()))?
            .to_string();
        let target = parts
            .next()
            .ok_or_else(|| Error::Handshake("missing request target".to_string()))?;
        let path = target
            .split('?')
            .next()
            .unwrap_or(target)
            .to_string();

        let mut headers = HashMap::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| Error::Handshake(format!("malformed header line: {}", line)))?;
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        Ok(Self {
            method,
            path,
            headers,
        })
    }

    /// The client's `Sec-WebSocket-Key` nonce, if present
    pub fn websocket_key(&self) -> Option<&str> {
        self.headers.get("sec-websocket-key").map(String::as_str)
    }

    /// The bearer token from the `Authorization` header, if present
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get("authorization")
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Build a pre-upgrade HTTP error response
pub fn error_response(status: u16, reason: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n{}",
        status,
        reason,
        reason.len(),
        reason
    )
}
