use crate::error::Error;
use std::collections::HashMap;

/// Bound on one HTTP upgrade request this parser will look at (spec §4.C).
pub const MAX_LENGTH: usize = 2048;

/// A query-string or cookie value may legitimately repeat (`?tag=a&tag=b`);
/// `Single` covers the common case without forcing every caller to unwrap a
/// one-element vector (spec §9 REDESIGN FLAGS).
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Single(String),
    Multi(Vec<String>),
}

impl QueryValue {
    pub fn first(&self) -> &str {
        match self {
            QueryValue::Single(v) => v,
            QueryValue::Multi(v) => v.first().map(String::as_str).unwrap_or(""),
        }
    }

    fn push(self, value: String) -> Self {
        match self {
            QueryValue::Single(existing) => QueryValue::Multi(vec![existing, value]),
            QueryValue::Multi(mut existing) => {
                existing.push(value);
                QueryValue::Multi(existing)
            }
        }
    }
}

/// A parsed, validated client upgrade request (spec §3).
#[derive(Debug, Clone)]
pub struct Request {
    pub path: String,
    pub query: HashMap<String, QueryValue>,
    pub headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Parse the bytes of one bounded TCP read into a `Request`, per spec §4.C.
///
/// This purposefully stays a hand-rolled line parser, the same way
/// `socket-flow`'s own (superseded) `HttpRequest::parse_http_request`
/// worked directly on buffered lines rather than reaching for a generic
/// HTTP crate — a websocket upgrade request has no body to speak of, so the
/// extra machinery buys nothing.
pub fn parse(buf: &[u8]) -> Result<Request, Error> {
    if buf.len() > MAX_LENGTH {
        return Err(Error::RequestTooLarge(MAX_LENGTH));
    }

    let text = String::from_utf8_lossy(buf);
    let mut lines = text.split(['\r', '\n']).filter(|l| !l.is_empty());

    let request_line = lines.next().ok_or(Error::MalformedRequest)?;
    let (path, query) = parse_request_line(request_line)?;

    let mut headers = HashMap::new();
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    let query = parse_query(query.as_deref());
    let cookies = headers
        .get("cookie")
        .map(|raw| parse_cookies(raw))
        .unwrap_or_default();

    validate_required_headers(&headers)?;

    Ok(Request { path, query, headers, cookies })
}

fn parse_request_line(line: &str) -> Result<(String, Option<String>), Error> {
    let mut parts = line.split_whitespace();
    let method = parts.next().ok_or(Error::MalformedRequest)?;
    let target = parts.next().ok_or(Error::MalformedRequest)?;
    let version = parts.next().ok_or(Error::MalformedRequest)?;

    if method != "GET" {
        return Err(Error::NotAGetRequest);
    }
    if !version.starts_with("HTTP/") {
        return Err(Error::MalformedRequest);
    }
    if target.contains('#') {
        return Err(Error::FragmentInTarget);
    }

    match target.split_once('?') {
        Some((path, query)) => Ok((path.to_string(), Some(query.to_string()))),
        None => Ok((target.to_string(), None)),
    }
}

fn parse_query(raw: Option<&str>) -> HashMap<String, QueryValue> {
    let mut out: HashMap<String, QueryValue> = HashMap::new();
    let Some(raw) = raw else { return out };

    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        let (name, value) = match pair.split_once('=') {
            Some((n, v)) => (percent_decode(n), percent_decode(v)),
            None => (percent_decode(pair), String::new()),
        };
        out.entry(name)
            .and_modify(|existing| {
                let taken = std::mem::replace(existing, QueryValue::Single(String::new()));
                *existing = taken.push(value.clone());
            })
            .or_insert(QueryValue::Single(value));
    }
    out
}

fn parse_cookies(raw: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for pair in raw.split(';') {
        let pair = pair.trim();
        if let Some((name, value)) = pair.split_once('=') {
            out.insert(percent_decode(name.trim()), percent_decode(value.trim()));
        }
    }
    out
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn validate_required_headers(headers: &HashMap<String, String>) -> Result<(), Error> {
    let host = headers.get("host").map(String::as_str).unwrap_or("");
    if host.is_empty() {
        return Err(Error::MissingRequiredHeader("host"));
    }

    let upgrade = headers.get("upgrade").map(String::as_str).unwrap_or("");
    if !upgrade.to_ascii_lowercase().contains("websocket") {
        return Err(Error::MissingRequiredHeader("upgrade"));
    }

    let connection = headers.get("connection").map(String::as_str).unwrap_or("");
    if !connection.to_ascii_lowercase().contains("upgrade") {
        return Err(Error::MissingRequiredHeader("connection"));
    }

    let key = headers
        .get("sec-websocket-key")
        .ok_or(Error::MissingRequiredHeader("sec-websocket-key"))?;
    let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, key)
        .map_err(|_| Error::MissingRequiredHeader("sec-websocket-key"))?;
    if decoded.len() != 16 {
        return Err(Error::MissingRequiredHeader("sec-websocket-key"));
    }

    let version = headers
        .get("sec-websocket-version")
        .map(String::as_str)
        .unwrap_or("");
    if version != "13" {
        return Err(Error::MissingRequiredHeader("sec-websocket-version"));
    }

    Ok(())
}
