//! The HTTP/1.x start-line + headers embedded in an ICAP request/response.
//! Unlike the ICAP start line (see `wire.rs`), this is genuine HTTP syntax,
//! so `httparse`'s request/response parsers apply directly.

use crate::error::IcapError;

const MAX_HEADERS: usize = 64;

#[derive(Debug, Clone)]
pub enum StartLine {
    Request { method: String, uri: String, version: u8 },
    Response { version: u8, status: u16, reason: String },
}

/// A parsed HTTP start-line plus its header block, as found at the front of
/// an ICAP `req-hdr`/`res-hdr` section.
#[derive(Debug, Clone)]
pub struct HttpHead {
    pub start_line: StartLine,
    pub headers: Vec<(String, String)>,
}

impl HttpHead {
    pub fn parse_request(raw: &[u8]) -> Result<Self, IcapError> {
        let mut header_buf = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut header_buf);
        req.parse(raw)
            .map_err(|e| IcapError::MalformedIcap(format!("embedded HTTP request: {e}")))?;

        let method = req
            .method
            .ok_or_else(|| IcapError::MalformedIcap("embedded HTTP request missing method".into()))?
            .to_string();
        let uri = req
            .path
            .ok_or_else(|| IcapError::MalformedIcap("embedded HTTP request missing path".into()))?
            .to_string();
        let version = req
            .version
            .ok_or_else(|| IcapError::MalformedIcap("embedded HTTP request missing version".into()))?;

        Ok(Self {
            start_line: StartLine::Request { method, uri, version },
            headers: collect_headers(req.headers),
        })
    }

    pub fn parse_response(raw: &[u8]) -> Result<Self, IcapError> {
        let mut header_buf = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut res = httparse::Response::new(&mut header_buf);
        res.parse(raw)
            .map_err(|e| IcapError::MalformedIcap(format!("embedded HTTP response: {e}")))?;

        let version = res
            .version
            .ok_or_else(|| IcapError::MalformedIcap("embedded HTTP response missing version".into()))?;
        let status = res
            .code
            .ok_or_else(|| IcapError::MalformedIcap("embedded HTTP response missing status".into()))?;
        let reason = res.reason.unwrap_or("").to_string();

        Ok(Self {
            start_line: StartLine::Response { version, status, reason },
            headers: collect_headers(res.headers),
        })
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn status(&self) -> Option<u16> {
        match self.start_line {
            StartLine::Response { status, .. } => Some(status),
            StartLine::Request { .. } => None,
        }
    }

    pub fn request_uri(&self) -> Option<&str> {
        match &self.start_line {
            StartLine::Request { uri, .. } => Some(uri),
            StartLine::Response { .. } => None,
        }
    }

    /// Re-serialize the start-line + headers, rewriting (or appending)
    /// `Content-Length` to `body_len` — the Adapter's rewrite is generally
    /// length-changing, so the header must track it (spec.md §4.3).
    pub fn serialize_with_body_len(&self, body_len: usize) -> Vec<u8> {
        let mut out = Vec::new();
        match &self.start_line {
            StartLine::Request { method, uri, version } => {
                out.extend_from_slice(format!("{method} {uri} HTTP/1.{version}\r\n").as_bytes());
            }
            StartLine::Response { version, status, reason } => {
                out.extend_from_slice(format!("HTTP/1.{version} {status} {reason}\r\n").as_bytes());
            }
        }

        let mut wrote_content_length = false;
        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case("content-length") {
                out.extend_from_slice(format!("Content-Length: {body_len}\r\n").as_bytes());
                wrote_content_length = true;
            } else {
                out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
            }
        }
        if !wrote_content_length {
            out.extend_from_slice(format!("Content-Length: {body_len}\r\n").as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out
    }
}

fn collect_headers(raw: &[httparse::Header<'_>]) -> Vec<(String, String)> {
    raw.iter()
        .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
        .collect()
}
