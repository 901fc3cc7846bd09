//! ICAP/1.0 wire format (RFC 3507, relevant subset). See spec.md §4.4 — the
//! OPTIONS header block and method set are reproduced byte-for-byte.

use crate::error::IcapError;

pub const ISTAG: &str = "\"TokenShield-1.0\"";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcapMethod {
    Options,
    Reqmod,
    Respmod,
}

#[derive(Debug, Clone)]
pub struct IcapRequestLine {
    pub method: IcapMethod,
    pub uri: String,
}

/// Parse the ICAP request line (`METHOD uri ICAP/1.0`). httparse's request
/// parser hardcodes the `HTTP/` version token, so the request line itself
/// is hand-parsed; the header block that follows is genuine RFC 822 syntax
/// and is parsed with `httparse::parse_headers`.
pub fn parse_request_line(line: &str) -> Result<IcapRequestLine, IcapError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut parts = line.splitn(3, ' ');
    let method = parts
        .next()
        .ok_or_else(|| IcapError::MalformedIcap("empty request line".into()))?;
    let uri = parts
        .next()
        .ok_or_else(|| IcapError::MalformedIcap("missing URI".into()))?;
    let version = parts
        .next()
        .ok_or_else(|| IcapError::MalformedIcap("missing ICAP version".into()))?;

    if version != "ICAP/1.0" {
        return Err(IcapError::MalformedIcap(format!("unsupported version {version:?}")));
    }

    let method = match method {
        "OPTIONS" => IcapMethod::Options,
        "REQMOD" => IcapMethod::Reqmod,
        "RESPMOD" => IcapMethod::Respmod,
        other => return Err(IcapError::MalformedIcap(format!("unknown method {other:?}"))),
    };

    Ok(IcapRequestLine { method, uri: uri.to_string() })
}

/// Find the byte offsets named in an `Encapsulated:` header value, e.g.
/// `req-hdr=0, req-body=245` or `res-hdr=0, null-body=204`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncapsulatedOffsets {
    pub req_hdr: Option<usize>,
    pub res_hdr: Option<usize>,
    pub req_body: Option<usize>,
    pub res_body: Option<usize>,
    pub null_body: Option<usize>,
}

impl EncapsulatedOffsets {
    pub fn parse(value: &str) -> Result<Self, IcapError> {
        let mut offsets = Self::default();
        for part in value.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (name, offset) = part
                .split_once('=')
                .ok_or_else(|| IcapError::MalformedIcap(format!("bad Encapsulated entry {part:?}")))?;
            let offset: usize = offset
                .trim()
                .parse()
                .map_err(|_| IcapError::MalformedIcap(format!("bad Encapsulated offset {offset:?}")))?;
            match name.trim() {
                "req-hdr" => offsets.req_hdr = Some(offset),
                "res-hdr" => offsets.res_hdr = Some(offset),
                "req-body" => offsets.req_body = Some(offset),
                "res-body" => offsets.res_body = Some(offset),
                "null-body" => offsets.null_body = Some(offset),
                other => return Err(IcapError::MalformedIcap(format!("unknown Encapsulated entity {other:?}"))),
            }
        }
        Ok(offsets)
    }

    /// True if this message carries no body at all.
    pub fn is_null_body(&self) -> bool {
        self.null_body.is_some()
    }

    /// Byte length of the embedded HTTP start-line + header block, derived
    /// from the gap between the header offset and whichever entity follows
    /// it (`req-body`/`res-body`/`null-body`).
    pub fn header_len(&self) -> Option<usize> {
        let hdr = self.req_hdr.or(self.res_hdr)?;
        let next = self.req_body.or(self.res_body).or(self.null_body)?;
        next.checked_sub(hdr)
    }

    /// Whether this message carries an HTTP request (`req-hdr` present) as
    /// opposed to an HTTP response (`res-hdr`).
    pub fn is_request(&self) -> bool {
        self.req_hdr.is_some()
    }
}

pub fn options_response() -> Vec<u8> {
    format!(
        "ICAP/1.0 200 OK\r\n\
         Methods: REQMOD, RESPMOD\r\n\
         Service: TokenShield\r\n\
         ISTag: {ISTAG}\r\n\
         Preview: 0\r\n\
         Transfer-Preview: *\r\n\
         Transfer-Ignore: jpg,jpeg,gif,png,swf,flv,pdf,mp3,mp4,zip\r\n\
         Transfer-Complete: *\r\n\
         Max-Connections: 100\r\n\
         Options-TTL: 3600\r\n\
         \r\n"
    )
    .into_bytes()
}

pub fn no_content_response() -> Vec<u8> {
    format!("ICAP/1.0 204 No Content\r\nISTag: {ISTAG}\r\n\r\n").into_bytes()
}

pub fn bad_request_response() -> Vec<u8> {
    format!("ICAP/1.0 400 Bad Request\r\nISTag: {ISTAG}\r\n\r\n").into_bytes()
}

pub fn timeout_response() -> Vec<u8> {
    format!("ICAP/1.0 408 Request Timeout\r\nISTag: {ISTAG}\r\n\r\n").into_bytes()
}

pub fn server_error_response() -> Vec<u8> {
    format!("ICAP/1.0 500 Server Error\r\nISTag: {ISTAG}\r\n\r\n").into_bytes()
}

pub fn continue_response() -> Vec<u8> {
    b"ICAP/1.0 100 Continue\r\n\r\n".to_vec()
}

/// Build the `200 OK` adapted-message response: ICAP headers (with an
/// updated `Encapsulated:` offset), the rewritten HTTP start-line/headers,
/// then the rewritten body as a single chunk plus the terminating
/// zero-length chunk.
pub fn adapted_response(http_head: &[u8], body: &[u8], is_request: bool) -> Vec<u8> {
    let hdr_name = if is_request { "req-hdr" } else { "res-hdr" };
    let body_name = if is_request { "req-body" } else { "res-body" };

    let mut out = format!(
        "ICAP/1.0 200 OK\r\n\
         ISTag: {ISTAG}\r\n\
         Encapsulated: {hdr_name}=0, {body_name}={}\r\n\
         \r\n",
        http_head.len()
    )
    .into_bytes();

    out.extend_from_slice(http_head);
    write_chunk(&mut out, body);
    write_terminating_chunk(&mut out);
    out
}

pub fn write_chunk(out: &mut Vec<u8>, data: &[u8]) {
    if data.is_empty() {
        return;
    }
    out.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

pub fn write_terminating_chunk(out: &mut Vec<u8>) {
    out.extend_from_slice(b"0\r\n\r\n");
}
