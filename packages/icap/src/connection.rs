//! Per-connection state machine (spec.md §4.4): parse the ICAP request
//! line and headers, read the encapsulated HTTP message and its chunked
//! body, drive the Adapter, and write back the ICAP response. One
//! connection handles one request at a time, sequentially, for as long as
//! the client keeps it open.

use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use tokenshield_adapter::{Adapter, AdaptContext, AdapterPolicy, ContentKind, Direction};
use tokenshield_vault::{Vault, VaultStore};

use crate::config::{Config, FailMode};
use crate::error::IcapError;
use crate::http::HttpHead;
use crate::metrics::ServiceMetrics;
use crate::streaming;
use crate::wire::{self, EncapsulatedOffsets, IcapMethod};

/// Hard ceiling on an accumulated chunked body, independent of
/// `ICAP_MAX_BODY`: `ICAP_MAX_BODY` is the threshold past which rewriting
/// switches to windowed mode (spec.md §4.4), not a read limit — but an
/// unbounded read is still a memory-exhaustion risk from a malicious or
/// broken client, so reads are capped at a generous multiple of it.
const HARD_BODY_CAP_MULTIPLIER: usize = 16;

pub async fn handle_connection<S: VaultStore + 'static>(
    stream: TcpStream,
    peer_addr: std::net::SocketAddr,
    vault: Arc<Vault<S>>,
    config: Arc<Config>,
    metrics: Arc<ServiceMetrics>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            config.deadline,
            serve_one_request(&mut reader, &mut write_half, &vault, &config, &peer_addr, &metrics),
        )
        .await;

        let response = match outcome {
            Ok(Ok(RequestOutcome::Response(bytes))) => bytes,
            Ok(Ok(RequestOutcome::ConnectionClosed)) => return,
            Ok(Err(IcapError::MalformedIcap(reason))) => {
                tracing::warn!(%reason, %peer_addr, "malformed ICAP request");
                let response = wire::bad_request_response();
                let _ = write_half.write_all(&response).await;
                return;
            }
            Ok(Err(IcapError::Adapter(err))) => {
                tracing::error!(error = %err, %peer_addr, "adapter failed");
                wire::server_error_response()
            }
            Ok(Err(IcapError::Io(err))) => {
                tracing::debug!(error = %err, %peer_addr, "connection I/O error");
                return;
            }
            Ok(Err(IcapError::Timeout)) | Err(_) => {
                tracing::warn!(%peer_addr, "request exceeded its deadline");
                let response = wire::timeout_response();
                let _ = write_half.write_all(&response).await;
                return;
            }
        };

        metrics.record_request(started.elapsed().as_micros() as u64);
        if write_half.write_all(&response).await.is_err() {
            return;
        }
    }
}

enum RequestOutcome {
    Response(Vec<u8>),
    ConnectionClosed,
}

async fn serve_one_request<S: VaultStore + 'static>(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    vault: &Arc<Vault<S>>,
    config: &Config,
    peer_addr: &std::net::SocketAddr,
    metrics: &ServiceMetrics,
) -> Result<RequestOutcome, IcapError> {
    let Some(request_line) = read_line(reader).await? else {
        return Ok(RequestOutcome::ConnectionClosed);
    };
    if request_line.trim().is_empty() {
        return Ok(RequestOutcome::ConnectionClosed);
    }
    let request_line = wire::parse_request_line(&request_line)?;

    let headers = read_header_block(reader).await?;
    let icap_headers = parse_icap_headers(&headers)?;

    if request_line.method == IcapMethod::Options {
        return Ok(RequestOutcome::Response(wire::options_response()));
    }

    let encapsulated = icap_headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("encapsulated"))
        .map(|(_, value)| EncapsulatedOffsets::parse(value))
        .transpose()?
        .ok_or_else(|| IcapError::MalformedIcap("missing Encapsulated header".into()))?;

    let header_len = encapsulated
        .header_len()
        .ok_or_else(|| IcapError::MalformedIcap("Encapsulated header has no body offset".into()))?;
    let mut http_head_bytes = vec![0u8; header_len];
    reader.read_exact(&mut http_head_bytes).await?;

    // The embedded HTTP head is still on the wire even when there is no
    // body to adapt — it must be consumed here regardless, or its bytes
    // would be misread as the start of the next request on this
    // persistent connection.
    if encapsulated.is_null_body() {
        return Ok(RequestOutcome::Response(wire::no_content_response()));
    }

    let http_head = if encapsulated.is_request() {
        HttpHead::parse_request(&http_head_bytes)?
    } else {
        HttpHead::parse_response(&http_head_bytes)?
    };

    let content_type = http_head.content_type().map(str::to_string);
    let preview = icap_headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("preview"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok());

    let body = match read_body_with_preview(
        reader,
        writer,
        config.max_body * HARD_BODY_CAP_MULTIPLIER,
        preview,
        content_type.as_deref(),
    )
    .await?
    {
        Some(body) => body,
        None => return Ok(RequestOutcome::Response(wire::no_content_response())),
    };

    let direction = match request_line.method {
        IcapMethod::Respmod => Direction::Detokenize,
        IcapMethod::Reqmod => {
            let destination = http_head
                .header("host")
                .or_else(|| http_head.request_uri())
                .unwrap_or("");
            if config.is_egress_destination(destination) {
                Direction::Detokenize
            } else {
                Direction::Tokenize
            }
        }
        IcapMethod::Options => unreachable!("handled above"),
    };

    match direction {
        Direction::Tokenize => metrics.record_tokenize(),
        Direction::Detokenize => metrics.record_detokenize(),
    }

    let ctx = AdaptContext {
        source_addr: Some(peer_addr.to_string()),
        destination_url: http_head.request_uri().map(str::to_string),
        http_status: http_head.status(),
    };

    let adapt_result = if body.len() > config.max_body {
        let kind = ContentKind::classify(content_type.as_deref().unwrap_or(""), &config.ignore_content_types);
        if kind == ContentKind::Binary {
            Ok((body.clone(), false))
        } else {
            streaming::rewrite_windowed(vault, direction, &body, &ctx).await
        }
    } else {
        let adapter = Adapter::new(
            Arc::clone(vault),
            AdapterPolicy::new(direction).with_ignore_content_types(config.ignore_content_types.clone()),
        );
        adapter
            .adapt_with_context(&body, content_type.as_deref(), &ctx)
            .await
            .map(|adapted| (adapted.body, adapted.changed))
    };

    let (new_body, changed) = match adapt_result {
        Ok(result) => result,
        Err(err) => {
            return match config.fail_mode {
                FailMode::Closed => Err(IcapError::Adapter(err)),
                FailMode::Open => {
                    tracing::warn!(error = %err, "vault unavailable, passing message through unchanged (FAIL_MODE=open)");
                    Ok(RequestOutcome::Response(wire::no_content_response()))
                }
            };
        }
    };

    if !changed {
        return Ok(RequestOutcome::Response(wire::no_content_response()));
    }

    let new_head = http_head.serialize_with_body_len(new_body.len());
    Ok(RequestOutcome::Response(wire::adapted_response(
        &new_head,
        &new_body,
        encapsulated.is_request(),
    )))
}

/// Read the preview (if any) and, depending on outcome, the remainder of
/// the chunked body. Returns `None` if the preview alone is decisive and
/// the caller should respond `204` without reading further (spec.md §4.4's
/// preview handling); `Some(body)` otherwise. When the preview is
/// inconclusive, writes an interim `100 Continue` before reading on, per
/// RFC 3507 §4.5 — the client won't send the rest of the body until it
/// sees one.
async fn read_body_with_preview(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    hard_cap: usize,
    preview: Option<usize>,
    content_type: Option<&str>,
) -> Result<Option<Vec<u8>>, IcapError> {
    let Some(_preview_size) = preview else {
        return read_chunked_body(reader, hard_cap).await.map(Some);
    };

    let (preview_bytes, is_eof) = read_chunked_body_until_terminator_or_ieof(reader, hard_cap).await?;
    if is_eof {
        return Ok(Some(preview_bytes));
    }

    let is_json = content_type
        .map(|ct| ct.split(';').next().unwrap_or(ct).trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false);

    let scanner = tokenshield_scanner::CardScanner::new();
    let preview_has_candidate = !scanner.scan(&preview_bytes).is_empty();

    if !is_json && !preview_has_candidate {
        // Nothing worth adapting in the preview and the body isn't JSON
        // (which always requires the full body) — decline the rest.
        return Ok(None);
    }

    writer.write_all(&wire::continue_response()).await?;
    let rest = read_chunked_body(reader, hard_cap.saturating_sub(preview_bytes.len())).await?;
    let mut full = preview_bytes;
    full.extend_from_slice(&rest);
    Ok(Some(full))
}

/// Read chunks until the terminating zero-length chunk, returning whether
/// it carried the `ieof` extension (meaning the previewed bytes were the
/// entire body, per RFC 3507 §4.5).
async fn read_chunked_body_until_terminator_or_ieof(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    hard_cap: usize,
) -> Result<(Vec<u8>, bool), IcapError> {
    let mut body = Vec::new();
    loop {
        let (size, extension) = read_chunk_size_line(reader).await?;
        if size == 0 {
            consume_trailer(reader).await?;
            return Ok((body, extension.contains("ieof")));
        }
        if body.len() + size > hard_cap {
            return Err(IcapError::MalformedIcap("chunked body exceeded the configured cap".into()));
        }
        let mut chunk = vec![0u8; size];
        reader.read_exact(&mut chunk).await?;
        consume_crlf(reader).await?;
        body.extend_from_slice(&chunk);
    }
}

async fn read_chunked_body(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    hard_cap: usize,
) -> Result<Vec<u8>, IcapError> {
    let (body, _ieof) = read_chunked_body_until_terminator_or_ieof(reader, hard_cap).await?;
    Ok(body)
}

async fn read_chunk_size_line(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
) -> Result<(usize, String), IcapError> {
    let Some(line) = read_line(reader).await? else {
        return Err(IcapError::MalformedIcap("connection closed mid-chunk".into()));
    };
    let line = line.trim_end_matches(['\r', '\n']);
    let (size_hex, extension) = line.split_once(';').unwrap_or((line, ""));
    let size = usize::from_str_radix(size_hex.trim(), 16)
        .map_err(|_| IcapError::MalformedIcap(format!("bad chunk size {size_hex:?}")))?;
    Ok((size, extension.trim().to_ascii_lowercase()))
}

async fn consume_crlf(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> Result<(), IcapError> {
    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf).await?;
    Ok(())
}

/// Consume any chunk trailer headers after the terminating zero chunk, up
/// to and including the final blank line.
async fn consume_trailer(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> Result<(), IcapError> {
    loop {
        let Some(line) = read_line(reader).await? else {
            return Err(IcapError::MalformedIcap("connection closed reading chunk trailer".into()));
        };
        if line == "\r\n" || line == "\n" {
            return Ok(());
        }
    }
}

/// Read one `\r\n`-terminated line, or `None` at a clean EOF with nothing
/// read yet.
async fn read_line(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> Result<Option<String>, IcapError> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}

async fn read_header_block(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> Result<Vec<u8>, IcapError> {
    let mut block = Vec::new();
    loop {
        let Some(line) = read_line(reader).await? else {
            return Err(IcapError::MalformedIcap("connection closed reading headers".into()));
        };
        block.extend_from_slice(line.as_bytes());
        if line == "\r\n" || line == "\n" {
            return Ok(block);
        }
    }
}

fn parse_icap_headers(block: &[u8]) -> Result<Vec<(String, String)>, IcapError> {
    let mut header_buf = [httparse::EMPTY_HEADER; 64];
    let parsed = httparse::parse_headers(block, &mut header_buf)
        .map_err(|e| IcapError::MalformedIcap(format!("ICAP headers: {e}")))?;
    let headers = match parsed {
        httparse::Status::Complete((_, headers)) => headers,
        httparse::Status::Partial => return Err(IcapError::MalformedIcap("incomplete ICAP headers".into())),
    };
    Ok(headers
        .iter()
        .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
        .collect())
}
