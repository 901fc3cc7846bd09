//! Black-box ICAP wire-protocol tests against a real bound
//! `tokenshield-icap` listener, covering the six concrete scenarios from
//! spec.md §8. Grounded in the shape of the teacher's root
//! `tests/integration.rs` (there: HTTP API tests against a running
//! binary; here: raw-socket ICAP tests against a running listener).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use tokenshield_icap::{Config, FailMode, IcapService};
use tokenshield_vault::{InMemoryVaultStore, Vault, VaultKey, VaultPepper};

fn test_config(egress_destinations: Vec<String>) -> Config {
    Config {
        bind: "127.0.0.1:0".parse().unwrap(),
        max_body: 1024 * 1024,
        deadline: Duration::from_secs(5),
        vault_url: None,
        vault_key: VaultKey::from_base64(&STANDARD.encode([11u8; 32])).unwrap(),
        vault_pepper: VaultPepper::from_base64(&STANDARD.encode([13u8; 32])).unwrap(),
        fail_mode: FailMode::Closed,
        ignore_content_types: Vec::new(),
        egress_destinations,
    }
}

async fn spawn_server(egress_destinations: Vec<String>) -> SocketAddr {
    let config = Arc::new(test_config(egress_destinations));
    let store = Arc::new(InMemoryVaultStore::new());
    let vault = Arc::new(Vault::new(store, config.vault_key.clone(), config.vault_pepper.clone()));
    let service = IcapService::new(vault, config);

    let (listener, addr) = service.bind().await.unwrap();
    tokio::spawn(async move {
        let _ = service.serve(listener).await;
    });
    addr
}

fn build_reqmod(
    addr: SocketAddr,
    http_method: &str,
    http_path: &str,
    host: &str,
    content_type: &str,
    body: &[u8],
) -> Vec<u8> {
    let http_head = format!(
        "{http_method} {http_path} HTTP/1.1\r\nHost: {host}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );

    let mut icap = format!(
        "REQMOD icap://{addr}/reqmod ICAP/1.0\r\n\
         Host: {addr}\r\n\
         Encapsulated: req-hdr=0, req-body={}\r\n\
         \r\n",
        http_head.len()
    )
    .into_bytes();

    icap.extend_from_slice(http_head.as_bytes());
    icap.extend_from_slice(format!("{:x}\r\n", body.len()).as_bytes());
    icap.extend_from_slice(body);
    icap.extend_from_slice(b"\r\n0\r\n\r\n");
    icap
}

async fn roundtrip(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    stream.shutdown().await.ok();

    let mut buf = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut buf)).await;
    String::from_utf8_lossy(&buf).into_owned()
}

#[tokio::test]
async fn options_reports_methods_and_istag() {
    let addr = spawn_server(Vec::new()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(format!("OPTIONS icap://{addr}/reqmod ICAP/1.0\r\nHost: {addr}\r\n\r\n").as_bytes())
        .await
        .unwrap();

    let mut buf = [0u8; 4096];
    let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let response = String::from_utf8_lossy(&buf[..n]);
    assert!(response.starts_with("ICAP/1.0 200 OK\r\n"));
    assert!(response.contains("Methods: REQMOD, RESPMOD\r\n"));
    assert!(response.contains("ISTag: \"TokenShield-1.0\"\r\n"));
}

#[tokio::test]
async fn tokenizes_visa_in_json_body() {
    let addr = spawn_server(Vec::new()).await;
    let body = br#"{"card_number":"4532015112830366","amount":"99.99"}"#;
    let request = build_reqmod(addr, "POST", "/charge", "api.example", "application/json", body);
    let response = roundtrip(addr, &request).await;

    assert!(response.starts_with("ICAP/1.0 200 OK\r\n"));
    assert!(!response.contains("4532015112830366"));
    assert!(response.contains("tok_"));
    assert!(response.contains("\"amount\":\"99.99\""));
}

#[tokio::test]
async fn detokenizes_on_egress_destination() {
    let addr = spawn_server(vec!["payments.internal".to_string()]).await;

    let ingress_body = br#"{"card_number":"4532015112830366","amount":"10.00"}"#;
    let ingress = build_reqmod(addr, "POST", "/charge", "api.example", "application/json", ingress_body);
    let ingress_response = roundtrip(addr, &ingress).await;
    let token = ingress_response
        .split("tok_")
        .nth(1)
        .map(|rest| format!("tok_{}", &rest[..43]))
        .expect("ingress response should contain a token");

    let egress_body = format!(r#"{{"card_number":"{token}","amount":"10.00"}}"#);
    let egress = build_reqmod(
        addr,
        "POST",
        "/charge",
        "payments.internal",
        "application/json",
        egress_body.as_bytes(),
    );
    let egress_response = roundtrip(addr, &egress).await;

    assert!(egress_response.starts_with("ICAP/1.0 200 OK\r\n"));
    assert!(egress_response.contains("4532015112830366"));
}

#[tokio::test]
async fn unknown_token_passes_through_as_204() {
    let addr = spawn_server(vec!["payments.internal".to_string()]).await;
    let token = format!("tok_{}", "A".repeat(43));
    let body = format!(r#"{{"card_number":"{token}"}}"#);
    let request = build_reqmod(
        addr,
        "POST",
        "/charge",
        "payments.internal",
        "application/json",
        body.as_bytes(),
    );
    let response = roundtrip(addr, &request).await;
    assert!(response.starts_with("ICAP/1.0 204 No Content\r\n"));
}

#[tokio::test]
async fn non_luhn_digit_run_passes_through_as_204() {
    let addr = spawn_server(Vec::new()).await;
    let body = br#"{"card_number":"4532015112830367"}"#;
    let request = build_reqmod(addr, "POST", "/charge", "api.example", "application/json", body);
    let response = roundtrip(addr, &request).await;
    assert!(response.starts_with("ICAP/1.0 204 No Content\r\n"));
}

#[tokio::test]
async fn binary_content_type_bypasses_scanning() {
    let addr = spawn_server(Vec::new()).await;
    let body = b"4532015112830366 embedded in a fake png";
    let request = build_reqmod(addr, "POST", "/upload", "api.example", "image/png", body);
    let response = roundtrip(addr, &request).await;
    assert!(response.starts_with("ICAP/1.0 204 No Content\r\n"));
}

#[tokio::test]
async fn null_body_request_is_204() {
    let addr = spawn_server(Vec::new()).await;
    let http_head = "GET /ping HTTP/1.1\r\nHost: api.example\r\n\r\n";
    let icap = format!(
        "REQMOD icap://{addr}/reqmod ICAP/1.0\r\n\
         Host: {addr}\r\n\
         Encapsulated: req-hdr=0, null-body={}\r\n\
         \r\n{http_head}",
        http_head.len()
    );
    let response = roundtrip(addr, icap.as_bytes()).await;
    assert!(response.starts_with("ICAP/1.0 204 No Content\r\n"));
}

#[tokio::test]
async fn inconclusive_preview_gets_a_100_continue_before_the_rest_of_the_body() {
    let addr = spawn_server(Vec::new()).await;
    let body = br#"{"card_number":"4532015112830366","amount":"5.00"}"#;
    let http_head = format!(
        "POST /charge HTTP/1.1\r\nHost: api.example\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );

    let preview_len = 10;
    let mut icap = format!(
        "REQMOD icap://{addr}/reqmod ICAP/1.0\r\n\
         Host: {addr}\r\n\
         Encapsulated: req-hdr=0, req-body={}\r\n\
         Preview: {preview_len}\r\n\
         \r\n",
        http_head.len()
    )
    .into_bytes();
    icap.extend_from_slice(http_head.as_bytes());
    icap.extend_from_slice(format!("{preview_len:x}\r\n").as_bytes());
    icap.extend_from_slice(&body[..preview_len]);
    icap.extend_from_slice(b"\r\n");

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(&icap).await.unwrap();

    let mut continue_buf = [0u8; 64];
    let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut continue_buf))
        .await
        .unwrap()
        .unwrap();
    assert!(String::from_utf8_lossy(&continue_buf[..n]).starts_with("ICAP/1.0 100 Continue\r\n"));

    let mut rest = format!("{:x}\r\n", body.len() - preview_len).into_bytes();
    rest.extend_from_slice(&body[preview_len..]);
    rest.extend_from_slice(b"\r\n0\r\n\r\n");
    stream.write_all(&rest).await.unwrap();
    stream.shutdown().await.ok();

    let mut buf = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut buf)).await;
    let response = String::from_utf8_lossy(&buf);
    assert!(response.starts_with("ICAP/1.0 200 OK\r\n"));
    assert!(!response.contains("4532015112830366"));
    assert!(response.contains("tok_"));
}

#[tokio::test]
async fn fifty_concurrent_tokenizations_of_the_same_pan_return_one_token() {
    let addr = spawn_server(Vec::new()).await;
    let mut handles = Vec::new();
    for _ in 0..50 {
        handles.push(tokio::spawn(async move {
            let body = br#"{"card_number":"4532015112830366","amount":"1.00"}"#;
            let request = build_reqmod(addr, "POST", "/charge", "api.example", "application/json", body);
            let response = roundtrip(addr, &request).await;
            response
                .split("tok_")
                .nth(1)
                .map(|rest| format!("tok_{}", &rest[..43]))
        }));
    }

    let mut tokens = Vec::new();
    for handle in handles {
        tokens.push(handle.await.unwrap().expect("every response should carry a token"));
    }

    let first = tokens[0].clone();
    assert!(tokens.iter().all(|t| *t == first));
}
