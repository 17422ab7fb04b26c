//! Integration tests for the `lastmile serve` HTTP API.
//!
//! Each test starts the server as a child process on a unique port,
//! makes HTTP requests, and verifies the responses.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

use lastmile_auth::{Claims, TokenCodec};
use tempfile::NamedTempFile;

const SECRET: &str = "integration-secret";

/// Atomic port counter to avoid port conflicts between parallel tests.
/// Base port is derived from process ID so separate test binaries don't
/// collide on the same port range.
static NEXT_PORT: AtomicU16 = AtomicU16::new(0);
static PORT_INIT: std::sync::Once = std::sync::Once::new();

fn next_port() -> u16 {
    PORT_INIT.call_once(|| {
        let base = 20000 + (std::process::id() as u16 % 20000);
        NEXT_PORT.store(base, Ordering::SeqCst);
    });
    NEXT_PORT.fetch_add(1, Ordering::SeqCst)
}

/// A running server, killed on drop.
struct Server {
    port: u16,
    child: Child,
    _seed: NamedTempFile,
}

impl Drop for Server {
    fn drop(&mut self) {
        self.child.kill().ok();
        self.child.wait().ok();
    }
}

const SEED: &str = r#"{
    "drivers": [{"id": "d1", "name": "Asha"}, {"id": "d2", "name": "Ravi"}],
    "orders": [
        {"id": "ord-1", "dropoff": {"lat": 12.97, "lng": 77.59}},
        {"id": "ord-2", "dropoff": {"lat": 12.93, "lng": 77.62}}
    ]
}"#;

/// Helper: start `lastmile serve` on a fresh port with seed data and the
/// given extra environment.
fn start_server(env: &[(&str, &str)], args: &[&str]) -> Server {
    let port = next_port();
    let mut seed = NamedTempFile::new().expect("seed file");
    seed.write_all(SEED.as_bytes()).expect("write seed");

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_lastmile"));
    cmd.arg("serve")
        .arg("--port")
        .arg(port.to_string())
        .arg("--seed")
        .arg(seed.path())
        .args(args)
        .env("LASTMILE_JWT_SECRET", SECRET)
        .env("LASTMILE_HEARTBEAT_SECS", "1")
        .env("LASTMILE_DOWNSTREAM_TIMEOUT_SECS", "2")
        .env_remove("LASTMILE_ROUTE_VENDOR_URL")
        .env_remove("LASTMILE_DECRYPT_URL")
        .env_remove("LASTMILE_DEMO_FALLBACK");
    for (k, v) in env {
        cmd.env(k, v);
    }
    // Redirect stdout/stderr to avoid blocking
    cmd.stdout(std::process::Stdio::null());
    cmd.stderr(std::process::Stdio::null());

    let child = cmd.spawn().expect("failed to start lastmile serve");
    // Wait for server to be ready by polling the port
    for _ in 0..50 {
        if TcpStream::connect(format!("127.0.0.1:{}", port)).is_ok() {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    Server {
        port,
        child,
        _seed: seed,
    }
}

fn token(sub: &str, role: &str, ttl_secs: i64) -> String {
    let mut claims = Claims::new(sub, role, ttl_secs);
    if role == "driver" {
        claims.driver_id = Some(sub.to_string());
    }
    TokenCodec::new(SECRET).sign(&claims)
}

/// Helper: make an HTTP request and return (status, body).
fn http(
    port: u16,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: Option<&str>,
) -> (u16, String) {
    let mut stream = TcpStream::connect(format!("127.0.0.1:{}", port)).expect("failed to connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();

    let mut header_lines = String::new();
    for (name, value) in headers {
        header_lines.push_str(&format!("{}: {}\r\n", name, value));
    }
    let body = body.unwrap_or("");
    let request = format!(
        "{} {} HTTP/1.1\r\nHost: localhost:{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n{}Connection: close\r\n\r\n{}",
        method,
        path,
        port,
        body.len(),
        header_lines,
        body
    );
    stream.write_all(request.as_bytes()).expect("failed to write");

    let mut response = String::new();
    let _ = stream.read_to_string(&mut response);

    parse_http_response(&response)
}

fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

fn json(body: &str) -> serde_json::Value {
    serde_json::from_str(body).unwrap_or_else(|e| panic!("invalid JSON ({}): {}", e, body))
}

/// Parse an HTTP response into (status_code, body).
fn parse_http_response(response: &str) -> (u16, String) {
    let parts: Vec<&str> = response.splitn(2, "\r\n\r\n").collect();
    let headers = parts.first().unwrap_or(&"").to_string();
    let body = parts.get(1).unwrap_or(&"").to_string();

    let status = headers
        .lines()
        .next()
        .unwrap_or("")
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(0);

    let body = if headers.to_lowercase().contains("transfer-encoding: chunked") {
        decode_chunked(&body)
    } else {
        body
    };

    (status, body)
}

/// Decode chunked transfer encoding.
fn decode_chunked(data: &str) -> String {
    let mut result = String::new();
    let mut remaining = data;

    while let Some(line_end) = remaining.find("\r\n") {
        let size = match usize::from_str_radix(remaining[..line_end].trim(), 16) {
            Ok(s) => s,
            Err(_) => break,
        };
        if size == 0 {
            break;
        }
        let chunk_start = line_end + 2;
        let chunk_end = chunk_start + size;
        if chunk_end > remaining.len() {
            result.push_str(&remaining[chunk_start..]);
            break;
        }
        result.push_str(&remaining[chunk_start..chunk_end]);
        remaining = remaining.get(chunk_end + 2..).unwrap_or("");
    }

    result
}

/// Open an SSE request; the response is left unread on the socket.
fn open_sse(port: u16, path: &str) -> TcpStream {
    let mut stream = TcpStream::connect(format!("127.0.0.1:{}", port)).expect("failed to connect");
    stream
        .set_read_timeout(Some(Duration::from_millis(200)))
        .unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: localhost:{}\r\nAccept: text/event-stream\r\n\r\n",
        path, port
    );
    stream.write_all(request.as_bytes()).unwrap();
    stream
}

/// Open an SSE stream and read until `needle` shows up or `limit` passes.
fn read_sse_until(port: u16, path: &str, needle: &str, limit: Duration) -> String {
    let mut stream = open_sse(port, path);
    read_until(&mut stream, needle, limit)
}

fn read_until(stream: &mut TcpStream, needle: &str, limit: Duration) -> String {
    let deadline = Instant::now() + limit;
    let mut seen = String::new();
    let mut buf = [0u8; 4096];
    while Instant::now() < deadline && !seen.contains(needle) {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => seen.push_str(&String::from_utf8_lossy(&buf[..n])),
            Err(_) => continue,
        }
    }
    seen
}

#[test]
fn health_is_public() {
    let server = start_server(&[], &[]);
    let (status, body) = http(server.port, "GET", "/health", &[], None);
    assert_eq!(status, 200);
    let json = json(&body);
    assert_eq!(json["status"], "ok");
    assert!(json.get("version").is_some());
}

#[test]
fn unknown_route_returns_404() {
    let server = start_server(&[], &[]);
    let (status, body) = http(server.port, "GET", "/nope", &[], None);
    assert_eq!(status, 404);
    assert_eq!(json(&body)["error"], "not found");
}

#[test]
fn duplicate_position_submission_is_stored_once() {
    let server = start_server(&[], &[]);
    let driver = bearer(&token("d1", "driver", 600));
    let sample = r#"{"driverId":"d1","lat":12.97,"lng":77.59}"#;
    let headers = [
        ("Authorization", driver.as_str()),
        ("Idempotency-Key", "k1"),
    ];

    let (s1, b1) = http(server.port, "POST", "/track/ord-1", &headers, Some(sample));
    let (s2, b2) = http(server.port, "POST", "/track/ord-1", &headers, Some(sample));
    assert_eq!((s1, s2), (200, 200));
    let (first, second) = (json(&b1), json(&b2));
    assert_eq!(first["ok"], true);
    assert_eq!(first["id"], second["id"]);
    assert_eq!(second["duplicate"], true);

    let admin = bearer(&token("a1", "admin", 600));
    let (status, body) = http(
        server.port,
        "GET",
        "/track/ord-1/recent?n=1",
        &[("Authorization", admin.as_str())],
        None,
    );
    assert_eq!(status, 200);
    let samples = json(&body)["samples"].as_array().unwrap().clone();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0]["id"], first["id"]);
}

#[test]
fn invalid_position_is_rejected() {
    let server = start_server(&[], &[]);
    let driver = bearer(&token("d1", "driver", 600));
    let (status, _) = http(
        server.port,
        "POST",
        "/track/ord-1",
        &[("Authorization", driver.as_str())],
        Some(r#"{"driverId":"d1","lat":95.0,"lng":77.59}"#),
    );
    assert_eq!(status, 400);
}

#[test]
fn driver_route_without_token_uses_sandbox_principal() {
    let server = start_server(&[], &[]);
    let (status, body) = http(
        server.port,
        "POST",
        "/track/ord-1",
        &[],
        Some(r#"{"lat":12.97,"lng":77.59}"#),
    );
    assert_eq!(status, 200);
    assert_eq!(json(&body)["ok"], true);
}

#[test]
fn demo_fallback_can_be_disabled() {
    let server = start_server(&[], &["--no-demo-fallback"]);
    let (status, _) = http(
        server.port,
        "POST",
        "/track/ord-1",
        &[],
        Some(r#"{"driverId":"d1","lat":12.97,"lng":77.59}"#),
    );
    assert_eq!(status, 401);
}

#[test]
fn staff_route_with_bad_or_expired_token_is_401() {
    let server = start_server(&[], &[]);
    let expired = bearer(&token("a1", "admin", -60));
    let forged = bearer(&TokenCodec::new("other-secret").sign(&Claims::new("a1", "admin", 600)));

    for auth in [expired.as_str(), forged.as_str(), "Bearer not-a-token"] {
        let (status, body) = http(
            server.port,
            "POST",
            "/assignments/assign",
            &[("Authorization", auth)],
            Some(r#"{"orderId":"ord-1","driverId":"d1"}"#),
        );
        assert_eq!(status, 401, "auth header {auth}");
        assert!(json(&body).get("error").is_some());
    }

    let (status, _) = http(server.port, "GET", "/metrics", &[], None);
    assert_eq!(status, 401);
}

#[test]
fn driver_on_staff_route_is_403() {
    let server = start_server(&[], &[]);
    let driver = bearer(&token("d1", "driver", 600));
    let (status, _) = http(
        server.port,
        "GET",
        "/metrics",
        &[("Authorization", driver.as_str())],
        None,
    );
    assert_eq!(status, 403);
}

#[test]
fn optimize_without_vendor_uses_fallback() {
    let server = start_server(&[], &[]);
    let driver = bearer(&token("d1", "driver", 600));
    let (status, body) = http(
        server.port,
        "POST",
        "/routes/optimize",
        &[("Authorization", driver.as_str())],
        Some(
            r#"{"driverId":"d1","stops":[{"lat":12.97,"lng":77.59,"orderId":"a"},{"lat":12.93,"lng":77.62,"orderId":"b"}]}"#,
        ),
    );
    assert_eq!(status, 200);
    let json = json(&body);
    assert_eq!(json["plan"]["provider"], "fallback");
    assert_eq!(json["orderedStops"].as_array().unwrap().len(), 2);
}

#[test]
fn optimize_with_unreachable_vendor_answers_200_with_error() {
    let server = start_server(
        &[("LASTMILE_ROUTE_VENDOR_URL", "http://127.0.0.1:9/optimize")],
        &[],
    );
    let driver = bearer(&token("d1", "driver", 600));
    let (status, body) = http(
        server.port,
        "POST",
        "/routes/optimize",
        &[("Authorization", driver.as_str())],
        Some(r#"{"driverId":"d1","stops":[{"lat":12.97,"lng":77.59}]}"#),
    );
    assert_eq!(status, 200);
    let json = json(&body);
    assert!(json.get("error").is_some());
    assert!(json.get("message").is_some());
    assert_eq!(json["driverId"], "d1");
    assert_eq!(json["stops"].as_array().unwrap().len(), 1);
}

#[test]
fn assign_then_complete() {
    let server = start_server(
        &[("LASTMILE_PUBLIC_BASE_URL", "https://track.example")],
        &[],
    );
    let dispatcher = bearer(&token("u1", "dispatcher", 600));
    let (status, body) = http(
        server.port,
        "POST",
        "/assignments/assign",
        &[("Authorization", dispatcher.as_str())],
        Some(r#"{"orderId":"ord-1","driverId":"d1"}"#),
    );
    assert_eq!(status, 200);
    let json_body = json(&body);
    assert_eq!(json_body["status"], "assigned");
    assert_eq!(json_body["orderId"], "ord-1");
    assert_eq!(json_body["driverId"], "d1");
    assert_eq!(
        json_body["trackingUrl"],
        "https://track.example/track/ord-1/sse"
    );
    assert_eq!(json_body["routeSummary"]["stopCount"], 1);

    let driver = bearer(&token("d1", "driver", 600));
    let (status, body) = http(
        server.port,
        "GET",
        "/routes/d1",
        &[("Authorization", driver.as_str())],
        None,
    );
    assert_eq!(status, 200);
    assert_eq!(json(&body)["sequence"][0], "ord-1");

    let other = bearer(&token("d2", "driver", 600));
    let (status, _) = http(
        server.port,
        "POST",
        "/assignments/complete",
        &[("Authorization", other.as_str())],
        Some(r#"{"orderId":"ord-1"}"#),
    );
    assert_eq!(status, 403);

    let (status, body) = http(
        server.port,
        "POST",
        "/assignments/complete",
        &[("Authorization", driver.as_str())],
        Some(r#"{"orderId":"ord-1"}"#),
    );
    assert_eq!(status, 200);
    let done = json(&body);
    assert_eq!(done["status"], "delivered");
    assert_eq!(done["routeSummary"]["stopCount"], 0);
}

#[test]
fn assign_unknown_order_is_404() {
    let server = start_server(&[], &[]);
    let admin = bearer(&token("a1", "admin", 600));
    let (status, _) = http(
        server.port,
        "POST",
        "/assignments/assign",
        &[("Authorization", admin.as_str())],
        Some(r#"{"orderId":"ord-404","driverId":"d1"}"#),
    );
    assert_eq!(status, 404);
}

#[test]
fn logout_revokes_token() {
    let server = start_server(&[], &[]);
    let admin = bearer(&token("a1", "admin", 600));
    let headers = [("Authorization", admin.as_str())];

    let (status, _) = http(server.port, "GET", "/metrics", &headers, None);
    assert_eq!(status, 200);

    let (status, body) = http(server.port, "POST", "/auth/logout", &headers, Some("{}"));
    assert_eq!(status, 200);
    assert_eq!(json(&body)["revoked"], true);

    let (status, _) = http(server.port, "GET", "/metrics", &headers, None);
    assert_eq!(status, 401);
}

#[test]
fn sse_stream_sends_snapshot_and_heartbeats() {
    let server = start_server(&[], &[]);
    let driver = bearer(&token("d1", "driver", 600));
    let (status, _) = http(
        server.port,
        "POST",
        "/track/ord-7",
        &[("Authorization", driver.as_str())],
        Some(r#"{"driverId":"d1","lat":12.97,"lng":77.59}"#),
    );
    assert_eq!(status, 200);

    let seen = read_sse_until(
        server.port,
        "/track/ord-7/sse",
        "event: heartbeat",
        Duration::from_secs(5),
    );
    assert!(seen.contains("text/event-stream"), "got: {seen}");
    assert!(seen.contains("event: position"), "got: {seen}");
    assert!(seen.contains("event: heartbeat"), "got: {seen}");
}

#[test]
fn closing_sse_connection_releases_the_subscription() {
    let server = start_server(&[], &[]);
    let admin = bearer(&token("a1", "admin", 600));
    let headers = [("Authorization", admin.as_str())];
    let active = |port: u16| -> u64 {
        let (status, body) = http(port, "GET", "/metrics", &headers, None);
        assert_eq!(status, 200);
        json(&body)["activeStreams"].as_u64().unwrap()
    };

    let mut stream = open_sse(server.port, "/track/ord-9/sse");
    let seen = read_until(&mut stream, "event: heartbeat", Duration::from_secs(5));
    assert!(seen.contains("event: heartbeat"), "got: {seen}");
    assert_eq!(active(server.port), 1);

    drop(stream);

    // The server notices the closed socket on its next heartbeat write.
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut remaining = active(server.port);
    while remaining != 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(100));
        remaining = active(server.port);
    }
    assert_eq!(remaining, 0);
}
