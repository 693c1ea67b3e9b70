//! End-to-end engine scenarios against local mock servers.
//!
//! Mock endpoints:
//! - `spawn_canned_proxy` -- answers any plain request with a canned body,
//!   refuses CONNECT (an HTTP-only forward proxy)
//! - `spawn_socks5` -- minimal SOCKS5 handshake, then serves the echo body
//! - `spawn_nginx_like` -- a web server that refuses to proxy and looks
//!   like stock nginx

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use proxyprobe::{AdvancedChecks, Engine, EngineConfig, Logger, ProxyKind};

const ECHO_BODY: &str = r#"{"ip":"1.2.3.4"}"#;
const METADATA_BODY: &str =
    "ami-id\nami-launch-index\nhostname\ninstance-id\ni-deadbeef\ninstance-type";

struct NullLogger;

impl Logger for NullLogger {
    fn info(&self, _message: &str) {}
}

async fn engine(config: EngineConfig) -> Engine {
    Engine::new(config, true, Arc::new(NullLogger))
        .await
        .expect("engine must build")
}

async fn read_head(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match tokio::time::timeout(Duration::from_secs(2), stream.read(&mut chunk)).await {
            Ok(Ok(0)) | Err(_) => break,
            Ok(Ok(n)) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.len() > 64 * 1024 {
                    break;
                }
            }
            Ok(Err(_)) => break,
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn http_response(status: u16, reason: &str, headers: &[(&str, &str)], body: &str) -> String {
    let mut out = format!("HTTP/1.1 {status} {reason}\r\n");
    for (name, value) in headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    ));
    out
}

/// An HTTP forward proxy that answers every request itself with `body`
/// and refuses CONNECT tunnels (no TLS support).
async fn spawn_canned_proxy(body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let head = read_head(&mut stream).await;
                let response = if head.starts_with("CONNECT") {
                    http_response(502, "Bad Gateway", &[], "tunnel refused")
                } else {
                    http_response(200, "OK", &[("Content-Type", "application/json")], body)
                };
                let _ = stream.write_all(response.as_bytes()).await;
            });
        }
    });
    addr
}

/// Minimal SOCKS5 server: no-auth handshake, accept any CONNECT, then
/// answer the tunneled HTTP request with the echo body.
async fn spawn_socks5() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                // Greeting: VER NMETHODS METHODS...
                let mut header = [0u8; 2];
                if stream.read_exact(&mut header).await.is_err() || header[0] != 5 {
                    return;
                }
                let mut methods = vec![0u8; header[1] as usize];
                if stream.read_exact(&mut methods).await.is_err() {
                    return;
                }
                let _ = stream.write_all(&[5, 0]).await;

                // Request: VER CMD RSV ATYP ADDR PORT
                let mut request = [0u8; 4];
                if stream.read_exact(&mut request).await.is_err() {
                    return;
                }
                let addr_len = match request[3] {
                    1 => 4,
                    4 => 16,
                    3 => {
                        let mut len = [0u8; 1];
                        if stream.read_exact(&mut len).await.is_err() {
                            return;
                        }
                        len[0] as usize
                    }
                    _ => return,
                };
                let mut rest = vec![0u8; addr_len + 2];
                if stream.read_exact(&mut rest).await.is_err() {
                    return;
                }
                let _ = stream.write_all(&[5, 0, 0, 1, 0, 0, 0, 0, 0, 0]).await;

                // Tunneled HTTP exchange.
                let _ = read_head(&mut stream).await;
                let response = http_response(
                    200,
                    "OK",
                    &[("Content-Type", "application/json")],
                    ECHO_BODY,
                );
                let _ = stream.write_all(response.as_bytes()).await;
            });
        }
    });
    addr
}

/// A web server that looks like stock nginx and refuses both CONNECT and
/// absolute-form requests, so type detection cannot mistake it for a
/// proxy.
async fn spawn_nginx_like() -> SocketAddr {
    const ERROR_BODY: &str = "<html>\r\n<head><title>404 Not Found</title></head>\r\n<body>\r\n<center><h1>404 Not Found</h1></center>\r\n<hr><center>nginx</center>\r\n</body>\r\n</html>";
    const WELCOME_BODY: &str = "<html>\r\n<head><title>Welcome to nginx!</title></head>\r\n<body>\r\n<h1>Welcome to nginx!</h1>\r\n<hr><center>nginx</center>\r\n</body>\r\n</html>";

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let head = read_head(&mut stream).await;
                let request_line = head.lines().next().unwrap_or_default().to_string();
                let target = request_line.split_whitespace().nth(1).unwrap_or_default();
                let is_proxy_shaped = request_line.starts_with("CONNECT")
                    || target.starts_with("http://")
                    || target.starts_with("https://");

                let response = if is_proxy_shaped {
                    http_response(
                        404,
                        "Not Found",
                        &[("Server", "nginx/1.18.0")],
                        ERROR_BODY,
                    )
                } else {
                    http_response(
                        200,
                        "OK",
                        &[("Server", "nginx/1.18.0"), ("Content-Type", "text/html")],
                        WELCOME_BODY,
                    )
                };
                let _ = stream.write_all(response.as_bytes()).await;
            });
        }
    });
    addr
}

fn base_config(validation: SocketAddr) -> EngineConfig {
    EngineConfig {
        timeout: Duration::from_secs(3),
        validation_url: format!("http://{validation}"),
        min_response_bytes: 10,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_s1_working_http_proxy() {
    let echo = spawn_canned_proxy(ECHO_BODY).await;
    let proxy = spawn_canned_proxy(ECHO_BODY).await;

    let engine = engine(base_config(echo)).await;
    let result = engine.check(&format!("http://{proxy}")).await;

    assert_eq!(result.kind, ProxyKind::Http);
    assert!(result.working, "error: {:?}", result.error);
    assert!(result.supports_http);
    assert!(!result.supports_https, "CONNECT is refused by the mock");
    assert!(result.latency_ms.is_some());
    assert!(result.checks.len() >= 3, "checks: {:?}", result.checks);
    assert!(
        result
            .security_warnings
            .iter()
            .any(|w| w.contains("TLS certificate verification"))
    );
}

#[tokio::test]
async fn test_s2_dead_proxy() {
    let echo = spawn_canned_proxy(ECHO_BODY).await;
    let mut config = base_config(echo);
    config.timeout = Duration::from_secs(1);

    let engine = engine(config).await;
    // Schemeless input walks the whole candidate ladder.
    let result = engine.check("127.0.0.1:1").await;

    assert_eq!(result.kind, ProxyKind::Unknown);
    assert!(!result.working);
    assert!(
        result
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("not working")
    );
    let failed = result.checks.iter().filter(|c| !c.success).count();
    assert!(failed >= 4, "expected >=4 failed candidate probes, got {failed}");
}

#[tokio::test]
async fn test_s3_socks5_preferred() {
    let echo = spawn_canned_proxy(ECHO_BODY).await;
    let socks = spawn_socks5().await;

    let engine = engine(base_config(echo)).await;
    let result = engine.check(&format!("socks5://{socks}")).await;

    assert_eq!(result.kind, ProxyKind::Socks5);
    assert!(result.working, "error: {:?}", result.error);
}

#[tokio::test]
async fn test_s4_rate_limited_pacing() {
    let echo = spawn_canned_proxy(ECHO_BODY).await;
    let proxy_a = spawn_canned_proxy(ECHO_BODY).await;
    let proxy_b = spawn_canned_proxy(ECHO_BODY).await;

    let mut config = base_config(echo);
    config.rate_limit_enabled = true;
    config.rate_limit_delay = Duration::from_millis(100);
    config.rate_limit_per_host = true;

    let engine = engine(config).await;
    let started = Instant::now();
    let first = engine.check(&format!("http://{proxy_a}")).await;
    let second = engine.check(&format!("http://{proxy_b}")).await;
    let elapsed = started.elapsed();

    assert!(first.working && second.working);
    // Both checks share the echo host as rate-limit key: at least four
    // paced acquisitions across the two runs.
    assert!(
        elapsed >= Duration::from_millis(400),
        "pacing too fast: {elapsed:?}"
    );
}

#[tokio::test]
async fn test_s5_ssrf_finding_via_metadata() {
    let proxy = spawn_canned_proxy(METADATA_BODY).await;

    let mut config = base_config(proxy);
    config.validation_url = format!("http://{proxy}");
    config.advanced.test_ssrf = true;

    let engine = engine(config).await;
    let result = engine.check(&format!("http://{proxy}")).await;

    assert!(result.working);

    let ssrf = result.ssrf.as_ref().expect("ssrf report present");
    assert!(ssrf.vulnerable);
    assert!(!ssrf.accessible_targets.is_empty());

    // The internal-target probe itself appears in the check log.
    assert!(
        result
            .checks
            .iter()
            .any(|c| c.success && c.url.contains("169.254.169.254")),
        "internal-target check missing"
    );

    let advanced = result.advanced_ssrf.as_ref().expect("advanced report");
    assert!(
        advanced.host_header_ssrf || advanced.any(),
        "no advanced sub-check fired"
    );
}

#[tokio::test]
async fn test_s6_direct_scan_fallback() {
    let web = spawn_nginx_like().await;
    let echo = spawn_canned_proxy(ECHO_BODY).await;

    let mut config = base_config(echo);
    config.advanced.test_nginx_vulnerabilities = true;
    config.enable_fingerprint = true;

    let engine = engine(config).await;
    let result = engine.check(&format!("http://{web}")).await;

    assert!(!result.working);
    assert_eq!(result.kind, ProxyKind::Unknown);

    let fingerprint = result.fingerprint.as_ref().expect("fingerprint present");
    assert_eq!(fingerprint.software, "nginx");
    assert_eq!(fingerprint.version.as_deref(), Some("1.18.0"));
    assert!(fingerprint.confidence > 0.0 && fingerprint.confidence <= 1.0);

    assert!(result.nginx.is_some(), "nginx report missing");
    assert!(
        result.debug_trace.contains("DIRECT SCAN SUMMARY"),
        "trace: {}",
        result.debug_trace
    );
}

#[tokio::test]
async fn test_direct_scan_never_dials_internal_addresses_itself() {
    let web = spawn_nginx_like().await;
    let echo = spawn_canned_proxy(ECHO_BODY).await;

    let mut config = base_config(echo);
    config.advanced.test_ssrf = true;

    let engine = engine(config).await;
    let result = engine.check(&format!("http://{web}")).await;

    assert!(!result.working);
    assert_eq!(result.kind, ProxyKind::Unknown);

    // Every request the direct scan issues goes to the endpoint under
    // test (internal targets ride the ?url= parameter) or to the echo
    // used during detection; raw probes log non-URL labels. The scanner
    // must never dial 169.254.169.254, loopback spellings or RFC1918
    // space on its own.
    let own_base = format!("http://{web}");
    let echo_base = format!("http://{echo}");
    for check in &result.checks {
        assert!(
            check.url.starts_with(&own_base)
                || check.url.starts_with(&echo_base)
                || check.url.starts_with("https://")
                || !check.url.starts_with("http"),
            "scanner dialed {} directly during a direct scan",
            check.url
        );
    }
}

#[tokio::test]
async fn test_execution_order_is_preserved_in_checks() {
    let echo = spawn_canned_proxy(ECHO_BODY).await;
    let proxy = spawn_canned_proxy(ECHO_BODY).await;

    let engine = engine(base_config(echo)).await;
    let result = engine.check(&format!("http://{proxy}")).await;

    // Detection echo probes come first: plaintext, then TLS, then the
    // validation request (same URL as the plaintext echo here).
    let echo_http = format!("http://{echo}");
    assert!(result.checks[0].url.starts_with(&echo_http));
    assert!(result.checks[1].url.starts_with("https://"));
    let validation_hits = result
        .checks
        .iter()
        .filter(|c| c.url == engine.config().validation_url)
        .count();
    assert!(
        validation_hits >= 2,
        "expected detection echo + validation hits, got {validation_hits}"
    );
}

#[tokio::test]
async fn test_disabled_families_emit_no_reports() {
    let echo = spawn_canned_proxy(ECHO_BODY).await;
    let proxy = spawn_canned_proxy(ECHO_BODY).await;

    let engine = engine(base_config(echo)).await;
    let result = engine.check(&format!("http://{proxy}")).await;

    assert!(result.ssrf.is_none());
    assert!(result.smuggling.is_none());
    assert!(result.nginx.is_none());
    assert!(result.advanced_ssrf.is_none());
}

#[tokio::test]
async fn test_all_enabled_flag_inventory() {
    // Guards the binary's --all-checks switch.
    let all = AdvancedChecks::all_enabled();
    assert!(all.any_enabled());
    assert!(!all.test_http_methods.is_empty());
}
