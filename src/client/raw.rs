//! Hand-assembled HTTP requests over raw sockets.
//!
//! Several probe families need request shapes an RFC-compliant client will
//! not emit: conflicting `Content-Length`/`Transfer-Encoding` pairs, CR/LF
//! or NUL bytes inside header values, duplicate or malformed `Host` lines,
//! HTTP/1.0 downgrades, HTTP/2-style pseudo-header names. Those are
//! written directly to a `TcpStream` (optionally wrapped in TLS with an
//! attacker-chosen SNI) and the response head is parsed just enough to
//! classify the outcome.

use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::error::CheckError;

/// Cap on how much of a raw response is buffered.
const MAX_RAW_RESPONSE: usize = 64 * 1024;

/// A loosely parsed raw HTTP response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// Status code when the status line parsed.
    pub status: Option<u16>,
    /// Header lines as (lowercased-name, value) pairs.
    pub headers: Vec<(String, String)>,
    /// Everything after the header terminator, lossily decoded.
    pub body: String,
}

impl RawResponse {
    /// First value for a header, if present.
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// All values for a header.
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .filter(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

/// Assemble an HTTP/1.x request from arbitrary header lines.
///
/// `headers` entries are written verbatim (name, value) — including values
/// that embed CR/LF or NUL — which is the point of this module.
pub fn build_request(
    method: &str,
    target: &str,
    version: &str,
    headers: &[(&str, &str)],
    body: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(256 + body.len());
    out.extend_from_slice(format!("{method} {target} {version}\r\n").as_bytes());
    for (name, value) in headers {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

/// Transient I/O failures, mirrored from the transport classification the
/// reqwest path uses.
fn transient_io(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::HostUnreachable
            | std::io::ErrorKind::NetworkUnreachable
    )
}

/// Send raw bytes over plain TCP and parse whatever comes back.
pub async fn send(
    host: &str,
    port: u16,
    request: &[u8],
    timeout: Duration,
) -> Result<RawResponse, CheckError> {
    let addr = format!("{host}:{port}");
    let io = async {
        let mut stream = TcpStream::connect(&addr).await?;
        stream.write_all(request).await?;
        read_response(&mut stream).await
    };

    tokio::time::timeout(timeout, io)
        .await
        .map_err(|_| CheckError::RequestFailed {
            url: addr.clone(),
            reason: "i/o timeout".to_string(),
            transient: true,
        })?
        .map_err(|e: std::io::Error| CheckError::RequestFailed {
            url: addr,
            reason: e.to_string(),
            transient: transient_io(&e),
        })
}

/// Send raw bytes over TLS with an explicit SNI name.
///
/// The SNI may differ from the connect host — that mismatch is exactly
/// what the SNI-proxy probe exercises. Certificate verification is
/// disabled, matching the proxy clients.
pub async fn send_tls(
    host: &str,
    port: u16,
    sni: &str,
    request: &[u8],
    timeout: Duration,
) -> Result<RawResponse, CheckError> {
    let addr = format!("{host}:{port}");
    let server_name =
        ServerName::try_from(sni.to_string()).map_err(|e| CheckError::RequestFailed {
            url: addr.clone(),
            reason: format!("invalid SNI '{sni}': {e}"),
            transient: false,
        })?;

    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerification))
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));

    let io = async {
        let stream = TcpStream::connect(&addr).await?;
        let mut tls = connector
            .connect(server_name, stream)
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        tls.write_all(request).await?;
        read_response(&mut tls).await
    };

    tokio::time::timeout(timeout, io)
        .await
        .map_err(|_| CheckError::RequestFailed {
            url: addr.clone(),
            reason: "i/o timeout".to_string(),
            transient: true,
        })?
        .map_err(|e: std::io::Error| CheckError::RequestFailed {
            url: addr,
            reason: e.to_string(),
            transient: transient_io(&e),
        })
}

async fn read_response<S>(stream: &mut S) -> std::io::Result<RawResponse>
where
    S: tokio::io::AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() >= MAX_RAW_RESPONSE {
            buf.truncate(MAX_RAW_RESPONSE);
            break;
        }
    }
    Ok(parse_response(&buf))
}

/// Tolerant response parse: bad lines are skipped, not fatal.
fn parse_response(raw: &[u8]) -> RawResponse {
    let text = String::from_utf8_lossy(raw);
    let (head, body) = match text.find("\r\n\r\n") {
        Some(idx) => (&text[..idx], &text[idx + 4..]),
        None => (text.as_ref(), ""),
    };

    let mut lines = head.lines();
    let status = lines
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok());

    let headers = lines
        .filter_map(|line| {
            line.split_once(':')
                .map(|(n, v)| (n.trim().to_ascii_lowercase(), v.trim().to_string()))
        })
        .collect();

    RawResponse {
        status,
        headers,
        body: body.to_string(),
    }
}

/// Accepts any server certificate. Raw probes talk to endpoints that are
/// expected to present self-signed or mismatched certificates.
#[derive(Debug)]
struct NoVerification;

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_writes_headers_verbatim() {
        let req = build_request(
            "POST",
            "/",
            "HTTP/1.1",
            &[
                ("Host", "victim.example"),
                ("Content-Length", "4"),
                ("Transfer-Encoding", "chunked"),
            ],
            b"0\r\n\r\n",
        );
        let text = String::from_utf8(req).unwrap();
        assert!(text.starts_with("POST / HTTP/1.1\r\n"));
        assert!(text.contains("Content-Length: 4\r\n"));
        assert!(text.contains("Transfer-Encoding: chunked\r\n"));
        assert!(text.ends_with("\r\n\r\n0\r\n\r\n"));
    }

    #[test]
    fn test_build_request_allows_crlf_in_values() {
        let req = build_request(
            "GET",
            "/",
            "HTTP/1.1",
            &[("X-Injected", "a\r\nX-Smuggled: b")],
            b"",
        );
        let text = String::from_utf8(req).unwrap();
        assert!(text.contains("X-Injected: a\r\nX-Smuggled: b\r\n"));
    }

    #[test]
    fn test_parse_response_extracts_status_headers_body() {
        let raw = b"HTTP/1.1 301 Moved Permanently\r\nServer: nginx/1.18.0\r\nLocation: /login\r\n\r\n<html>moved</html>";
        let resp = parse_response(raw);
        assert_eq!(resp.status, Some(301));
        assert_eq!(resp.header("server"), Some("nginx/1.18.0"));
        assert_eq!(resp.header("Location"), Some("/login"));
        assert_eq!(resp.body, "<html>moved</html>");
    }

    #[test]
    fn test_parse_response_tolerates_garbage() {
        let resp = parse_response(b"not http at all");
        assert_eq!(resp.status, None);
        assert!(resp.headers.is_empty());
    }

    #[test]
    fn test_header_values_collects_duplicates() {
        let raw = b"HTTP/1.1 200 OK\r\nVia: 1.1 hop1\r\nVia: 1.1 hop2\r\n\r\n";
        let resp = parse_response(raw);
        assert_eq!(resp.header_values("via"), vec!["1.1 hop1", "1.1 hop2"]);
    }

    #[tokio::test]
    async fn test_send_against_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                .await;
        });

        let req = build_request("GET", "/", "HTTP/1.1", &[("Host", "localhost")], b"");
        let resp = send(&addr.ip().to_string(), addr.port(), &req, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(resp.status, Some(200));
        assert_eq!(resp.body, "ok");
    }
}
