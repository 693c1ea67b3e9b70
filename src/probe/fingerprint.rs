//! Proxy software identification.
//!
//! Three evidence sources, combined into a weighted score per vendor:
//! response headers of a normal request, the error page elicited by a
//! malformed Host, and a handful of behavior probes (duplicate Host
//! handling, underscore header names, encoded-slash paths). The highest
//! scoring vendor wins; scores are additive and clamped to [0, 1], and
//! anything below 0.3 reports as unknown.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::client::raw;
use crate::probe::{ProbeContext, PROBE_TIMEOUT};
use crate::report::Fingerprint;

/// Scores below this report as unknown.
const MIN_CONFIDENCE: f64 = 0.3;

struct VendorSignature {
    software: &'static str,
    /// Header names whose mere presence is an indicator.
    marker_headers: &'static [&'static str],
    /// (header name, value regex) pairs.
    header_patterns: &'static [(&'static str, &'static str)],
    /// Error-page and body regexes.
    body_patterns: &'static [&'static str],
    /// Score added per matched indicator.
    weight: f64,
}

const SIGNATURES: &[VendorSignature] = &[
    VendorSignature {
        software: "nginx",
        marker_headers: &[],
        header_patterns: &[("server", r"(?i)^nginx")],
        body_patterns: &[r"<hr><center>nginx(/[\d.]+)?</center>", r"(?i)<title>\d{3}[^<]*nginx"],
        weight: 0.45,
    },
    VendorSignature {
        software: "apache",
        marker_headers: &[],
        header_patterns: &[("server", r"(?i)apache")],
        body_patterns: &[r"(?i)<address>Apache[^<]*</address>", r"(?i)Apache/[\d.]+ \(.+\) Server at"],
        weight: 0.45,
    },
    VendorSignature {
        software: "haproxy",
        marker_headers: &[],
        header_patterns: &[("server", r"(?i)haproxy")],
        body_patterns: &[r"<html><body><h1>50[0-3] [A-Za-z ]+</h1>\s*No server is available"],
        weight: 0.4,
    },
    VendorSignature {
        software: "varnish",
        marker_headers: &["x-varnish"],
        header_patterns: &[("via", r"(?i)varnish")],
        body_patterns: &[r"(?i)Error 503 Backend fetch failed", r"(?i)guru meditation"],
        weight: 0.4,
    },
    VendorSignature {
        software: "envoy",
        marker_headers: &["x-envoy-upstream-service-time"],
        header_patterns: &[("server", r"(?i)^envoy$")],
        body_patterns: &[r"(?i)upstream connect error or disconnect/reset"],
        weight: 0.45,
    },
    VendorSignature {
        software: "traefik",
        marker_headers: &[],
        header_patterns: &[("server", r"(?i)traefik")],
        body_patterns: &[r"^404 page not found\s*$"],
        weight: 0.35,
    },
    VendorSignature {
        software: "caddy",
        marker_headers: &[],
        header_patterns: &[("server", r"(?i)^caddy$")],
        body_patterns: &[],
        weight: 0.5,
    },
    VendorSignature {
        software: "cloudflare",
        marker_headers: &["cf-ray", "cf-cache-status"],
        header_patterns: &[("server", r"(?i)cloudflare")],
        body_patterns: &[r"(?i)cloudflare", r"(?i)attention required!"],
        weight: 0.35,
    },
    VendorSignature {
        software: "fastly",
        marker_headers: &["x-served-by", "x-timer"],
        header_patterns: &[("via", r"(?i)fastly")],
        body_patterns: &[r"(?i)Fastly error: unknown domain"],
        weight: 0.35,
    },
    VendorSignature {
        software: "aws",
        marker_headers: &["x-amz-cf-id", "x-amzn-requestid", "x-amzn-trace-id"],
        header_patterns: &[("server", r"(?i)awselb|cloudfront")],
        body_patterns: &[r"(?i)Generated by cloudfront"],
        weight: 0.4,
    },
    VendorSignature {
        software: "kong",
        marker_headers: &["x-kong-proxy-latency", "x-kong-upstream-latency"],
        header_patterns: &[("server", r"(?i)kong")],
        body_patterns: &[r#"(?i)"message"\s*:\s*"no Route matched"#],
        weight: 0.45,
    },
    VendorSignature {
        software: "squid",
        marker_headers: &["x-squid-error"],
        header_patterns: &[("server", r"(?i)squid"), ("via", r"(?i)squid")],
        body_patterns: &[r"(?i)ERR_ACCESS_DENIED", r"(?i)generated [^<]+ by [^<]+ \(squid"],
        weight: 0.45,
    },
];

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(nginx|apache|haproxy|varnish|envoy|traefik|caddy|squid|kong|cloudflare)[/ ]v?([0-9]+(?:\.[0-9]+)+)",
        )
        .expect("static version regex")
    })
}

/// Extract `software/version` from a Server header or error body.
pub fn extract_version(text: &str) -> Option<(String, String)> {
    version_regex().captures(text).map(|caps| {
        (
            caps[1].to_ascii_lowercase(),
            caps[2].to_string(),
        )
    })
}

/// Evidence collected from one response.
#[derive(Default)]
struct Evidence {
    /// (lowercased header name, value) pairs.
    headers: Vec<(String, String)>,
    body: String,
}

impl Evidence {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

fn score_signature(sig: &VendorSignature, evidence: &Evidence) -> f64 {
    let mut score = 0.0;
    for marker in sig.marker_headers {
        if evidence.header(marker).is_some() {
            score += sig.weight;
        }
    }
    for (header, pattern) in sig.header_patterns {
        if let Some(value) = evidence.header(header)
            && Regex::new(pattern).is_ok_and(|re| re.is_match(value))
        {
            score += sig.weight;
        }
    }
    for pattern in sig.body_patterns {
        if Regex::new(pattern).is_ok_and(|re| re.is_match(&evidence.body)) {
            score += sig.weight * 0.8;
        }
    }
    score
}

/// Identify the software serving `base_url` and store the fingerprint.
pub async fn run(ctx: &mut ProbeContext<'_>, base_url: &str) {
    let mut evidence_set: Vec<Evidence> = Vec::new();

    // Normal request.
    if let Ok(response) = ctx.get(base_url).await {
        evidence_set.push(Evidence {
            headers: response
                .headers
                .iter()
                .filter_map(|(n, v)| v.to_str().ok().map(|v| (n.as_str().to_string(), v.to_string())))
                .collect(),
            body: response.body,
        });
    }

    // Error page elicited by a Host value no virtual host will claim.
    let error_req = raw::build_request(
        "GET",
        "/",
        "HTTP/1.1",
        &[("Host", "%%invalid..host%%"), ("Connection", "close")],
        b"",
    );
    if let Ok(response) = ctx.send_raw("fingerprint:invalid-host", &error_req, PROBE_TIMEOUT).await {
        evidence_set.push(Evidence {
            headers: response.headers.clone(),
            body: response.body,
        });
    }

    let mut scores: Vec<(usize, f64)> = SIGNATURES
        .iter()
        .enumerate()
        .map(|(i, sig)| {
            let total = evidence_set.iter().map(|e| score_signature(sig, e)).sum();
            (i, total)
        })
        .collect();

    // Behavior probes refine the header evidence.
    apply_behavior_scores(ctx, &mut scores).await;

    let (best_idx, best_score) = scores
        .into_iter()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .unwrap_or((0, 0.0));

    let confidence = best_score.clamp(0.0, 1.0);
    if confidence < MIN_CONFIDENCE {
        ctx.result.fingerprint = Some(Fingerprint::unknown());
        return;
    }

    let software = SIGNATURES[best_idx].software.to_string();
    let version = evidence_set.iter().find_map(|e| {
        e.header("server")
            .and_then(extract_version_for(&software))
            .or_else(|| extract_version_for(&software)(&e.body))
    });

    ctx.result.fingerprint = Some(Fingerprint {
        software,
        version,
        confidence,
    });
}

/// Version extractor bound to one vendor so a Via header naming another
/// hop does not pollute the result.
fn extract_version_for(software: &str) -> impl Fn(&str) -> Option<String> + '_ {
    move |text| {
        extract_version(text)
            .filter(|(name, _)| name == software)
            .map(|(_, version)| version)
    }
}

fn bump(software: &str, amount: f64, scores: &mut [(usize, f64)]) {
    if let Some(idx) = SIGNATURES.iter().position(|s| s.software == software) {
        for (i, score) in scores.iter_mut() {
            if *i == idx {
                *score += amount;
            }
        }
    }
}

async fn apply_behavior_scores(ctx: &mut ProbeContext<'_>, scores: &mut [(usize, f64)]) {
    // Duplicate Host: strict front-ends reject with 400.
    let dup_host = raw::build_request(
        "GET",
        "/",
        "HTTP/1.1",
        &[
            ("Host", "a.example"),
            ("Host", "b.example"),
            ("Connection", "close"),
        ],
        b"",
    );
    if let Ok(response) = ctx
        .send_raw("fingerprint:duplicate-host", &dup_host, PROBE_TIMEOUT)
        .await
    {
        match response.status {
            Some(400) => {
                bump("nginx", 0.15, scores);
                bump("haproxy", 0.1, scores);
            }
            Some(s) if s < 400 => bump("squid", 0.1, scores),
            _ => {}
        }
    }

    // Underscore header names: haproxy rejects outright, nginx silently
    // drops them and answers normally.
    let base = ctx.self_base();
    if let Ok(response) = ctx
        .get_with_headers(&base, &[("x_probe_name", "1")])
        .await
        && response.status == 400
    {
        bump("haproxy", 0.1, scores);
    }

    // Encoded slash in the path.
    let encoded = format!("{}/%2f", ctx.self_base());
    if let Ok(response) = ctx
        .send(
            reqwest::Method::GET,
            &encoded,
            &[],
            None,
            Duration::from_secs(2),
        )
        .await
    {
        match response.status {
            404 => bump("nginx", 0.05, scores),
            400 => bump("apache", 0.05, scores),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evidence(headers: &[(&str, &str)], body: &str) -> Evidence {
        Evidence {
            headers: headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
            body: body.to_string(),
        }
    }

    fn score_for(software: &str, e: &Evidence) -> f64 {
        let sig = SIGNATURES
            .iter()
            .find(|s| s.software == software)
            .expect("known vendor");
        score_signature(sig, e)
    }

    #[test]
    fn test_nginx_error_page_scores() {
        let e = evidence(
            &[("server", "nginx/1.18.0")],
            "<html><head><title>404 Not Found</title></head><body><center><h1>404 Not Found</h1></center><hr><center>nginx/1.18.0</center></body></html>",
        );
        assert!(score_for("nginx", &e) >= 0.45);
        assert!(score_for("apache", &e) == 0.0);
    }

    #[test]
    fn test_varnish_marker_headers_score() {
        let e = evidence(&[("x-varnish", "1234 5678"), ("via", "1.1 varnish (Varnish/6.0)")], "");
        assert!(score_for("varnish", &e) >= 0.8);
    }

    #[test]
    fn test_version_extraction() {
        assert_eq!(
            extract_version("nginx/1.18.0"),
            Some(("nginx".to_string(), "1.18.0".to_string()))
        );
        assert_eq!(
            extract_version("Apache/2.4.41 (Ubuntu) Server at localhost"),
            Some(("apache".to_string(), "2.4.41".to_string()))
        );
        assert_eq!(extract_version("gws"), None);
    }

    #[test]
    fn test_vendor_bound_extractor_ignores_other_hops() {
        let extract = extract_version_for("squid");
        assert_eq!(extract("nginx/1.18.0"), None);
        assert_eq!(extract("squid/4.13"), Some("4.13".to_string()));
    }
}
