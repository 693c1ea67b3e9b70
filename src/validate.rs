//! Response validation predicates.
//!
//! Pure over (status, headers, body, config): the same inputs always yield
//! the same verdict, which keeps the validation runner and its tests
//! deterministic.

use reqwest::header::HeaderMap;

use crate::config::EngineConfig;

/// Apply the configured predicates to a validation response.
///
/// All predicates must pass; the first failure is returned as the reason.
pub fn validate_response(
    status: u16,
    headers: &HeaderMap,
    body: &str,
    config: &EngineConfig,
) -> Result<(), String> {
    match config.require_status_code {
        Some(required) => {
            if status != required {
                return Err(format!("status {status} != required {required}"));
            }
        }
        None => {
            if status >= 400 {
                return Err(format!("status {status} >= 400"));
            }
        }
    }

    if body.len() < config.min_response_bytes {
        return Err(format!(
            "body size {} below minimum {}",
            body.len(),
            config.min_response_bytes
        ));
    }

    for keyword in &config.disallowed_keywords {
        if body.contains(keyword.as_str()) {
            return Err(format!("body contains disallowed keyword '{keyword}'"));
        }
    }

    if let Some(required) = &config.require_content_match
        && !body.contains(required.as_str())
    {
        return Err(format!("body missing required content '{required}'"));
    }

    for field in &config.require_header_fields {
        let present = headers
            .get(field.as_str())
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| !v.is_empty());
        if !present {
            return Err(format!("required header '{field}' missing or empty"));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use reqwest::header::{HeaderMap, HeaderValue};

    use super::*;

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    #[test]
    fn test_default_config_accepts_plain_success() {
        let verdict = validate_response(200, &HeaderMap::new(), "ok", &config());
        assert!(verdict.is_ok());
    }

    #[test]
    fn test_status_400_and_above_fails() {
        let verdict = validate_response(403, &HeaderMap::new(), "denied", &config());
        assert!(verdict.unwrap_err().contains("403"));
    }

    #[test]
    fn test_required_status_overrides_default_threshold() {
        let cfg = EngineConfig {
            require_status_code: Some(407),
            ..config()
        };
        assert!(validate_response(407, &HeaderMap::new(), "", &cfg).is_ok());
        assert!(validate_response(200, &HeaderMap::new(), "", &cfg).is_err());
    }

    #[test]
    fn test_minimum_body_size() {
        let cfg = EngineConfig {
            min_response_bytes: 10,
            ..config()
        };
        assert!(validate_response(200, &HeaderMap::new(), "short", &cfg).is_err());
        assert!(validate_response(200, &HeaderMap::new(), "long enough body", &cfg).is_ok());
    }

    #[test]
    fn test_disallowed_keyword_is_case_sensitive() {
        let cfg = EngineConfig {
            disallowed_keywords: vec!["Access Denied".to_string()],
            ..config()
        };
        assert!(validate_response(200, &HeaderMap::new(), "Access Denied by policy", &cfg).is_err());
        // Different case does not match.
        assert!(validate_response(200, &HeaderMap::new(), "access denied by policy", &cfg).is_ok());
    }

    #[test]
    fn test_required_content_match() {
        let cfg = EngineConfig {
            require_content_match: Some("\"ip\"".to_string()),
            ..config()
        };
        assert!(validate_response(200, &HeaderMap::new(), r#"{"ip":"1.2.3.4"}"#, &cfg).is_ok());
        assert!(validate_response(200, &HeaderMap::new(), "plain text", &cfg).is_err());
    }

    #[test]
    fn test_required_headers_must_be_present_and_non_empty() {
        let cfg = EngineConfig {
            require_header_fields: vec!["content-type".to_string()],
            ..config()
        };

        assert!(validate_response(200, &HeaderMap::new(), "", &cfg).is_err());

        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static(""));
        assert!(validate_response(200, &headers, "", &cfg).is_err());

        headers.insert("content-type", HeaderValue::from_static("application/json"));
        assert!(validate_response(200, &headers, "", &cfg).is_ok());
    }

    #[test]
    fn test_validator_is_pure() {
        let cfg = EngineConfig {
            min_response_bytes: 3,
            ..config()
        };
        let first = validate_response(200, &HeaderMap::new(), "abcd", &cfg);
        let second = validate_response(200, &HeaderMap::new(), "abcd", &cfg);
        assert_eq!(first, second);
    }
}
