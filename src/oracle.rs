//! Out-of-band interaction oracle client.
//!
//! Wraps an Interactsh-style callback server: each probe gets a unique
//! subdomain under the configured server, a background task polls for
//! recorded interactions (DNS, HTTP, SMTP hits), and a probe counts as a
//! finding iff an interaction for its subdomain arrives within the await
//! window. When the oracle is disabled or registration fails, families
//! fall back to their basic variants against a public surrogate domain.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::CheckError;

/// How long an oracle-wrapped probe waits for its callback.
pub const OOB_AWAIT: Duration = Duration::from_secs(2);
/// Poll cadence of the background task.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// One recorded out-of-band interaction.
#[derive(Debug, Clone, Deserialize)]
pub struct Interaction {
    /// dns, http or smtp.
    #[serde(default)]
    pub protocol: String,
    /// The subdomain label that was hit.
    #[serde(rename = "unique-id", default)]
    pub unique_id: String,
    /// Peer that triggered the interaction.
    #[serde(rename = "remote-address", default)]
    pub remote_address: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct PollPayload {
    #[serde(default)]
    data: Vec<Interaction>,
}

/// Live connection to an interaction server.
pub struct OracleHandle {
    server_url: String,
    /// Domain under which callback subdomains are generated.
    server_domain: String,
    correlation_id: String,
    interactions: Arc<Mutex<HashMap<String, Vec<Interaction>>>>,
    poller: JoinHandle<()>,
}

impl OracleHandle {
    /// Register with the configured server and start polling.
    pub async fn connect(
        server_url: &str,
        token: Option<&SecretString>,
    ) -> Result<Self, CheckError> {
        let server_url = server_url.trim_end_matches('/').to_string();
        let server_domain = url::Url::parse(&server_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .ok_or_else(|| CheckError::OracleUnavailable {
                reason: format!("bad server URL '{server_url}'"),
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CheckError::OracleUnavailable {
                reason: e.to_string(),
            })?;

        let correlation_id = Uuid::new_v4().simple().to_string();
        let mut register = client.post(format!("{server_url}/register")).json(
            &serde_json::json!({ "correlation-id": correlation_id.as_str() }),
        );
        if let Some(token) = token {
            register = register.header("Authorization", token.expose_secret());
        }
        let response = register
            .send()
            .await
            .map_err(|e| CheckError::OracleUnavailable {
                reason: format!("registration failed: {e}"),
            })?;
        if !response.status().is_success() {
            return Err(CheckError::OracleUnavailable {
                reason: format!("registration returned HTTP {}", response.status().as_u16()),
            });
        }

        let interactions: Arc<Mutex<HashMap<String, Vec<Interaction>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let poller = {
            let interactions = Arc::clone(&interactions);
            let poll_url = format!("{server_url}/poll");
            let correlation = correlation_id.clone();
            let auth = token.map(|t| t.expose_secret().to_string());
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(POLL_INTERVAL).await;
                    let mut request = client
                        .get(&poll_url)
                        .query(&[("id", correlation.as_str())]);
                    if let Some(auth) = &auth {
                        request = request.header("Authorization", auth);
                    }
                    let Ok(response) = request.send().await else {
                        continue;
                    };
                    let Ok(payload) = response.json::<PollPayload>().await else {
                        continue;
                    };
                    if payload.data.is_empty() {
                        continue;
                    }
                    let mut store = interactions.lock().await;
                    for interaction in payload.data {
                        store
                            .entry(interaction.unique_id.to_ascii_lowercase())
                            .or_default()
                            .push(interaction);
                    }
                }
            })
        };

        tracing::debug!("Interaction oracle registered against {server_domain}");

        Ok(Self {
            server_url,
            server_domain,
            correlation_id,
            interactions,
            poller,
        })
    }

    /// Generate a fresh correlation URL. Returns (url, id); interactions
    /// for the probe are keyed by the id.
    pub fn generate_url(&self) -> (String, String) {
        let label = format!(
            "{}{}",
            &self.correlation_id[..12.min(self.correlation_id.len())],
            Uuid::new_v4().simple().to_string().split_at(8).0
        );
        let url = format!("http://{label}.{}/", self.server_domain);
        (url, label)
    }

    /// Wait up to `timeout` for interactions recorded under `id`.
    pub async fn await_interactions(&self, id: &str, timeout: Duration) -> Vec<Interaction> {
        let id = id.to_ascii_lowercase();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let store = self.interactions.lock().await;
                if let Some(hits) = store.get(&id)
                    && !hits.is_empty()
                {
                    return hits.clone();
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Vec::new();
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Run an oracle-wrapped probe: `send` receives the generated URL and
    /// issues the request; the probe succeeds iff any interaction for the
    /// generated id is observed within the await window.
    pub async fn observe<F, Fut>(&self, send: F) -> bool
    where
        F: FnOnce(String) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let (url, id) = self.generate_url();
        send(url).await;
        !self.await_interactions(&id, OOB_AWAIT).await.is_empty()
    }

    /// The server this handle is registered against.
    pub fn server(&self) -> &str {
        &self.server_url
    }

    /// Stop polling. Interactions already collected remain readable.
    pub fn close(&self) {
        self.poller.abort();
    }
}

impl Drop for OracleHandle {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn handle_with_store() -> OracleHandle {
        // A handle wired to a dummy task; exercises the store and URL
        // generation without a live server.
        OracleHandle {
            server_url: "https://oast.example".to_string(),
            server_domain: "oast.example".to_string(),
            correlation_id: Uuid::new_v4().simple().to_string(),
            interactions: Arc::new(Mutex::new(HashMap::new())),
            poller: tokio::spawn(async {}),
        }
    }

    #[tokio::test]
    async fn test_generate_url_is_unique_per_call() {
        let handle = handle_with_store().await;
        let (url1, id1) = handle.generate_url();
        let (url2, id2) = handle.generate_url();
        assert_ne!(id1, id2);
        assert_ne!(url1, url2);
        assert!(url1.ends_with(".oast.example/"));
    }

    #[tokio::test]
    async fn test_await_interactions_returns_recorded_hits() {
        let handle = handle_with_store().await;
        let (_, id) = handle.generate_url();

        handle.interactions.lock().await.insert(
            id.clone(),
            vec![Interaction {
                protocol: "dns".to_string(),
                unique_id: id.clone(),
                remote_address: "198.51.100.9".to_string(),
                timestamp: Utc::now(),
            }],
        );

        let hits = handle.await_interactions(&id, Duration::from_millis(200)).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].protocol, "dns");
    }

    #[tokio::test]
    async fn test_await_interactions_times_out_empty() {
        let handle = handle_with_store().await;
        let hits = handle
            .await_interactions("nothing-here", Duration::from_millis(50))
            .await;
        assert!(hits.is_empty());
    }
}
