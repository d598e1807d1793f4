use std::collections::HashMap;
use std::time::Duration;

use campus_shared::UserId;
use serde::{Deserialize, Serialize};

/// Public profile of a conversation peer, as served by the user service.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeerProfile {
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub photo: Option<String>,
}

/// Best-effort lookups against the user service. Without a configured URL, or
/// when the service fails, profiles are simply absent.
#[derive(Debug, Clone)]
pub struct ProfileClient {
    http: reqwest::Client,
    base_url: Option<String>,
}

impl ProfileClient {
    pub fn new(http: reqwest::Client, base_url: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(reqwest::Client::new(), None)
    }

    pub async fn fetch(&self, user_ids: &[UserId]) -> HashMap<UserId, PeerProfile> {
        let Some(base_url) = &self.base_url else {
            return HashMap::new();
        };
        if user_ids.is_empty() {
            return HashMap::new();
        }

        let url = format!("{base_url}/internal/profiles/batch");
        let response = self
            .http
            .post(&url)
            .timeout(Duration::from_secs(3))
            .json(&serde_json::json!({ "userIds": user_ids }))
            .send()
            .await;

        let profiles = match response {
            Ok(resp) if resp.status().is_success() => resp.json::<Vec<PeerProfile>>().await,
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "user service rejected profile lookup");
                return HashMap::new();
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to fetch profiles from user service");
                return HashMap::new();
            }
        };

        match profiles {
            Ok(list) => list.into_iter().map(|p| (p.user_id, p)).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse profile lookup response");
                HashMap::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_client_returns_nothing() {
        let client = ProfileClient::disabled();
        assert!(client.fetch(&[1, 2]).await.is_empty());
    }

    #[tokio::test]
    async fn unreachable_service_is_not_an_error() {
        let client = ProfileClient::new(reqwest::Client::new(), Some("http://127.0.0.1:9/".into()));
        assert!(client.fetch(&[1]).await.is_empty());
    }
}
