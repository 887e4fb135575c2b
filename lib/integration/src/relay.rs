//! Watcher relay client.
//!
//! The relay hosts spreadsheet watchers outside this process. Registering a
//! watcher hands it a callback URL; the relay posts change notifications
//! there until the watcher is disabled.

use crate::error::ConnectorError;
use crate::http;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Identity of a watcher hosted by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WatcherId(pub String);

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bounded retry for watcher registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Wait between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(5),
        }
    }
}

/// A watcher registration request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchRequest<'a> {
    pub sheet_id: &'a str,
    pub callback_url: &'a str,
    pub access_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatchResponse {
    watcher_id: String,
}

/// Relay client.
#[derive(Clone)]
pub struct RelayClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl RelayClient {
    /// Creates a relay client.
    #[must_use]
    pub fn new(base_url: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            http: http::client(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry,
        }
    }

    /// Registers a watcher, retrying per the client's [`RetryPolicy`].
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::RetriesExhausted`] once every attempt has failed.
    #[instrument(skip(self, request), fields(sheet_id = %request.sheet_id))]
    pub async fn register_watcher(
        &self,
        request: &WatchRequest<'_>,
    ) -> Result<WatcherId, Report<ConnectorError>> {
        let attempts = self.retry.attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.try_register(request).await {
                Ok(watcher_id) => {
                    info!(%watcher_id, attempt, "registered relay watcher");
                    return Ok(watcher_id);
                }
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "relay watcher registration failed");
                    last_error = e.to_string();
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.retry.backoff).await;
            }
        }
        Err(ConnectorError::RetriesExhausted {
            attempts,
            last_error,
        }
        .into())
    }

    async fn try_register(
        &self,
        request: &WatchRequest<'_>,
    ) -> Result<WatcherId, Report<ConnectorError>> {
        let response = self
            .http
            .post(format!("{}/watchers", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(ConnectorError::connection)?;
        let response = http::check(response, "relay watchers").await?;
        let body: WatchResponse = http::json(response).await?;
        Ok(WatcherId(body.watcher_id))
    }

    /// Disables a watcher. Not retried.
    ///
    /// # Errors
    ///
    /// Returns an error if the relay rejects the call or is unreachable.
    #[instrument(skip(self))]
    pub async fn disable_watcher(&self, watcher_id: &WatcherId) -> Result<(), Report<ConnectorError>> {
        let response = self
            .http
            .post(format!("{}/watchers/{watcher_id}/disable", self.base_url))
            .send()
            .await
            .map_err(ConnectorError::connection)?;
        http::check(response, &format!("relay watcher {watcher_id}")).await?;
        info!(%watcher_id, "disabled relay watcher");
        Ok(())
    }
}
