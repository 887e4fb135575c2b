//! Google Sheets access probe with OAuth token refresh.

use crate::error::ConnectorError;
use crate::http;
use reqwest::StatusCode;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// Default Sheets API base URL.
pub const DEFAULT_API_BASE: &str = "https://sheets.googleapis.com";
/// Default OAuth token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// How the sheet credentials were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetsAuthMode {
    /// User-consented OAuth2 tokens; the access token may be refreshed.
    #[serde(rename = "oauth2")]
    OAuth2,
    /// A bare access token; no refresh is attempted.
    AccessToken,
}

/// Access/refresh token pair for a sheet.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetCredentials {
    pub auth_mode: SheetsAuthMode,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for SheetCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SheetCredentials")
            .field("auth_mode", &self.auth_mode)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// OAuth client registration used for token refresh.
#[derive(Debug, Clone)]
pub struct OAuthApp {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
}

/// Basic sheet facts returned by the access probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetInfo {
    pub spreadsheet_id: String,
    pub title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpreadsheetResponse {
    spreadsheet_id: String,
    #[serde(default)]
    properties: Option<SpreadsheetProperties>,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetProperties {
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Sheets API client.
pub struct SheetsClient {
    http: reqwest::Client,
    api_base: String,
    oauth: Option<OAuthApp>,
}

impl SheetsClient {
    /// Creates a client. Without an [`OAuthApp`] expired tokens cannot be refreshed.
    #[must_use]
    pub fn new(api_base: impl Into<String>, oauth: Option<OAuthApp>) -> Self {
        Self {
            http: http::client(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            oauth,
        }
    }

    /// Checks that `credentials` can read `sheet_id`.
    ///
    /// In OAuth2 mode a 401 triggers one refresh-token exchange; the new
    /// access token is written back into `credentials` before the retry.
    ///
    /// # Errors
    ///
    /// Returns an error if access is denied, the refresh fails, or the API is unreachable.
    #[instrument(skip(self, credentials))]
    pub async fn verify_access(
        &self,
        sheet_id: &str,
        credentials: &mut SheetCredentials,
    ) -> Result<SheetInfo, Report<ConnectorError>> {
        let response = self.fetch(sheet_id, &credentials.access_token).await?;
        let response = if response.status() == StatusCode::UNAUTHORIZED
            && credentials.auth_mode == SheetsAuthMode::OAuth2
        {
            debug!("access token rejected, refreshing");
            credentials.access_token = self.refresh(credentials).await?;
            self.fetch(sheet_id, &credentials.access_token).await?
        } else {
            response
        };

        let response = http::check(response, &format!("spreadsheet {sheet_id}")).await?;
        let sheet: SpreadsheetResponse = http::json(response).await?;
        info!(spreadsheet_id = %sheet.spreadsheet_id, "verified spreadsheet access");
        Ok(SheetInfo {
            spreadsheet_id: sheet.spreadsheet_id,
            title: sheet.properties.map(|p| p.title).unwrap_or_default(),
        })
    }

    async fn fetch(
        &self,
        sheet_id: &str,
        access_token: &str,
    ) -> Result<reqwest::Response, Report<ConnectorError>> {
        Ok(self
            .http
            .get(format!("{}/v4/spreadsheets/{sheet_id}", self.api_base))
            .query(&[("fields", "spreadsheetId,properties.title")])
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(ConnectorError::connection)?)
    }

    async fn refresh(
        &self,
        credentials: &SheetCredentials,
    ) -> Result<String, Report<ConnectorError>> {
        let Some(oauth) = &self.oauth else {
            return Err(ConnectorError::AuthenticationFailed {
                reason: "access token expired and no oauth client is configured".to_string(),
            }
            .into());
        };
        let Some(refresh_token) = credentials.refresh_token.as_deref() else {
            return Err(ConnectorError::AuthenticationFailed {
                reason: "access token expired and no refresh token was supplied".to_string(),
            }
            .into());
        };

        let response = self
            .http
            .post(&oauth.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", oauth.client_id.as_str()),
                ("client_secret", oauth.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(ConnectorError::connection)?;
        if response.status().is_client_error() {
            return Err(ConnectorError::AuthenticationFailed {
                reason: "refresh token rejected".to_string(),
            }
            .into());
        }
        let response = http::check(response, "oauth token endpoint").await?;
        let token: TokenResponse = http::json(response).await?;
        Ok(token.access_token)
    }
}
