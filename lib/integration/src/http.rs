//! Response handling shared by the REST clients.

use crate::error::ConnectorError;
use reqwest::{Response, StatusCode};
use rootcause::prelude::Report;
use serde::de::DeserializeOwned;

const BODY_EXCERPT: usize = 512;

/// Builds the shared HTTP client.
pub(crate) fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(concat!("missionctl/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
}

/// Maps a non-success response to a `ConnectorError`, naming `resource` on 403/404.
pub(crate) async fn check(
    response: Response,
    resource: &str,
) -> Result<Response, Report<ConnectorError>> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after_secs = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());
    let mut body = response.text().await.unwrap_or_default();
    body.truncate(floor_char_boundary(&body, BODY_EXCERPT));

    let err = match status {
        StatusCode::UNAUTHORIZED => ConnectorError::AuthenticationFailed { reason: body },
        StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => ConnectorError::AccessDenied {
            resource: resource.to_string(),
        },
        StatusCode::TOO_MANY_REQUESTS => ConnectorError::RateLimited { retry_after_secs },
        _ => ConnectorError::UnexpectedStatus {
            status: status.as_u16(),
            body,
        },
    };
    Err(err.into())
}

/// Decodes a JSON body.
pub(crate) async fn json<T: DeserializeOwned>(
    response: Response,
) -> Result<T, Report<ConnectorError>> {
    Ok(response
        .json::<T>()
        .await
        .map_err(|e| ConnectorError::protocol(format!("invalid response body: {e}")))?)
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    (0..=max).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}
