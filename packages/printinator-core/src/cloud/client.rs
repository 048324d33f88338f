use super::types::{CloudPrinter, TokenResponse};
use crate::config::CloudConfig;
use crate::error::{FleetError, Result};
use serde::Deserialize;
use std::time::Duration;

/// HTTP client for the vendor REST API. Holds no session state; tokens are
/// passed in by [`super::CloudFleet`].
#[derive(Debug, Clone)]
pub struct CloudClient {
    base_url: String,
    client_id: String,
    client_secret: String,
    http: reqwest::Client,
}

/// Which OAuth grant to request.
#[derive(Debug, Clone, Copy)]
pub enum TokenGrant<'a> {
    Password { username: &'a str, password: &'a str },
    Refresh { username: &'a str, refresh_token: &'a str },
}

impl TokenGrant<'_> {
    pub fn grant_type(&self) -> &'static str {
        match self {
            TokenGrant::Password { .. } => "password",
            TokenGrant::Refresh { .. } => "refresh_token",
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

impl CloudClient {
    pub fn new(config: &CloudConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            http,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `POST /o/token/` with a password or refresh grant.
    pub async fn request_token(&self, grant: TokenGrant<'_>) -> Result<TokenResponse> {
        let url = format!("{}/o/token/", self.base_url);

        let mut form = vec![
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", grant.grant_type()),
        ];
        match grant {
            TokenGrant::Password { username, password } => {
                form.push(("username", username));
                form.push(("password", password));
            }
            TokenGrant::Refresh {
                username,
                refresh_token,
            } => {
                form.push(("username", username));
                form.push(("refresh_token", refresh_token));
            }
        }

        tracing::debug!("Requesting {} grant", grant.grant_type());
        let resp = self.http.post(&url).form(&form).send().await?;

        match resp.status().as_u16() {
            200 => resp
                .json::<TokenResponse>()
                .await
                .map_err(|e| FleetError::Network(format!("malformed token response: {}", e))),
            400 | 401 | 403 => {
                let status = resp.status();
                let reason = match resp.json::<TokenErrorResponse>().await {
                    Ok(err) => format!(
                        "{}: {}",
                        err.error,
                        err.error_description.unwrap_or_default()
                    ),
                    Err(_) => format!("server returned {}", status),
                };
                Err(FleetError::Auth(reason))
            }
            _ => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                Err(FleetError::Network(format!(
                    "token request returned {} - {}",
                    status, body
                )))
            }
        }
    }

    /// `POST /o/revoke_token/`.
    pub async fn revoke_token(&self, token: &str) -> Result<()> {
        let url = format!("{}/o/revoke_token/", self.base_url);

        let resp = self
            .http
            .post(&url)
            .form(&[
                ("token", token),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(FleetError::Auth(format!(
                "revoke returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    /// `GET /printers/` with a bearer token.
    pub async fn list_printers(&self, token: &str) -> Result<Vec<CloudPrinter>> {
        let url = format!("{}/printers/", self.base_url);

        let resp = self.http.get(&url).bearer_auth(token).send().await?;

        match resp.status().as_u16() {
            200 => resp
                .json::<Vec<CloudPrinter>>()
                .await
                .map_err(|e| FleetError::Network(format!("malformed printer list: {}", e))),
            401 | 403 => Err(FleetError::Auth(format!(
                "printer list rejected token ({})",
                resp.status()
            ))),
            _ => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                tracing::error!("Printer list failed: {} - {}", status, body);
                Err(FleetError::Network(format!(
                    "printer list returned {} - {}",
                    status, body
                )))
            }
        }
    }
}
