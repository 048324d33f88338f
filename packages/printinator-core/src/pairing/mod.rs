//! Knob-press pairing against a printer's HTTP auth endpoint.
//!
//! The printer hands out an answer code, waits for someone to press the knob
//! on the device, then exchanges the resulting auth code for a JSON-RPC
//! access token. The token is stored against the device address.

use crate::config::{LanConfig, PairingConfig};
use crate::error::{FleetError, Result};
use crate::store::{CredentialStore, DeviceAddress};
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Where a pairing attempt currently is, for the user waiting at the printer.
#[derive(Debug, Clone, PartialEq)]
pub enum PairingProgress {
    RequestingAnswerCode,
    WaitingForKnob { attempt: u32, max_attempts: u32 },
    RequestingToken,
    Paired,
}

pub type ProgressCallback = Box<dyn Fn(PairingProgress) + Send + Sync>;

#[derive(Debug, Default, Deserialize)]
struct AuthResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    answer_code: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

pub struct PairingFlow {
    http: reqwest::Client,
    store: CredentialStore,
    client_id: String,
    client_secret: String,
    auth_port: u16,
    poll_interval: Duration,
    max_attempts: u32,
    on_progress: Option<ProgressCallback>,
}

impl PairingFlow {
    pub fn new(lan: &LanConfig, pairing: &PairingConfig, store: CredentialStore) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            http,
            store,
            client_id: lan.client_id.clone(),
            client_secret: lan.client_secret.clone(),
            auth_port: lan.auth_port,
            poll_interval: pairing.poll_interval,
            max_attempts: pairing.max_attempts,
            on_progress: None,
        }
    }

    pub fn with_progress(mut self, callback: impl Fn(PairingProgress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    fn report(&self, progress: PairingProgress) {
        if let Some(callback) = &self.on_progress {
            callback(progress);
        }
    }

    fn auth_url(&self, address: &DeviceAddress) -> String {
        format!("http://{}:{}/auth", address.host, self.auth_port)
    }

    /// Run all three steps and store the resulting token.
    pub async fn pair(&self, address: &DeviceAddress, cancel: &CancellationToken) -> Result<String> {
        tracing::info!("Pairing with {}", address);

        let answer_code = self.request_answer_code(address, cancel).await?;
        let code = self.poll_for_code(address, &answer_code, cancel).await?;
        let token = self.request_token(address, &code, cancel).await?;

        self.store.set_device_token(&address.key(), Some(&token));
        self.report(PairingProgress::Paired);
        tracing::info!("Paired with {}", address);
        Ok(token)
    }

    /// One auth request, abandoned as soon as `cancel` fires.
    async fn get(
        &self,
        address: &DeviceAddress,
        query: &[(&str, &str)],
        cancel: &CancellationToken,
    ) -> Result<AuthResponse> {
        tokio::select! {
            response = self.send(address, query) => response,
            _ = cancel.cancelled() => {
                tracing::info!("Pairing with {} cancelled", address);
                Err(FleetError::Cancelled)
            }
        }
    }

    async fn send(&self, address: &DeviceAddress, query: &[(&str, &str)]) -> Result<AuthResponse> {
        let response = self
            .http
            .get(self.auth_url(address))
            .query(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .query(query)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }

    /// Step one: ask the printer for an answer code.
    pub async fn request_answer_code(
        &self,
        address: &DeviceAddress,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.report(PairingProgress::RequestingAnswerCode);

        let response = self.get(address, &[("response_type", "code")], cancel).await?;
        match response.answer_code.filter(|c| !c.is_empty()) {
            Some(code) => Ok(code),
            None => Err(FleetError::protocol(
                "auth code",
                format!("{} returned no answer code", address),
            )),
        }
    }

    /// Step two: wait for the knob press. Sleeps before every attempt; a
    /// failed request counts as still waiting. Cancellation interrupts both
    /// the sleep and an in-flight request.
    pub async fn poll_for_code(
        &self,
        address: &DeviceAddress,
        answer_code: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        for attempt in 1..=self.max_attempts {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = cancel.cancelled() => {
                    tracing::info!("Pairing with {} cancelled", address);
                    return Err(FleetError::Cancelled);
                }
            }

            self.report(PairingProgress::WaitingForKnob {
                attempt,
                max_attempts: self.max_attempts,
            });

            let query = [("response_type", "answer"), ("answer_code", answer_code)];
            match self.get(address, &query, cancel).await {
                Ok(AuthResponse {
                    answer: Some(_),
                    code: Some(code),
                    ..
                }) if !code.is_empty() => {
                    tracing::debug!("Knob pressed on {} after {} attempts", address, attempt);
                    return Ok(code);
                }
                Ok(_) => tracing::debug!("Waiting for knob press on {} ({})", address, attempt),
                Err(FleetError::Cancelled) => return Err(FleetError::Cancelled),
                Err(e) => tracing::debug!("Waiting for knob press on {}: {}", address, e),
            }
        }

        Err(FleetError::PairingTimeout {
            attempts: self.max_attempts,
        })
    }

    /// Step three: exchange the auth code for a JSON-RPC access token.
    pub async fn request_token(
        &self,
        address: &DeviceAddress,
        code: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.report(PairingProgress::RequestingToken);

        let query = [
            ("response_type", "token"),
            ("context", "jsonrpc"),
            ("auth_code", code),
        ];
        let response = self.get(address, &query, cancel).await?;
        match response.access_token.filter(|t| !t.is_empty()) {
            Some(token) => Ok(token),
            None => Err(FleetError::protocol(
                "auth token",
                format!("{} returned no access token", address),
            )),
        }
    }
}
