//! OAuth session and printer polling for the cloud fleet.

use super::client::{CloudClient, TokenGrant};
use super::types::CloudPrinter;
use crate::config::CloudConfig;
use crate::error::Result;
use crate::fleet::{FleetSink, FleetUpdate};
use crate::store::{CredentialStore, Login};
use chrono::Utc;
use std::sync::{Arc, Mutex, RwLock};

pub struct CloudFleet {
    client: CloudClient,
    store: CredentialStore,
    printers: RwLock<Arc<Vec<CloudPrinter>>>,
    /// Serializes token checks so one expiry triggers one grant
    token_lock: tokio::sync::Mutex<()>,
    /// Login as of the last settled credential change
    last_login: Mutex<Login>,
    sink: Option<FleetSink>,
}

impl CloudFleet {
    pub fn new(config: &CloudConfig, store: CredentialStore) -> Self {
        let last_login = store.credentials().login();
        Self {
            client: CloudClient::new(config),
            store,
            printers: RwLock::new(Arc::new(Vec::new())),
            token_lock: tokio::sync::Mutex::new(()),
            last_login: Mutex::new(last_login),
            sink: None,
        }
    }

    /// Publish every replaced printer list to the aggregator.
    pub fn with_sink(mut self, sink: FleetSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Current snapshot list.
    pub fn printers(&self) -> Arc<Vec<CloudPrinter>> {
        self.printers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn replace_printers(&self, printers: Vec<CloudPrinter>) {
        let printers = Arc::new(printers);
        *self
            .printers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = printers.clone();

        if let Some(sink) = &self.sink {
            sink.publish(FleetUpdate::Cloud(printers.as_ref().clone()));
        }
    }

    /// Acquire a token if the current one is missing or expired. Safe to call
    /// before every request.
    pub async fn ensure_valid_token(&self) -> Result<()> {
        let _guard = self.token_lock.lock().await;
        if self.store.credentials().token_is_valid(Utc::now()) {
            return Ok(());
        }
        self.acquire_token_locked().await
    }

    /// Request a new token: refresh grant when a refresh token is stored,
    /// password grant otherwise. Does nothing without a password.
    pub async fn acquire_token(&self) -> Result<()> {
        let _guard = self.token_lock.lock().await;
        self.acquire_token_locked().await
    }

    async fn acquire_token_locked(&self) -> Result<()> {
        let creds = self.store.credentials();
        let started = Utc::now();

        let response = if !creds.refresh_token.is_empty() {
            self.client
                .request_token(TokenGrant::Refresh {
                    username: &creds.username,
                    refresh_token: &creds.refresh_token,
                })
                .await
        } else if creds.has_login() {
            if !creds.access_token.is_empty() {
                if let Err(e) = self.revoke_token().await {
                    tracing::debug!("Ignoring failed revoke before password grant: {}", e);
                }
            }
            self.client
                .request_token(TokenGrant::Password {
                    username: &creds.username,
                    password: &creds.password,
                })
                .await
        } else {
            tracing::debug!("No cloud credentials yet, skipping token request");
            return Ok(());
        };

        match response {
            Ok(token) => {
                let expiry = started + chrono::Duration::seconds(token.expires_in);
                self.store
                    .set_tokens(&token.access_token, &token.refresh_token, expiry);
                tracing::info!("Cloud token acquired, expires at {}", expiry.to_rfc3339());
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Cloud token request failed: {}", e);
                Err(e)
            }
        }
    }

    /// Revoke the current access token. A no-op without a token; on success
    /// the token and the printer list are cleared.
    pub async fn revoke_token(&self) -> Result<()> {
        let token = self.store.credentials().access_token;
        if token.is_empty() {
            return Ok(());
        }

        match self.client.revoke_token(&token).await {
            Ok(()) => {
                self.store.clear_access_token();
                self.replace_printers(Vec::new());
                tracing::info!("Cloud token revoked");
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Revoking cloud token failed: {}", e);
                Err(e)
            }
        }
    }

    /// Fetch the printer list and replace the snapshot. Without a token after
    /// [`Self::ensure_valid_token`] this returns quietly.
    pub async fn fetch_printers(&self) -> Result<()> {
        self.ensure_valid_token().await?;

        let token = self.store.credentials().access_token;
        if token.is_empty() {
            tracing::debug!("No cloud token, skipping printer fetch");
            return Ok(());
        }

        let printers = self.client.list_printers(&token).await?;
        tracing::info!("Cloud fleet refreshed: {} printers", printers.len());
        self.replace_printers(printers);
        Ok(())
    }

    /// Periodic entry point: fetch only when a full login is stored. Errors
    /// are logged and the previous snapshot stays in place.
    pub async fn sync_printers(&self) {
        if !self.store.credentials().has_login() {
            tracing::debug!("Cloud login incomplete, not syncing");
            return;
        }
        if let Err(e) = self.fetch_printers().await {
            tracing::warn!("Cloud sync failed: {}", e);
        }
    }

    /// React to a settled username/password edit.
    pub async fn on_credentials_changed(&self, login: Login) {
        let previous = {
            let mut last = self
                .last_login
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *last, login.clone())
        };

        if previous == login {
            return;
        }

        if previous.password == login.password {
            tracing::info!("Cloud username changed");
            return;
        }

        tracing::info!("Cloud password changed, resetting session");
        if let Err(e) = self.revoke_token().await {
            tracing::debug!("Ignoring failed revoke after password change: {}", e);
        }
        self.store.clear_tokens();

        if login.is_complete() {
            self.sync_printers().await;
        }
    }

    /// Revoke the session and forget the stored login.
    pub async fn logout(&self) {
        if let Err(e) = self.revoke_token().await {
            tracing::warn!("Logging out without revoking token: {}", e);
        }
        self.store.clear_credentials();
        *self
            .last_login
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Login::default();
        self.replace_printers(Vec::new());
    }
}
