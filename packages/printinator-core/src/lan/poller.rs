use super::types::{HandshakeInfo, LanPrinter, SystemInformation};
use crate::config::LanConfig;
use crate::error::{FleetError, Result};
use crate::fleet::{FleetSink, FleetUpdate};
use crate::rpc::{RpcConnection, RpcValue};
use crate::store::{CredentialStore, DeviceAddress};
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tokio::sync::Mutex;

/// Runs poll cycles over the addresses in the credential store.
pub struct LanFleet {
    store: CredentialStore,
    concurrency: usize,
    rpc_timeout: Duration,
    sink: Option<FleetSink>,
    /// Held for the duration of a cycle
    cycle: Mutex<()>,
}

impl LanFleet {
    pub fn new(config: &LanConfig, store: CredentialStore) -> Self {
        Self {
            store,
            concurrency: config.poll_concurrency.max(1),
            rpc_timeout: config.rpc_timeout,
            sink: None,
            cycle: Mutex::new(()),
        }
    }

    pub fn with_sink(mut self, sink: FleetSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Poll every known device once and publish the resulting list.
    ///
    /// Returns `None` without touching any device when another cycle is
    /// still running. Devices that cannot be reached or fail the handshake
    /// are left out of the list.
    pub async fn poll_cycle(&self) -> Option<Vec<LanPrinter>> {
        let Ok(_guard) = self.cycle.try_lock() else {
            tracing::info!("LAN poll already in progress, skipping cycle");
            return None;
        };

        let devices = self.store.devices();
        tracing::debug!("Polling {} LAN printers", devices.len());

        let mut printers: Vec<LanPrinter> = stream::iter(devices)
            .map(|device| async move {
                match self.poll_device(&device).await {
                    Ok(printer) => Some(printer),
                    Err(e) => {
                        tracing::warn!("Dropping {} from this cycle: {}", device, e);
                        None
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .filter_map(|printer| async move { printer })
            .collect()
            .await;

        printers.sort_by(|a, b| a.address.cmp(&b.address));
        tracing::info!("LAN poll complete: {} printers reachable", printers.len());

        if let Some(sink) = &self.sink {
            sink.publish(FleetUpdate::Lan(printers.clone()));
        }
        Some(printers)
    }

    /// Build a snapshot of one device. Only connection and handshake
    /// failures are errors; everything after the handshake degrades the
    /// snapshot instead.
    pub async fn poll_device(&self, device: &DeviceAddress) -> Result<LanPrinter> {
        let key = device.key();
        let mut conn = RpcConnection::connect(&device.host, device.port, self.rpc_timeout).await?;

        let info: HandshakeInfo = conn
            .call("handshake", None)
            .await?
            .decode()
            .map_err(|e| FleetError::protocol("handshake", e.to_string()))?;

        let token = match device.pairing_token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => token.to_string(),
            None => {
                tracing::debug!("{} is not paired, skipping authentication", key);
                close(conn).await;
                return Ok(LanPrinter::from_handshake(&key, info, None));
            }
        };

        let params = RpcValue::object([("access_token", RpcValue::from(token.as_str()))]);
        match conn.call("authenticate", Some(params)).await {
            Ok(result) if result.as_bool() != Some(false) => {}
            Ok(_) | Err(FleetError::Protocol { .. }) => {
                if self.store.clear_device_token_if(&key, &token) {
                    tracing::warn!("{} rejected its pairing token, pair it again", key);
                } else {
                    tracing::info!("{} rejected a token that has since been replaced", key);
                }
                close(conn).await;
                return Ok(LanPrinter::from_handshake(&key, info, None));
            }
            Err(e) => return Err(e),
        }

        let mut printer = LanPrinter::from_handshake(&key, info, Some(token));
        printer.system_information = query(&mut conn, "get_system_information")
            .await
            .map(|value| SystemInformation::from_rpc(&value));
        printer.queue_status = query(&mut conn, "get_queue_status").await;
        printer.print_history = query(&mut conn, "get_print_history").await;
        printer.statistics = query(&mut conn, "get_statistics").await;

        close(conn).await;
        Ok(printer)
    }
}

async fn query(conn: &mut RpcConnection, method: &str) -> Option<RpcValue> {
    match conn.call(method, None).await {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!("{} failed on {}: {}", method, conn.peer(), e);
            None
        }
    }
}

async fn close(conn: RpcConnection) {
    let peer = conn.peer().to_string();
    if let Err(e) = conn.close().await {
        tracing::debug!("Error closing connection to {}: {}", peer, e);
    }
}
