//! Service discovery for LAN printers.
//!
//! Browsing itself is behind [`ServiceBrowser`]; the agent only resolves
//! what the browser reports into `host:port` entries in the credential
//! store. Discovery adds addresses and never removes them.

mod browser;

pub use browser::{BrowseEvent, DiscoveredService, ServiceBrowser, StaticBrowser};

use crate::config::{LanConfig, DEFAULT_RPC_PORT};
use crate::error::{FleetError, Result};
use crate::store::{CredentialStore, DeviceAddress};
use futures::StreamExt;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Session {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns at most one browse session at a time.
pub struct DiscoveryAgent {
    store: CredentialStore,
    browser: Arc<dyn ServiceBrowser>,
    service_type: String,
    domain: String,
    session: Mutex<Option<Session>>,
}

impl DiscoveryAgent {
    pub fn new(config: &LanConfig, store: CredentialStore, browser: Arc<dyn ServiceBrowser>) -> Self {
        Self {
            store,
            browser,
            service_type: config.service_type.clone(),
            domain: config.domain.clone(),
            session: Mutex::new(None),
        }
    }

    /// Start browsing, stopping any session that is already running.
    pub fn start(&self) {
        self.stop();

        let cancel = CancellationToken::new();
        let mut events = self.browser.browse(&self.service_type, &self.domain);
        let store = self.store.clone();
        let session_cancel = cancel.clone();

        tracing::info!("Browsing for {} in {}", self.service_type, self.domain);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.next() => match event {
                        Some(event) => {
                            if let Err(e) = handle_event(&store, event) {
                                tracing::warn!("{}", e);
                            }
                        }
                        None => {
                            tracing::debug!("Service browser finished");
                            break;
                        }
                    },
                    _ = session_cancel.cancelled() => break,
                }
            }
        });

        *self.lock() = Some(Session { cancel, task });
    }

    /// Stop the running session, if any.
    pub fn stop(&self) {
        if let Some(session) = self.lock().take() {
            session.cancel.cancel();
            session.task.abort();
            tracing::debug!("Stopped previous browse session");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|session| !session.task.is_finished())
    }

    /// Register one resolved service directly. Returns whether the address
    /// was new.
    pub fn register(&self, service: &DiscoveredService) -> Result<bool> {
        register(&self.store, service)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Session>> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for DiscoveryAgent {
    fn drop(&mut self) {
        self.stop();
    }
}

fn handle_event(store: &CredentialStore, event: BrowseEvent) -> Result<()> {
    match event {
        BrowseEvent::Resolved(service) => register(store, &service).map(|_| ()),
        BrowseEvent::Failed { name, reason } => Err(FleetError::Discovery(format!(
            "could not resolve {}: {}",
            name, reason
        ))),
    }
}

/// Resolve a service to its first IPv4 address and advertised port, then add
/// it to the store unless already known.
fn register(store: &CredentialStore, service: &DiscoveredService) -> Result<bool> {
    let address = resolve(service)?;

    if store.insert_device(&address) {
        tracing::info!("Discovered printer {} at {}", service.name, address);
        Ok(true)
    } else {
        tracing::debug!("{} at {} is already known", service.name, address);
        Ok(false)
    }
}

fn resolve(service: &DiscoveredService) -> Result<DeviceAddress> {
    let host = service
        .addresses
        .iter()
        .find_map(|addr| match addr {
            IpAddr::V4(v4) => Some(v4.to_string()),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| {
            FleetError::Discovery(format!("{} has no IPv4 address", service.name))
        })?;

    let port = match service.txt.get("port") {
        Some(value) => value.trim().parse::<u16>().map_err(|_| {
            FleetError::Discovery(format!(
                "{} advertised an invalid port {:?}",
                service.name, value
            ))
        })?,
        None => DEFAULT_RPC_PORT,
    };

    Ok(DeviceAddress::new(host, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn service(addresses: Vec<IpAddr>, port: Option<&str>) -> DiscoveredService {
        let mut txt = HashMap::new();
        if let Some(port) = port {
            txt.insert("port".to_string(), port.to_string());
        }
        DiscoveredService {
            name: "Replicator".to_string(),
            addresses,
            txt,
        }
    }

    #[test]
    fn test_resolve_prefers_first_ipv4() {
        let svc = service(
            vec![
                IpAddr::V6(Ipv6Addr::LOCALHOST),
                IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50)),
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            ],
            Some("9998"),
        );
        let address = resolve(&svc).unwrap();
        assert_eq!(address.key(), "192.168.1.50:9998");
    }

    #[test]
    fn test_resolve_defaults_port_and_rejects_ipv6_only() {
        let svc = service(vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50))], None);
        assert_eq!(resolve(&svc).unwrap().port, 9999);

        let v6 = service(vec![IpAddr::V6(Ipv6Addr::LOCALHOST)], None);
        assert!(matches!(resolve(&v6), Err(FleetError::Discovery(_))));

        let bad_port = service(vec![IpAddr::V4(Ipv4Addr::LOCALHOST)], Some("http"));
        assert!(matches!(resolve(&bad_port), Err(FleetError::Discovery(_))));
    }

    #[test]
    fn test_same_address_registers_once() {
        let store = CredentialStore::in_memory();
        let svc = service(vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50))], None);

        assert!(register(&store, &svc).unwrap());
        assert!(!register(&store, &svc).unwrap());
        assert_eq!(store.devices().len(), 1);
        assert!(!store.devices()[0].is_paired());
    }

    /// Never yields; each browse hands back a receiver that errors once the
    /// session's stream is dropped.
    #[derive(Default)]
    struct IdleBrowser {
        dropped: Mutex<Vec<tokio::sync::oneshot::Receiver<()>>>,
    }

    impl ServiceBrowser for IdleBrowser {
        fn browse(&self, _: &str, _: &str) -> futures::stream::BoxStream<'static, BrowseEvent> {
            let (tx, rx) = tokio::sync::oneshot::channel::<()>();
            self.dropped.lock().unwrap().push(rx);
            futures::stream::pending::<BrowseEvent>()
                .map(move |event| {
                    let _held = &tx;
                    event
                })
                .boxed()
        }
    }

    #[tokio::test]
    async fn test_restart_cancels_previous_session() {
        let browser = Arc::new(IdleBrowser::default());
        let agent = DiscoveryAgent::new(
            &LanConfig::default(),
            CredentialStore::in_memory(),
            browser.clone(),
        );
        assert!(!agent.is_running());

        agent.start();
        assert!(agent.is_running());
        let first_cancel = agent.lock().as_ref().unwrap().cancel.clone();

        agent.start();
        assert!(first_cancel.is_cancelled());
        assert!(agent.is_running());

        let mut dropped = std::mem::take(&mut *browser.dropped.lock().unwrap());
        assert_eq!(dropped.len(), 2);
        let second = dropped.pop().unwrap();
        let first = dropped.pop().unwrap();

        // The first session's stream goes away with its task
        tokio::time::timeout(std::time::Duration::from_secs(1), first)
            .await
            .unwrap()
            .unwrap_err();
        assert!(!agent.lock().as_ref().unwrap().cancel.is_cancelled());

        agent.stop();
        assert!(!agent.is_running());
        assert!(agent.lock().is_none());
        tokio::time::timeout(std::time::Duration::from_secs(1), second)
            .await
            .unwrap()
            .unwrap_err();
    }

    #[test]
    fn test_known_token_survives_rediscovery() {
        let store = CredentialStore::in_memory();
        store.set_device_token("192.168.1.50:9999", Some("tok"));
        let svc = service(vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50))], Some("9999"));

        assert!(!register(&store, &svc).unwrap());
        assert!(store.device("192.168.1.50:9999").unwrap().is_paired());
    }
}
