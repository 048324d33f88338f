//! Background tasks that keep both fleets fresh.
//!
//! [`FleetEngine::start`] spawns:
//! - the aggregator task,
//! - the cloud sync timer (startup, then every poll interval),
//! - the LAN poll timer on the same cadence,
//! - a debounced watcher on the known-address set that triggers a LAN poll,
//! - a debounced watcher on the cloud login,
//! - the discovery session.
//!
//! Everything stops when the returned [`EngineHandle`] is shut down.

use crate::cloud::CloudFleet;
use crate::config::AgentConfig;
use crate::debounce::Debouncer;
use crate::discovery::{DiscoveryAgent, ServiceBrowser};
use crate::fleet::{FleetAggregator, FleetView};
use crate::lan::LanFleet;
use crate::pairing::PairingFlow;
use crate::store::CredentialStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub struct FleetEngine {
    config: AgentConfig,
    store: CredentialStore,
    cloud: Arc<CloudFleet>,
    lan: Arc<LanFleet>,
    discovery: Arc<DiscoveryAgent>,
    aggregator: FleetAggregator,
}

impl FleetEngine {
    pub fn new(config: AgentConfig, store: CredentialStore, browser: Arc<dyn ServiceBrowser>) -> Self {
        let (aggregator, sink) = FleetAggregator::new();

        let cloud = CloudFleet::new(&config.cloud, store.clone()).with_sink(sink.clone());
        let lan = LanFleet::new(&config.lan, store.clone()).with_sink(sink);
        let discovery = DiscoveryAgent::new(&config.lan, store.clone(), browser);

        Self {
            config,
            store,
            cloud: Arc::new(cloud),
            lan: Arc::new(lan),
            discovery: Arc::new(discovery),
            aggregator,
        }
    }

    pub fn start(self) -> EngineHandle {
        let cancel = CancellationToken::new();
        let view_rx = self.aggregator.subscribe();
        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(self.aggregator.run(cancel.clone())));

        let cloud = self.cloud.clone();
        tasks.push(spawn_timer(
            "cloud sync",
            self.config.cloud.poll_interval,
            cancel.clone(),
            move || {
                let cloud = cloud.clone();
                async move { cloud.sync_printers().await }
            },
        ));

        let lan = self.lan.clone();
        tasks.push(spawn_timer(
            "LAN poll",
            self.config.cloud.poll_interval,
            cancel.clone(),
            move || {
                let lan = lan.clone();
                async move {
                    lan.poll_cycle().await;
                }
            },
        ));

        let lan = self.lan.clone();
        let mut devices = Debouncer::new(self.store.subscribe_devices(), self.config.lan.address_debounce);
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    settled = devices.settled() => match settled {
                        Some(addresses) => {
                            tracing::debug!("Known printers changed ({}), polling", addresses.len());
                            lan.poll_cycle().await;
                        }
                        None => break,
                    },
                    _ = token.cancelled() => break,
                }
            }
        }));

        let cloud = self.cloud.clone();
        let mut logins = Debouncer::new(self.store.subscribe_login(), self.config.credential_debounce);
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    settled = logins.settled() => match settled {
                        Some(login) => cloud.on_credentials_changed(login).await,
                        None => break,
                    },
                    _ = token.cancelled() => break,
                }
            }
        }));

        self.discovery.start();
        tracing::info!("Fleet engine started");

        EngineHandle {
            config: self.config,
            store: self.store,
            cloud: self.cloud,
            lan: self.lan,
            discovery: self.discovery,
            view_rx,
            cancel,
            tasks,
        }
    }
}

fn spawn_timer<F, Fut>(name: &'static str, period: Duration, cancel: CancellationToken, mut job: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    tracing::debug!("Running scheduled {}", name);
                    job().await;
                }
                _ = cancel.cancelled() => break,
            }
        }
    })
}

/// A running engine.
pub struct EngineHandle {
    config: AgentConfig,
    store: CredentialStore,
    cloud: Arc<CloudFleet>,
    lan: Arc<LanFleet>,
    discovery: Arc<DiscoveryAgent>,
    view_rx: watch::Receiver<FleetView>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn cloud(&self) -> &CloudFleet {
        &self.cloud
    }

    pub fn lan(&self) -> &LanFleet {
        &self.lan
    }

    pub fn discovery(&self) -> &DiscoveryAgent {
        &self.discovery
    }

    pub fn subscribe(&self) -> watch::Receiver<FleetView> {
        self.view_rx.clone()
    }

    pub fn view(&self) -> FleetView {
        self.view_rx.borrow().clone()
    }

    /// A pairing flow that writes into this engine's store. Storing the token
    /// wakes the address watcher, so the next LAN poll authenticates.
    pub fn pairing(&self) -> PairingFlow {
        PairingFlow::new(&self.config.lan, &self.config.pairing, self.store.clone())
    }

    pub async fn shutdown(self) {
        tracing::info!("Stopping fleet engine");
        self.discovery.stop();
        self.cancel.cancel();

        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!("Background task failed: {}", e);
            }
        }
    }
}
