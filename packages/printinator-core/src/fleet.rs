//! Merges the cloud and LAN snapshot lists into the view the renderer reads.
//!
//! Sources never touch the view directly. They send whole replacement lists
//! through a [`FleetSink`]; a single task applies them in arrival order and
//! notifies subscribers.

use crate::cloud::CloudPrinter;
use crate::lan::LanPrinter;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Read-only union of both fleets.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FleetView {
    pub cloud: Arc<Vec<CloudPrinter>>,
    pub lan: Arc<Vec<LanPrinter>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl FleetView {
    pub fn len(&self) -> usize {
        self.cloud.len() + self.lan.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cloud_printer(&self, serial: &str) -> Option<&CloudPrinter> {
        self.cloud.iter().find(|p| p.serial == serial)
    }

    pub fn lan_printer(&self, address: &str) -> Option<&LanPrinter> {
        self.lan.iter().find(|p| p.address == address)
    }
}

#[derive(Debug)]
pub enum FleetUpdate {
    Cloud(Vec<CloudPrinter>),
    Lan(Vec<LanPrinter>),
}

/// Handle the fleet clients publish through.
#[derive(Debug, Clone)]
pub struct FleetSink {
    tx: mpsc::UnboundedSender<FleetUpdate>,
}

impl FleetSink {
    pub fn publish(&self, update: FleetUpdate) {
        if self.tx.send(update).is_err() {
            tracing::debug!("Fleet aggregator stopped, dropping update");
        }
    }
}

pub struct FleetAggregator {
    rx: mpsc::UnboundedReceiver<FleetUpdate>,
    view_tx: watch::Sender<FleetView>,
}

impl FleetAggregator {
    pub fn new() -> (Self, FleetSink) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (view_tx, _) = watch::channel(FleetView::default());
        (Self { rx, view_tx }, FleetSink { tx })
    }

    pub fn subscribe(&self) -> watch::Receiver<FleetView> {
        self.view_tx.subscribe()
    }

    pub fn view(&self) -> FleetView {
        self.view_tx.borrow().clone()
    }

    /// Replace one side of the view and notify subscribers.
    pub fn apply(&self, update: FleetUpdate) {
        self.view_tx.send_modify(|view| {
            match update {
                FleetUpdate::Cloud(printers) => {
                    tracing::debug!("Cloud fleet replaced: {} printers", printers.len());
                    view.cloud = Arc::new(printers);
                }
                FleetUpdate::Lan(printers) => {
                    tracing::debug!("LAN fleet replaced: {} printers", printers.len());
                    view.lan = Arc::new(printers);
                }
            }
            view.updated_at = Some(Utc::now());
        });
    }

    /// Apply updates until every sink is dropped or `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                update = self.rx.recv() => match update {
                    Some(update) => self.apply(update),
                    None => break,
                },
                _ = cancel.cancelled() => break,
            }
        }
        tracing::debug!("Fleet aggregator stopped");
    }
}
