//! Printinator Core Library
//!
//! Keeps a live view of two printer fleets:
//! - Cloud printers behind the vendor's OAuth2-protected REST API
//! - LAN printers found through service discovery and queried over JSON-RPC
//!
//! Both sides produce whole snapshot lists that the [`fleet::FleetAggregator`]
//! merges into one observable [`FleetView`].
//!
//! # Features
//!
//! - `keyring-storage` (default): Keep credentials in the platform keyring
//! - `file-storage`: Keep credentials in a JSON file (for headless Linux)
//!
//! # Example
//!
//! ```no_run
//! use printinator_core::{config, discovery::StaticBrowser, store, FleetEngine};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = config::load_config();
//!     let store = store::CredentialStore::open(store::default_backend()?);
//!     let browser = Arc::new(StaticBrowser::new(config.lan.hosts.clone()));
//!
//!     let engine = FleetEngine::new(config, store, browser).start();
//!     let mut views = engine.subscribe();
//!     while views.changed().await.is_ok() {
//!         println!("{} printers", views.borrow().len());
//!     }
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod cloud;
pub mod config;
pub mod debounce;
pub mod discovery;
pub mod error;
pub mod fleet;
pub mod lan;
pub mod pairing;
pub mod rpc;
pub mod scheduler;
pub mod store;

// Re-export commonly used types
pub use cloud::{CloudClient, CloudFleet, CloudPrinter, PrintStatus};
pub use config::{AgentConfig, ConfigSource};
pub use discovery::{DiscoveryAgent, ServiceBrowser, StaticBrowser};
pub use error::{FleetError, Result};
pub use fleet::{FleetAggregator, FleetView};
pub use lan::{LanFleet, LanPrinter};
pub use pairing::{PairingFlow, PairingProgress};
pub use scheduler::{EngineHandle, FleetEngine};
pub use store::{CredentialStore, DeviceAddress};
