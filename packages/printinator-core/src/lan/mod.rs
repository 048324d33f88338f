//! LAN fleet: polls every known printer address over JSON-RPC.

mod poller;
mod types;

pub use poller::LanFleet;
pub use types::{FirmwareVersion, HandshakeInfo, LanPrinter, SystemInformation, Toolhead};
