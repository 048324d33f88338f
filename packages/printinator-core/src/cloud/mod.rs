//! Cloud fleet: OAuth2 session management and REST polling of the vendor
//! printer API.

mod client;
mod fleet;
mod types;

pub use client::{CloudClient, TokenGrant};
pub use fleet::CloudFleet;
pub use types::{
    Cartridge, CartridgeStatus, CloudPrinter, PrintRun, PrintRunSuccessVote, PrintStatus,
    PrintThumbnail, PrinterStatus, Tank, TankStatus, TokenResponse, TANK_MAX_DAYS,
    TANK_MAX_LAYERS,
};
