//! JSON-RPC transport spoken by LAN printers.

mod codec;
mod connection;
mod value;

pub use codec::{JsonRpcCodec, MAX_FRAME_LEN};
pub use connection::{RpcConnection, RpcError};
pub use value::RpcValue;
