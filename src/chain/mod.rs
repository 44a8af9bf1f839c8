//! Chain identifiers and cross-chain address helpers
//!
//! Every supported chain is a variant of [`ChainId`]; its string form is the
//! xCall network id used on the wire. Chains are grouped into families that
//! share one RPC, log and event shape.

mod address;
mod id;

pub use address::{network_address, NetworkAddress, NATIVE_ADDRESS};
pub use id::{ChainFamily, ChainId};
