//! Upstream L1 clients owned by the supernode.

mod beacon_client;
mod l1_client;

pub use beacon_client::L1BeaconClient;
pub use l1_client::{L1Client, L1ClientConfig};
