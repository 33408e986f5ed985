//! Primitive types shared by every coin-view layer.
//!
//! The unit of state tracked here is the per-transaction coin record
//! ([`UnspentOutputs`]): for every confirmed transaction, which of its
//! outputs are still spendable. Layers exchange these records by value;
//! nothing in this crate holds locks or talks to storage.

mod coins;
mod undo;

pub use coins::{FetchCoinsResponse, OutputSnapshot, UnspentOutputs};
pub use undo::RewindData;

use bitcoin::BlockHash;
use bitcoin::Network;
use bitcoin::constants::genesis_block;

/// Returns the hash of the given network's genesis block.
///
/// Used as the tip a freshly initialized durable store reports, and as the
/// reset target when rewinding past the oldest recorded state.
pub fn genesis_block_hash(network: Network) -> BlockHash {
    genesis_block(network).block_hash()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mainnet_genesis_hash_is_stable() {
        let hash = genesis_block_hash(Network::Bitcoin);
        assert_eq!(
            hash.to_string(),
            "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
        );
    }
}
