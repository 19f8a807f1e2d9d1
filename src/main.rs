//! Minimal node bootstrap binary. The CLI surface spec.md §6 names
//! (`issue`, `transfer`, `listmytokens`, ...) belongs to a non-core layer
//! this crate doesn't provide (spec.md §1 scopes the core to consensus
//! logic, not the surface around it); this binary only demonstrates wiring
//! a [`raven_core::context::Context`] together, the way the teacher's
//! `main.rs` is a thin dispatcher in front of `commands::top_level`.

use std::env;
use std::path::PathBuf;

use raven_core::context::Context;
use raven_core::mempool::AncestorLimits;
use raven_core::params::ChainParams;

#[cfg(feature = "rocksdb-backend")]
use raven_core::store::RocksStore;
#[cfg(not(feature = "rocksdb-backend"))]
use raven_core::store::MemoryStore;

const METADATA_CACHE_SIZE: usize = 10_000;

fn main() {
    tracing_subscriber::fmt::init();

    let network = env::args().nth(1).unwrap_or_else(|| "main".to_string());
    let params = match network.as_str() {
        "test" => ChainParams::testnet(),
        "regtest" => ChainParams::regtest(),
        _ => ChainParams::mainnet(),
    };

    #[cfg(feature = "rocksdb-backend")]
    let context = {
        let store = RocksStore::open(data_dir(&params)).expect("failed to open the chain-state database");
        Context::new(store, params, AncestorLimits::default(), METADATA_CACHE_SIZE)
    };
    #[cfg(not(feature = "rocksdb-backend"))]
    let context = Context::new(MemoryStore::new(), params, AncestorLimits::default(), METADATA_CACHE_SIZE);

    tracing::info!(
        network = context.params.network,
        height = context.tip().height,
        frozen_scripts = context.governance.number_of_frozen_scripts().unwrap_or(0),
        "raven-core context initialized"
    );
}

#[cfg(feature = "rocksdb-backend")]
fn data_dir(params: &ChainParams) -> PathBuf {
    let mut dir = env::var_os("RAVEN_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./data"));
    dir.push(format!("raven-{}", params.network));
    dir
}
