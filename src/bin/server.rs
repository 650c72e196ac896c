/*!
 * cinderkv server entry point.
 *
 * Initializes logging, builds the persistence layer and recovers from
 * disk, then runs the single-threaded event loop until `SIGINT`/`SIGTERM`.
 */

use anyhow::Result;
use cinderkv::{DataStore, Dispatcher, DispatcherConfig, PersistenceConfig, PersistenceManager, DEFAULT_ADDR};
use std::net::ToSocketAddrs;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> Result<()> {
    env_logger::init();

    let addr = DEFAULT_ADDR.to_socket_addrs()?.next().unwrap();
    let config = PersistenceConfig::default();
    config.validate()?;

    let persistence = PersistenceManager::new(config);
    persistence.start()?;

    let mut store = DataStore::new();
    match persistence.recover_data(&mut store) {
        Ok(source) => log::info!("recovered {} keys from {:?}", store.len(), source),
        Err(e) => log::error!("recovery failed: {e}"),
    }

    let dispatcher = Dispatcher::new(DispatcherConfig::default());

    // No signal crate in this stack; OS-level kill still closes sockets.
    // The flag is here for embedders that already own signal handling.
    let shutdown = Arc::new(AtomicBool::new(false));

    log::info!("cinderkv starting on {addr}");
    cinderkv::net::run(addr, store, dispatcher, persistence, shutdown)
}
