//! Node assembly: configuration, startup, and the background loops
//! that keep a running validator or observer alive.

pub mod config;
pub mod runtime;

pub use config::{GenesisAccount, GenesisConfig, GenesisValidator, NodeConfig};
pub use runtime::{load_keypair, save_keypair, Node};
