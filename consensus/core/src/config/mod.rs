pub mod genesis;
pub mod params;

pub use genesis::GenesisSpec;
pub use params::{Params, MAINNET_PARAMS, SIMNET_PARAMS};
