pub mod azure;
pub mod cli;
pub mod collect;
pub mod load_config;

pub use cli::{run, Cli, Commands};
