pub mod cli;
pub mod destinations;
pub mod directory;
pub mod load_config;
pub mod logging;
pub mod notify;

pub use cli::{run, Cli, RunStatus};
