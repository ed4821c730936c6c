//! CLI command implementations

mod cast;
mod config;
mod info;

pub use cast::{cast, CastArgs};
pub use config::{config, ConfigArgs};
pub use info::info;
