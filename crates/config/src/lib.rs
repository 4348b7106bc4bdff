//! Configuration loading for the switchboard gateway.
//!
//! Config is discovered from `switchboard.{toml,yaml,yml,json}`, `${ENV}`
//! placeholders are substituted in the raw text, and a few well-known
//! environment variables (`PORT`, `DATABASE_URL`) override file values.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{config_dir, discover_and_load, load_config, set_config_dir},
    schema::{ProtocolConfig, ServerConfig, SessionsConfig, StoreConfig, SwitchboardConfig},
};
