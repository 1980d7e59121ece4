//! Configuration source implementations.

mod config_source;
mod env;
mod file;
pub mod kv;
pub mod secrets;

pub use config_source::{ConfigurationSource, OnChange};
pub use env::EnvSource;
pub use file::FileSource;
pub use kv::{KvClient, KvSource, MemoryKv};
pub use secrets::{SecretStore, SecretsSource};
