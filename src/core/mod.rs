//! Core configuration management types.

mod builder;
mod init;
mod layer;
mod reader;
mod store;

pub use builder::LayeredStoreBuilder;
pub use init::StoreCell;
pub use layer::{ConfigData, KEY_SEPARATOR, lookup, merge};
pub(crate) use layer::table;
pub use reader::{ConfigReader, Configurer};
pub use store::{BaseOptions, LayeredStore, ReconcileReport};
