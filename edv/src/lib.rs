pub mod api;
pub mod config;
pub mod error;
pub mod vault;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use vault::VaultCollection;
