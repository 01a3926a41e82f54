//! HTTP presentation layer over [`VaultCollection`](crate::vault::VaultCollection).

pub mod routes;
pub mod server;

pub use server::ApiServer;
