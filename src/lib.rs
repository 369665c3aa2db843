/// Cipherpost - end-to-end encrypted webmail server
///
/// The server never sees plaintext mail or private keys. What it does provide
/// is federated public-key resolution: clients ask their own server for the
/// keys of any address, and servers ask each other on their behalf, with
/// notary attestations that let clients cross-check every answer.

pub mod address;
pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod crypto;
pub mod db;
pub mod directory;
pub mod error;
pub mod federation;
pub mod jobs;
pub mod mx;
pub mod server;

pub use context::AppContext;
pub use error::{ServerError, ServerResult};
