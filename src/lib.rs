pub mod codec;
pub mod command;
pub mod commands;
pub mod config;
pub mod connection;
pub mod database;
pub mod encryption;
pub mod frame;
pub mod handshake;
pub mod manager;
pub mod tls;

mod error;

#[cfg(test)]
mod mock;

pub use codec::{Codec, Generation, Message, ServerInfo};
pub use config::Config;
pub use database::Database;
pub use error::{Error, Result};
pub use manager::ConnectionManager;
