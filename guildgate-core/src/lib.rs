//! guildgate-core - Community-gated access control for multiplayer game servers.

pub mod config;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod models;
pub mod services;
pub mod utils;

pub use engine::GateEngine;
pub use error::GateError;
