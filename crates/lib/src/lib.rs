//! chatbridge core library: webhook gateway, NLU relay, session registry,
//! and messaging-platform token bootstrap used by the CLI.

pub mod config;
pub mod gateway;
pub mod init;
pub mod messaging;
pub mod nlu;
pub mod processor;
pub mod session;
pub mod token;
