//! privd core - identity, lifecycle and control-surface types shared by the
//! bootstrap and the exchange

pub mod config;
pub mod error;
pub mod protocol;
pub mod types;

pub use config::{ServerArgs, ServerArgsBuilder};
pub use error::{Error, Result, FATAL_EXIT_STATUS};
pub use protocol::*;
pub use types::*;
