//! privd - bootstrap and lifecycle core for a privileged background service
//!
//! The process-level pieces live in [`server`]; shared types come from
//! `privd-core` and the peer-facing control surface from `privd-exchange`.

pub mod demo;
pub mod server;
