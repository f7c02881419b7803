//! privd exchange - hands the service's control object to peer processes
//! over a local Unix socket and tells subscribers when it comes and goes

pub mod auth;
pub mod client;
pub mod control;
pub mod exchange;
pub mod notify;
pub mod rpc;
pub mod server;

pub use auth::PeerPolicy;
pub use client::{ControlClient, RemoteControl, Subscription};
pub use control::{ControlObject, ControlSlot, Published};
pub use exchange::ControlExchange;
pub use server::{socket_path, BoundServer, ExchangeServer};
