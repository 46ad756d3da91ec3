//! Two-party Perun ledger channel node.
//!
//! [PerunClient] proposes and accepts channels, every open channel is driven
//! by its own session ([session::SessionHandle]) which handles updates from
//! either side, closes cooperatively or through a dispute, and watches the
//! ledger for the peer's moves.

pub mod channel;
mod client;
pub mod config;
pub mod done;
mod error;
pub mod handler;
mod hashing;
pub mod ledger;
pub mod messages;
pub mod perunwire;
pub mod session;
pub mod sig;
pub mod types;
mod watcher;
pub mod wire;

pub use client::{ClientBuilder, PerunClient};
pub use error::{Error, Result};
pub use types::{Address, Hash};
