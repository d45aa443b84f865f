//! Error helpers shared by the pusher crates.

pub mod error;

pub use error::{Error, FromMessage, Result, bare_jid, local_part};
