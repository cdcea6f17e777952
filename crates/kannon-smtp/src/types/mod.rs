//! Core SMTP types.

mod address;
mod reply;

pub use address::{Address, Envelope};
pub use reply::{Reply, ReplyCode};
