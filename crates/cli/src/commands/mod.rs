//! CLI Commands

pub mod client;
pub mod credential;
pub mod watch;
