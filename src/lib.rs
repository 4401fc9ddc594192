pub mod backup;
pub mod cli;
pub mod config;
pub mod copy;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod filter;
pub mod job;
pub mod manifest;
pub mod permission;
pub mod profile;
pub mod restore;
pub mod signal_handler;
pub mod stats;
pub mod types;
pub mod util;
