//! TCP/TLS reachability and handshake timing, plus forward and reverse
//! lookups, for many endpoints at once.
//!
//! Targets are expanded into addresses ([`target`]), probed concurrently
//! ([`prober`], [`coordinator`]) and written as grouped table rows through a
//! single sink ([`output`]).

pub mod config;
pub mod coordinator;
pub mod error;
pub mod output;
pub mod prober;
pub mod relay;
pub mod resolver;
pub mod scheduler;
pub mod target;
pub mod util;
