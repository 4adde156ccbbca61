//! Folio server: CLI, TOML configuration and the HTTP surface over
//! [`folio_core::ContentCache`].
pub mod cli;
pub mod config;
pub mod http;
pub mod serve;
