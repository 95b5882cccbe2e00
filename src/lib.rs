pub mod audit_log;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod event;
pub mod host;
pub mod index;
pub mod logging;
pub mod output;
pub mod owner;
pub mod pipeline;
pub mod project;
pub mod query;
pub mod registry;
pub mod snapshot;
pub mod walker;
pub mod watcher;
