pub mod cli;
pub mod client;
pub mod config;
pub mod graph;
pub mod runtime;
pub mod server;
