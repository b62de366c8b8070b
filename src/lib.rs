pub mod builder;
pub mod config;
pub mod geo;
mod header_tools;
pub mod kv;
pub mod refresher;
pub mod service;
