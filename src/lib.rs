pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod fs_util;
pub mod graph;
pub mod graphdb;
pub mod loader;
pub mod output;
pub mod parsers;
pub mod sources;
pub mod store;
