pub mod app;
pub mod catalog;
pub mod clean;
pub mod config;
pub mod domain;
pub mod error;
pub mod extract;
pub mod output;
pub mod pool;
pub mod store;
