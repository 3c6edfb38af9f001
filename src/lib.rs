pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod gaps;
pub mod notify;
pub mod persist;
pub mod retry;
pub mod store;
pub mod whoop;
