pub mod config;
pub mod debug_log;
pub mod error;
pub mod models;
pub mod storage;
