pub mod art;
pub mod config;
pub mod repair;
pub mod storage;
pub mod types;
pub mod utils;
