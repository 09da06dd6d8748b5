mod config;
pub mod links;
pub mod network;
pub mod report;
pub mod storage;

pub use self::config::Config;
