pub mod chat;
pub mod config_cmd;
pub mod log;
pub mod memory;
pub mod serve;
