pub mod ask;
pub mod cache;
pub mod config_cmd;
pub mod logout;
