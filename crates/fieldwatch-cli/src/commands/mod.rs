pub mod attendance;
pub mod config;
pub mod policy;
pub mod position;
pub mod status;
pub mod sweep;
