pub mod agent;
pub mod conductor_config;
pub mod config;
pub mod errors;
pub mod lock;
pub mod pipeline;
pub mod ports;
pub mod retry;
pub mod state;
pub mod tracker;
