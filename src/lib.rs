pub mod auth;
pub mod config;
pub mod http_api;
pub mod metrics;
pub mod recognition;
pub mod server;
pub mod session;
pub mod transport;

pub use config::ConfigSet;
