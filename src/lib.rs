pub mod config;
pub mod error;
pub mod proxy;
pub mod routing;
pub mod server;
