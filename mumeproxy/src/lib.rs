pub mod cli;
pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod mapper;
pub mod net;
pub mod proxy;

pub static CRATE_NAME: &str = env!("CARGO_CRATE_NAME");

pub type Result<T, E = error::Error> = core::result::Result<T, E>;
