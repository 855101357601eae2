pub mod config;
pub mod error;
pub mod relay;
pub mod scheduler;
pub mod server;
pub mod upstream;

pub use error::{Error, Result};
