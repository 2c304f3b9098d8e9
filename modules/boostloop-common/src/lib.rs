pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, Tuning};
pub use error::BoostloopError;
pub use types::*;
