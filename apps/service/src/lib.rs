#![warn(clippy::all)]

pub mod alerts;
pub mod config;
pub mod error;
pub mod monitoring;
pub mod storage;

pub use config::Config;
pub use error::{AlertError, EngineError, LogError, StoreError, ValidationError};
pub use monitoring::{Engine, EngineConfig, EngineHandle};
