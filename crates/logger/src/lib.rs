//! Tracing setup shared by the workspace binaries.

mod subscriber;

pub use subscriber::{LogFormat, TracingOptions, init, init_tracing};
