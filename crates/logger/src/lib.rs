//! Process-wide tracing setup shared by the workspace binaries.

mod subscriber;

pub use subscriber::{LogFormat, init, init_with};
