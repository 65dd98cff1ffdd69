//! Global logging system.
//!
//! The standard [log](https://docs.rs/log/0.4.14/log/) crate is used everywhere, with the
//! [simple_logger](https://docs.rs/simple_logger/1.13.0/simple_logger/) implementation. This
//! module only provides an encapsulation of their initialization.

use crate::configuration::LogLevel;
use log::Level;

pub struct Logger {}

impl Logger {
    /// Initialize the global logger with the given level. It must only be used once, since all
    /// subsequent calls result in a failure.
    pub fn initialize(level: LogLevel) -> Result<(), String> {
        let level = match level {
            LogLevel::Off => return Ok(()),
            LogLevel::Error => Level::Error,
            LogLevel::Warn => Level::Warn,
            LogLevel::Info => Level::Info,
            LogLevel::Debug => Level::Debug,
            LogLevel::Trace => Level::Trace,
        };

        simple_logger::init_with_level(level).map_err(|error| error.to_string())
    }
}
