// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Global logger instance and initialization.
//!
//! Thread-safe singleton with lazy initialization so the protocol core
//! never pays for a logging backend it wasn't given.

use super::output::{LogLevel, Output};
use std::io;
use std::sync::{Arc, Mutex, OnceLock};

static LOGGER: OnceLock<Arc<Mutex<GlobalLogger>>> = OnceLock::new();

/// Global logger state.
pub struct GlobalLogger {
    output: Option<Arc<dyn Output>>,
    level_filter: LogLevel,
}

impl GlobalLogger {
    fn new() -> Self {
        Self {
            output: None,
            level_filter: LogLevel::Info,
        }
    }

    fn set_output(&mut self, output: Arc<dyn Output>) {
        self.output = Some(output);
    }

    fn set_level_filter(&mut self, level: LogLevel) {
        self.level_filter = level;
    }

    fn log(&self, level: LogLevel, message: &str) -> io::Result<()> {
        if level < self.level_filter {
            return Ok(());
        }
        if let Some(ref output) = self.output {
            output.write(level, message)?;
        }
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        if let Some(ref output) = self.output {
            output.flush()?;
        }
        Ok(())
    }
}

/// Initialize the global logger. Can only be called once; later calls are ignored.
pub fn init_logger(output: Arc<dyn Output>, level: LogLevel) {
    let _ = LOGGER.get_or_init(|| {
        let mut logger = GlobalLogger::new();
        logger.set_output(output);
        logger.set_level_filter(level);
        Arc::new(Mutex::new(logger))
    });
}

#[inline]
fn get_logger() -> Option<Arc<Mutex<GlobalLogger>>> {
    LOGGER.get().cloned()
}

/// Internal: execute a log operation against the global logger, if any.
#[inline]
pub(crate) fn log_message(level: LogLevel, message: &str) -> io::Result<()> {
    match get_logger() {
        Some(logger) => {
            let guard = logger
                .lock()
                .map_err(|_| io::Error::other("global logger mutex poisoned"))?;
            guard.log(level, message)
        }
        None => Ok(()),
    }
}

/// Flush the global logger's output. Safe to call even if uninitialized.
pub fn flush_logger() -> io::Result<()> {
    match get_logger() {
        Some(logger) => {
            let guard = logger
                .lock()
                .map_err(|_| io::Error::other("global logger mutex poisoned"))?;
            guard.flush()
        }
        None => Ok(()),
    }
}
