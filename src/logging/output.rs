// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Logging output backends (console and file).
//!
//! Thread-safe, non-blocking where possible. Mirrors the severity ladder
//! used throughout the protocol: a `Security` level sits above `Warning` so
//! authentication/authorization drops (see `crypto::framer`) can be filtered
//! independently of generic warnings, per the wire framer's SECURITY-level
//! drop requirement.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::sync::Mutex;

/// Log level enumeration for filtering and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Detailed development information.
    Debug = 0,
    /// General information about normal operation.
    Info = 1,
    /// Potentially harmful situations.
    Warning = 2,
    /// Dropped/rejected packets due to auth failure, foreign ring, etc.
    Security = 3,
    /// Error conditions.
    Error = 4,
}

impl LogLevel {
    /// String representation of the log level.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO ",
            Self::Warning => "WARN ",
            Self::Security => "SECUR",
            Self::Error => "ERROR",
        }
    }
}

/// Output destination trait for log messages.
pub trait Output: Send + Sync {
    /// Write a formatted log message to the output.
    fn write(&self, level: LogLevel, message: &str) -> io::Result<()>;
    /// Flush any buffered output.
    fn flush(&self) -> io::Result<()>;
}

/// Console output implementation. Writes to stderr with a level prefix.
pub struct ConsoleOutput {
    level_filter: Mutex<LogLevel>,
}

impl ConsoleOutput {
    /// Create a new console output with the specified minimum level.
    pub fn new(level_filter: LogLevel) -> Self {
        Self {
            level_filter: Mutex::new(level_filter),
        }
    }
}

impl Output for ConsoleOutput {
    fn write(&self, level: LogLevel, message: &str) -> io::Result<()> {
        let filter = self
            .level_filter
            .lock()
            .map_err(|_| io::Error::other("console output mutex poisoned"))?;

        if level < *filter {
            return Ok(());
        }

        eprintln!("[{}] {}", level.as_str(), message);
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        io::stderr().flush()
    }
}

/// File output implementation. Appends log messages to a file.
pub struct FileOutput {
    file: Mutex<std::fs::File>,
    level_filter: Mutex<LogLevel>,
}

impl FileOutput {
    /// Create a new file output, creating/truncating the file at the given path.
    pub fn new(path: &str, level_filter: LogLevel) -> io::Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            file: Mutex::new(file),
            level_filter: Mutex::new(level_filter),
        })
    }
}

impl Output for FileOutput {
    fn write(&self, level: LogLevel, message: &str) -> io::Result<()> {
        let filter = self
            .level_filter
            .lock()
            .map_err(|_| io::Error::other("file output mutex poisoned"))?;

        if level < *filter {
            return Ok(());
        }

        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("file output mutex poisoned"))?;

        writeln!(file, "[{}] {}", level.as_str(), message)
    }

    fn flush(&self) -> io::Result<()> {
        self.file
            .lock()
            .map_err(|_| io::Error::other("file output mutex poisoned"))?
            .flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering_places_security_above_warning() {
        assert!(LogLevel::Warning < LogLevel::Security);
        assert!(LogLevel::Security < LogLevel::Error);
    }

    #[test]
    fn console_output_write_does_not_fail() {
        let output = ConsoleOutput::new(LogLevel::Info);
        assert!(output.write(LogLevel::Error, "test").is_ok());
        assert!(output.flush().is_ok());
    }

    #[test]
    fn file_output_filters_below_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("totem.log");
        let output = FileOutput::new(path.to_str().unwrap(), LogLevel::Security).unwrap();
        output.write(LogLevel::Debug, "suppressed").unwrap();
        output.write(LogLevel::Security, "kept").unwrap();
        output.flush().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("suppressed"));
        assert!(contents.contains("kept"));
    }
}
