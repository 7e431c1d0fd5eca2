//! Job log sinks
//!
//! Deployers and configurators write progress through a [`LogSink`] they
//! are handed, so the caller decides where job output ends up.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);

    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

/// Forwards job output to `tracing`, tagged with the job and request id
#[derive(Debug, Clone)]
pub struct TracingSink {
    job_name: String,
    request_id: String,
}

impl TracingSink {
    pub fn new(job_name: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            request_id: request_id.into(),
        }
    }
}

impl LogSink for TracingSink {
    fn log(&self, level: LogLevel, message: &str) {
        let job = self.job_name.as_str();
        let request_id = self.request_id.as_str();
        match level {
            LogLevel::Debug => tracing::debug!(job, request_id, "{}", message),
            LogLevel::Info => tracing::info!(job, request_id, "{}", message),
            LogLevel::Warn => tracing::warn!(job, request_id, "{}", message),
            LogLevel::Error => tracing::error!(job, request_id, "{}", message),
        }
    }
}

#[cfg(test)]
pub(crate) mod capture {
    use super::*;
    use std::sync::Mutex;

    /// Keeps every line for assertions
    #[derive(Default)]
    pub(crate) struct CapturingSink {
        lines: Mutex<Vec<(LogLevel, String)>>,
    }

    impl CapturingSink {
        pub(crate) fn lines(&self) -> Vec<(LogLevel, String)> {
            self.lines.lock().unwrap().clone()
        }

        pub(crate) fn contains(&self, needle: &str) -> bool {
            self.lines().iter().any(|(_, line)| line.contains(needle))
        }
    }

    impl LogSink for CapturingSink {
        fn log(&self, level: LogLevel, message: &str) {
            self.lines.lock().unwrap().push((level, message.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::capture::CapturingSink;
    use super::*;

    #[test]
    fn test_default_methods_route_levels() {
        let sink = CapturingSink::default();
        sink.info("Creating deployment web-tier...");
        sink.error("boom");
        assert_eq!(
            sink.lines(),
            vec![
                (LogLevel::Info, "Creating deployment web-tier...".to_string()),
                (LogLevel::Error, "boom".to_string()),
            ]
        );
    }
}
