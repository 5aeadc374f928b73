/// Log levels for loop and stream events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Logger trait for loop and stream events
///
/// Library users can implement this trait to handle logging however they prefer.
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}

/// Default no-op logger that discards all messages
#[derive(Debug, Default, Clone)]
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    fn log(&self, _level: LogLevel, _message: &str) {
        // Do nothing
    }
}

/// Forwards to the `log` crate facade under the `mill_stream` target.
#[derive(Debug, Default, Clone)]
pub struct LogFacade;

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

impl Logger for LogFacade {
    fn log(&self, level: LogLevel, message: &str) {
        log::log!(target: "mill_stream", level.into(), "{}", message);
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Capture {
        records: Mutex<Vec<(log::Level, String, String)>>,
    }

    impl log::Log for Capture {
        fn enabled(&self, _metadata: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            self.records.lock().unwrap().push((
                record.level(),
                record.target().to_string(),
                record.args().to_string(),
            ));
        }

        fn flush(&self) {}
    }

    static CAPTURE: Capture = Capture {
        records: Mutex::new(Vec::new()),
    };

    #[test]
    fn test_level_mapping() {
        assert_eq!(log::Level::from(LogLevel::Debug), log::Level::Debug);
        assert_eq!(log::Level::from(LogLevel::Info), log::Level::Info);
        assert_eq!(log::Level::from(LogLevel::Warn), log::Level::Warn);
        assert_eq!(log::Level::from(LogLevel::Error), log::Level::Error);
    }

    #[test]
    fn test_log_facade_forwards() {
        let _ = log::set_logger(&CAPTURE);
        log::set_max_level(log::LevelFilter::Trace);

        LogFacade.log(LogLevel::Warn, "queue full");
        LogFacade.log(LogLevel::Debug, "polled");

        let records = CAPTURE.records.lock().unwrap();
        let ours: Vec<_> = records
            .iter()
            .filter(|(_, target, _)| target == "mill_stream")
            .map(|(level, _, message)| (*level, message.as_str()))
            .collect();
        assert!(ours.contains(&(log::Level::Warn, "queue full")));
        assert!(ours.contains(&(log::Level::Debug, "polled")));
    }
}
