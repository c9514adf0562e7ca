use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{subscriber::set_global_default, Level};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    filter::DynFilterFn,
    fmt::{self},
    layer::SubscriberExt,
    Layer, Registry,
};
use ua_gateway_error::{GatewayError, GatewayResult};

const LOG_FILE_PREFIX: &str = "ua-gateway.log";

pub struct Logger {
    level: Arc<Mutex<Level>>,
    _file_guard: Option<WorkerGuard>,
}

impl Logger {
    pub fn new(level: Option<Level>) -> Self {
        Logger {
            level: Arc::new(Mutex::new(level.unwrap_or(Level::INFO))),
            _file_guard: None,
        }
    }

    /// Sets the new logging level. Takes effect on both layers immediately.
    #[inline]
    pub fn set_level(&self, new_level: Level) {
        *lock(&self.level) = new_level;
    }

    #[inline]
    pub fn get_level(&self) -> Level {
        *lock(&self.level)
    }

    /// Installs the global subscriber: console output plus a daily rolling
    /// file under `dir`, both filtered by the adjustable level.
    pub fn initialize(&mut self, dir: &str) -> GatewayResult<()> {
        let file_appender = rolling::daily(dir, LOG_FILE_PREFIX);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        self._file_guard = Some(guard);

        let console_filter = {
            let level = Arc::clone(&self.level);
            DynFilterFn::new(move |metadata, _| metadata.level() <= &*lock(&level))
        };

        let file_filter = {
            let level = Arc::clone(&self.level);
            DynFilterFn::new(move |metadata, _| metadata.level() <= &*lock(&level))
        };

        let console_layer = {
            #[cfg(debug_assertions)]
            let layer = fmt::layer()
                .pretty()
                .with_writer(std::io::stdout)
                .with_file(true)
                .with_line_number(true);

            #[cfg(not(debug_assertions))]
            let layer = fmt::layer()
                .with_writer(std::io::stdout)
                .with_file(false)
                .with_line_number(false);

            layer.with_filter(console_filter)
        };

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_filter(file_filter);

        let subscriber = Registry::default().with(console_layer).with(file_layer);

        set_global_default(subscriber)
            .map_err(|e| GatewayError::Internal(format!("failed to set logger: {e}")))?;
        Ok(())
    }
}

/// Parse a configured level name, case-insensitively.
pub fn parse_level(level: &str) -> GatewayResult<Level> {
    level
        .trim()
        .parse::<Level>()
        .map_err(|_| GatewayError::InvalidArgument(format!("unknown log level '{level}'")))
}

// A poisoned level lock still holds a valid level.
#[inline]
fn lock(level: &Mutex<Level>) -> MutexGuard<'_, Level> {
    level.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_is_adjustable() {
        let logger = Logger::new(None);
        assert_eq!(logger.get_level(), Level::INFO);
        logger.set_level(Level::TRACE);
        assert_eq!(logger.get_level(), Level::TRACE);
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug").ok(), Some(Level::DEBUG));
        assert_eq!(parse_level(" WARN ").ok(), Some(Level::WARN));
        assert!(parse_level("loud").is_err());
    }
}
