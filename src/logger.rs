//!
//! SharedVision's custom logger
//!

use env_logger::Builder;
use log::Log;

/// Custom [log::Log] implementation wrapping [`env_logger`]
///
/// Events are filtered against their original target, then printed with the target prefixed by
/// `path_prefix` (if any).
#[derive(Debug)]
pub struct Logger {
    logger: Option<env_logger::Logger>,
    path_prefix: Option<String>,
}
impl Logger {
    /// Returns a new [`Logger`]
    pub fn new() -> Self {
        Self {
            logger: None,
            path_prefix: None,
        }
    }

    /// Configures the [`Logger`] to prefix the specified `path_prefix` to all events.
    #[inline]
    pub fn with_path_prefix(mut self, path_prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(path_prefix.into());
        self
    }

    /// Configures the [`Logger`] to filter events.
    ///
    /// This uses the familiar [env_logger syntax].
    ///
    /// If you don't call this, the [`Logger`] will parse the `RUST_LOG` environment variable
    /// instead when you [`Logger::init`] it.
    ///
    /// [env_logger syntax]: https://docs.rs/env_logger/latest/env_logger/index.html#enabling-logging
    #[inline]
    pub fn with_filter(mut self, filter: impl AsRef<str>) -> Self {
        self.logger = Some(Builder::new().parse_filters(filter.as_ref()).build());
        self
    }

    /// Sets the [`Logger`] as global logger.
    ///
    /// All calls to [`log`] macros will go through this [`Logger`] from this point on.
    pub fn init(mut self) -> Result<(), log::SetLoggerError> {
        if self.logger.is_none() {
            self.logger = Some(Builder::new().parse_default_env().build());
        }

        // NOTE: Filtering happens per module, so there is no global ceiling.
        log::set_max_level(log::LevelFilter::max());
        log::set_boxed_logger(Box::new(self))
    }
}
impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}
impl log::Log for Logger {
    #[inline]
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        self.logger
            .as_ref()
            .map_or(true, |filter| filter.enabled(metadata))
    }

    #[inline]
    fn log(&self, record: &log::Record<'_>) {
        let Some(logger) = self.logger.as_ref() else {
            return;
        };
        if !logger.matches(record) {
            return;
        }

        match self.path_prefix.as_ref() {
            Some(path_prefix) => {
                let target = format!("{path_prefix}::{}", record.target());
                logger.log(
                    &log::Record::builder()
                        .level(record.level())
                        .target(&target)
                        .args(*record.args())
                        .module_path(record.module_path())
                        .file(record.file())
                        .line(record.line())
                        .build(),
                );
            }
            None => logger.log(record),
        }
    }

    #[inline]
    fn flush(&self) {
        if let Some(logger) = self.logger.as_ref() {
            logger.flush();
        }
    }
}
impl Drop for Logger {
    fn drop(&mut self) {
        self.flush();
    }
}
