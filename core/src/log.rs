//! Logging facade and initialization.
//!
//! For the macros to properly compile, the calling crate must add a
//! dependency to crate log (ie. `log.workspace = true`).

pub use log::{Level, LevelFilter};

/// Initializes a console logger honoring `filters` (an `error|warn|info|debug|trace`
/// level name). Called once by the daemon before any service starts.
pub fn init_logger(filters: &str) {
    use log4rs::{
        append::console::ConsoleAppender,
        config::{Appender, Config, Root},
        encode::pattern::PatternEncoder,
    };

    const CONSOLE_APPENDER: &str = "stdout";

    let level = filters.parse().unwrap_or(LevelFilter::Info);
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S%.3f)} [{({l}):5.5}] {m}{n}")))
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build(CONSOLE_APPENDER, Box::new(stdout)))
        .build(Root::builder().appender(CONSOLE_APPENDER).build(level))
        .expect("logger config is statically valid");

    let _ = log4rs::init_config(config);
}

#[macro_export]
macro_rules! trace {
    ($($t:tt)*) => (
        log::trace!($($t)*)
    )
}

#[macro_export]
macro_rules! debug {
    ($($t:tt)*) => (
        log::debug!($($t)*)
    )
}

#[macro_export]
macro_rules! info {
    ($($t:tt)*) => (
        log::info!($($t)*)
    )
}

#[macro_export]
macro_rules! warn {
    ($($t:tt)*) => (
        log::warn!($($t)*)
    )
}

#[macro_export]
macro_rules! error {
    ($($t:tt)*) => (
        log::error!($($t)*)
    )
}
