use crate::config::Config;
use log::LevelFilter;
use simplelog::{self, ConfigBuilder};

/// Dependency modules whose logging is suppressed below Trace. The HTTP
/// stack is chatty at Debug and drowns out broker events.
const FILTERED_MODULES: &[&str] = &["tower", "hyper", "axum"];

pub struct Logger {}

impl Logger {
    /// Initializes the global terminal logger from the runtime Config.
    /// Trace level shows everything, dependency noise included; every other
    /// level filters the modules in `FILTERED_MODULES`.
    pub fn init_logger(config: &Config) {
        simplelog::TermLogger::init(
            Self::convert_level_filter(config.log_level_filter),
            Self::build_log_config(config.log_level_filter),
            simplelog::TerminalMode::Mixed,
            simplelog::ColorChoice::Auto,
        )
        .expect("Failed to start simplelog");
    }

    /// Converts log::LevelFilter to simplelog::LevelFilter.
    fn convert_level_filter(level: LevelFilter) -> simplelog::LevelFilter {
        match level {
            LevelFilter::Off => simplelog::LevelFilter::Off,
            LevelFilter::Error => simplelog::LevelFilter::Error,
            LevelFilter::Warn => simplelog::LevelFilter::Warn,
            LevelFilter::Info => simplelog::LevelFilter::Info,
            LevelFilter::Debug => simplelog::LevelFilter::Debug,
            LevelFilter::Trace => simplelog::LevelFilter::Trace,
        }
    }

    /// RFC-3339 timestamps, plus dependency filtering below Trace.
    fn build_log_config(level: LevelFilter) -> simplelog::Config {
        let mut builder = ConfigBuilder::new();
        builder.set_time_format_rfc3339();

        if level != LevelFilter::Trace {
            for module in FILTERED_MODULES {
                builder.add_filter_ignore_str(module);
            }
        }

        builder.build()
    }
}
