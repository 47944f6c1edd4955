//! Shared CLI scaffolding (component M) used by all three binaries.

use log::LevelFilter;

/// `-q` silences everything; otherwise each repeated `-v` climbs one level.
pub fn init_logging(quiet: bool, verbosity: u8) {
    let log_level = if quiet {
        LevelFilter::Off
    } else {
        match verbosity {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    env_logger::builder()
        .filter_level(log_level)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false)
        .init();
}
