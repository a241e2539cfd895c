use tracing_appender::rolling::Rotation;

/// Data directory under $HOME when none is given
pub const DEFAULT_DIR: &str = ".tunnel-node";

pub const DEFAULT_LOG_FILENAME: &str = "tunnel.log";

pub const DEFAULT_LOG_ROTATION: &str = "never";

/// Rotated log files kept by default
pub const DEFAULT_LOG_MAX_BACKUPS: usize = 16;

/// Payment store directory name under the data directory
pub const DEFAULT_DB_DIR: &str = "payments-db";

/// Default verbosity: info
pub const DEFAULT_VERBOSITY: u8 = 2;

/// Verbosity from which the chain scanner logs at debug level
const SCANNER_DEBUG_VERBOSITY: u8 = 4;

const SCANNER_TARGET: &str = "tunnel_core::loopback::scanner";

/// Log filter directives for a verbosity level.
///
/// 0 error, 1 warn, 2 info, 3 and above debug. The chain scanner is chatty, so it stays at
/// info until verbosity 4.
pub fn log_directives(verbosity: u8) -> String {
    let level = match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        _ => "debug",
    };
    if verbosity >= 3 && verbosity < SCANNER_DEBUG_VERBOSITY {
        format!("{},{}=info", level, SCANNER_TARGET)
    } else {
        level.to_string()
    }
}

/// Parse a log rotation period: never, minutely, hourly or daily
pub fn parse_rotation(s: &str) -> Result<Rotation, String> {
    match s {
        "never" => Ok(Rotation::NEVER),
        "minutely" => Ok(Rotation::MINUTELY),
        "hourly" => Ok(Rotation::HOURLY),
        "daily" => Ok(Rotation::DAILY),
        _ => Err(format!("unknown log rotation {:?}, expected never|minutely|hourly|daily", s)),
    }
}
