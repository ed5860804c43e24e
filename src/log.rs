use colored::Colorize as _;

/// Setting this environment variable turns on debug logging on stderr,
/// including a transcript of every protocol line read and written.
pub const DEBUG_ENV_VAR: &str = "GIT_REMOTE_HG_DEBUG";

static GLOBAL_LOGGER: StderrLogger = StderrLogger;

/// Installs the stderr logger behind the `log` facade.
///
/// A remote helper owns stdout as a wire protocol, so every diagnostic has
/// to go to stderr. Debug messages are only shown when [`DEBUG_ENV_VAR`] is
/// set in the environment.
pub fn init() {
    log::set_logger(&GLOBAL_LOGGER).expect("global logger not set yet");
    let level = if std::env::var_os(DEBUG_ENV_VAR).is_some() {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    log::set_max_level(level);
}

struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record<'_>) {
        if self.enabled(record.metadata()) {
            eprint_log(record.level(), &format!("{}", record.args()));
        }
    }

    fn flush(&self) {}
}

fn eprint_log(level: log::Level, msg: &str) {
    eprintln!("{}: {msg}", log_level_colored_str(level));
}

fn log_level_colored_str(level: log::Level) -> colored::ColoredString {
    let s = level.as_str();
    match level {
        log::Level::Error => s.red().bold(),
        log::Level::Warn => s.yellow().bold(),
        log::Level::Info => s.green(),
        log::Level::Debug => s.blue(),
        log::Level::Trace => s.into(),
    }
}
