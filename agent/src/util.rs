use colored::*;
use log::{Level, LevelFilter, Metadata, Record};

/// Minimal stderr logger for the agent. Messages from this workspace are
/// always shown at the configured level; anything else (dependencies,
/// transitive crates) only appears at trace verbosity.
struct WireyLogger {
    externals: bool,
}

fn own_target(target: &str) -> bool {
    matches!(
        target.split("::").next(),
        Some("wirey" | "wirey_backend" | "wirey_shared" | "wgtool" | "netlink_link")
    )
}

impl log::Log for WireyLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level() && (self.externals || own_target(metadata.target()))
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let tag = match record.level() {
            Level::Error => "error".red().bold(),
            Level::Warn => " warn".yellow(),
            Level::Info => " info".green(),
            Level::Debug => "debug".blue().dimmed(),
            Level::Trace => "trace".magenta().dimmed(),
        };

        if record.level() >= Level::Debug {
            let target = format!("({})", record.target());
            eprintln!("{tag} {} {}", target.dimmed(), record.args());
        } else {
            eprintln!("{tag} {}", record.args());
        }
    }

    fn flush(&self) {}
}

pub fn init_logger(verbosity: u8) {
    let (level, externals) = match verbosity {
        0 => (LevelFilter::Info, false),
        1 => (LevelFilter::Debug, false),
        _ => (LevelFilter::Trace, true),
    };

    log::set_boxed_logger(Box::new(WireyLogger { externals }))
        .expect("logger is only initialized once");
    log::set_max_level(level);
}
