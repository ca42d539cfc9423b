use chrono::Local;
use env_logger::fmt::{Color, Style, StyledValue};
use env_logger::{Builder, Logger};
use log::{Level, LevelFilter};

pub(crate) fn default_logger(debug: bool) -> Logger {
    let mut builder = Builder::new();

    builder
        .filter_level(if debug { LevelFilter::Trace } else { LevelFilter::Info })
        .parse_default_env()
        .format(|f, record| {
            use std::io::Write;

            let target = record.target();
            let crate_target = clap::crate_name!();

            // Dependencies log too; only this crate's records are wanted.
            if !(target == crate_target || target.starts_with(&format!("{crate_target}::"))) {
                return Ok(());
            }

            let mut style = f.style();
            let level = colored_level(&mut style, record.level());
            let time = Local::now().format("%H:%M:%S%.3f");

            writeln!(f, "{} {} > {}", time, level, record.args())
        });

    builder.build()
}

fn colored_level(style: &'_ mut Style, level: Level) -> StyledValue<'_, &'static str> {
    match level {
        Level::Trace => style.set_color(Color::Magenta).value("TRACE"),
        Level::Debug => style.set_color(Color::Blue).value("DEBUG"),
        Level::Info => style.set_color(Color::Green).value("INFO "),
        Level::Warn => style.set_color(Color::Yellow).value("WARN "),
        Level::Error => style.set_color(Color::Red).value("ERROR"),
    }
}

/// Bridges the logger and the progress bars: while a [`MultiProgress`] is
/// attached, log records are written inside `MultiProgress::suspend` so
/// bars and log lines never interleave mid-row.
pub(crate) mod log_wrapper {
    use std::ops::Deref;
    use std::sync::{Arc, Mutex};

    use indicatif::MultiProgress;
    use log::Log;

    pub struct LogWrapper<L: Log> {
        bar: Arc<Mutex<Option<MultiProgress>>>,
        log: L,
    }

    impl<L: Log + 'static> LogWrapper<L> {
        pub fn new(bar: Option<MultiProgress>, log: L) -> Self {
            Self {
                bar: Arc::new(Mutex::new(bar)),
                log,
            }
        }

        /// Installs this as the global logger and derives the max level
        /// from the wrapped logger's configuration.
        pub fn try_init(self) -> Result<SetLogWrapper, log::SetLoggerError> {
            use log::LevelFilter::*;

            for level_filter in [Off, Error, Warn, Info, Debug, Trace].iter().rev() {
                let Some(level) = level_filter.to_level() else {
                    continue;
                };

                let meta = log::Metadata::builder().level(level).build();
                if self.enabled(&meta) {
                    log::set_max_level(*level_filter);
                    break;
                }
            }

            let cloned_bar = self.bar.clone();

            log::set_boxed_logger(Box::new(self)).map(|_| SetLogWrapper { bar: cloned_bar })
        }
    }

    /// Handle to swap the attached [`MultiProgress`] after the logger has
    /// been installed.
    pub struct SetLogWrapper {
        bar: Arc<Mutex<Option<MultiProgress>>>,
    }

    impl SetLogWrapper {
        /// A handle not backed by any installed logger. Attaching a
        /// progress bar to it is a no-op; used where components require
        /// the handle but no global logger is wanted, e.g. in tests.
        pub fn disconnected() -> Self {
            SetLogWrapper {
                bar: Arc::new(Mutex::new(None)),
            }
        }

        pub fn set_multi(&mut self, multi: Option<MultiProgress>) {
            *self.bar.lock().unwrap() = multi;
        }
    }

    impl<L: Log> Log for LogWrapper<L> {
        fn enabled(&self, metadata: &log::Metadata) -> bool {
            self.log.enabled(metadata)
        }

        fn log(&self, record: &log::Record) {
            // Early enabled check to avoid needless suspends.
            if self.log.enabled(record.metadata()) {
                if let Some(bar) = self.bar.lock().unwrap().deref() {
                    bar.suspend(|| self.log.log(record));
                } else {
                    self.log.log(record);
                }
            }
        }

        fn flush(&self) {
            self.log.flush();
        }
    }
}
