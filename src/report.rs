// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Operator-facing progress output and the installation log.
//!
//! The console gets colored status lines; the log gets the same events as
//! plain `tracing` records, fanned out to three files so that at least one
//! survives whatever the machine's permissions look like:
//!
//! 1. `<data dir>/logs/install.log`
//! 2. `%TEMP%\wslsetup-install.log`
//! 3. `wslsetup-install.log` in the working directory

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::DataLayout;
use crate::types::InstallPhase;

const LOG_FILE_NAME: &str = "wslsetup-install.log";

/// Every place the installation log is written to.
pub fn log_sinks(layout: &DataLayout) -> Vec<PathBuf> {
    vec![
        layout.logs_dir().join("install.log"),
        std::env::temp_dir().join(LOG_FILE_NAME),
        PathBuf::from(LOG_FILE_NAME),
    ]
}

/// Writer that duplicates every record to all open log files.
#[derive(Clone, Default)]
pub struct LogFanout {
    files: Arc<Mutex<Vec<File>>>,
}

impl LogFanout {
    /// Open (append) every sink that can be opened. Returns the fan-out and
    /// the paths actually in use.
    pub fn open(paths: &[PathBuf]) -> (Self, Vec<PathBuf>) {
        let mut files = Vec::new();
        let mut opened = Vec::new();
        for path in paths {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                if fs::create_dir_all(parent).is_err() {
                    continue;
                }
            }
            if let Ok(file) = OpenOptions::new().create(true).append(true).open(path) {
                files.push(file);
                opened.push(path.clone());
            }
        }
        (
            Self {
                files: Arc::new(Mutex::new(files)),
            },
            opened,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.files.lock().map(|f| f.is_empty()).unwrap_or(true)
    }
}

impl Write for LogFanout {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut files = self
            .files
            .lock()
            .map_err(|_| io::Error::other("log writer poisoned"))?;
        for file in files.iter_mut() {
            // one unwritable sink must not silence the others
            let _ = file.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Ok(mut files) = self.files.lock() {
            for file in files.iter_mut() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}

/// Install the global subscriber. Returns the log files in use.
///
/// `RUST_LOG` overrides the level; otherwise `--debug` selects `debug`
/// and the default is `info`.
pub fn init_logging(layout: &DataLayout, debug_enabled: bool) -> Vec<PathBuf> {
    let (fanout, opened) = LogFanout::open(&log_sinks(layout));

    let default_level = if debug_enabled { "wslsetup=debug" } else { "wslsetup=info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(move || fanout.clone())
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(false),
        )
        .try_init();

    write_header(debug_enabled);
    opened
}

fn write_header(debug_enabled: bool) {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %host,
        os = std::env::consts::OS,
        debug = debug_enabled,
        started = %chrono::Local::now().to_rfc3339(),
        "wslsetup session started"
    );
}

/// Console progress reporter.
///
/// Every message also goes to the log via `tracing`, so the console and the
/// log file tell the same story.
#[derive(Debug, Clone, Default)]
pub struct Reporter {
    quiet: bool,
}

impl Reporter {
    pub fn new() -> Self {
        Self { quiet: false }
    }

    /// A reporter that only logs.
    pub fn quiet() -> Self {
        Self { quiet: true }
    }

    pub fn phase(&self, phase: InstallPhase, message: &str) {
        tracing::info!(phase = phase.as_str(), "{}", message);
        if !self.quiet {
            println!();
            println!("{} {}", format!("==> [{}]", phase.as_str()).cyan().bold(), message.bold());
        }
    }

    pub fn ok(&self, message: &str) {
        tracing::info!("{}", message);
        if !self.quiet {
            println!("{} {}", "[OK]".green(), message);
        }
    }

    pub fn info(&self, message: &str) {
        tracing::info!("{}", message);
        if !self.quiet {
            println!("     {}", message);
        }
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!("{}", message);
        if !self.quiet {
            println!("{} {}", "[!]".yellow(), message);
        }
    }

    /// One line of output from a command running inside the environment.
    pub fn output_line(&self, source: &str, line: &str) {
        tracing::info!(target: "wslsetup::output", source, "{}", line);
        if !self.quiet {
            println!("     {} {}", "|".dimmed(), line.dimmed());
        }
    }

    pub fn spinner(&self, message: &str) -> ProgressBar {
        tracing::info!("{}", message);
        if self.quiet {
            return ProgressBar::hidden();
        }
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner()
            .tick_chars("\u{28FB}\u{28F9}\u{28FC}\u{28F8}\u{28FE}\u{28F6}\u{28F7}\u{28E7}\u{28CF}\u{28DF} ")
            .template("{spinner:.cyan} {msg}")
        {
            spinner.set_style(style);
        }
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner
    }

    pub fn finish_spinner(&self, spinner: &ProgressBar, ok: bool, message: &str) {
        spinner.finish_and_clear();
        if ok {
            self.ok(message);
        } else {
            self.warn(message);
        }
    }
}
