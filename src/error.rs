// Copyright (c) 2024-2025 Jesse Morgan
// Licensed under the MIT License. See LICENSE file for details.

//! Error taxonomy and operator-facing error formatting.
//!
//! Every abort prints a title, possible causes, and concrete fixes, because
//! the installer window stays open on failure and that text is all the
//! operator has to go on.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::InstallPhase;

/// Support URL printed at the end of every error report.
pub const SUPPORT_URL: &str = "https://github.com/morgan-forge/wslsetup/issues";

/// Errors that abort (or would abort) an installation run.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to provision environment '{name}': {reason}")]
    Provisioning { name: String, reason: String },

    #[error("wsl --list failed with exit code {status}: {detail}")]
    WslUnavailable { status: i32, detail: String },

    #[error("environment '{name}' did not respond after {attempts} liveness probes")]
    Unreachable { name: String, attempts: u32 },

    #[error("download of {url} failed after {attempts} attempts: {last_error}")]
    Download {
        url: String,
        attempts: u32,
        last_error: String,
    },

    #[error("package installation exited with code {code}")]
    PackageInstall { code: i32, log_tail: Vec<String> },

    #[error("continuation storage error: {0}")]
    Continuation(String),

    #[error("restart could not be issued: {0}")]
    Restart(String),

    #[error("invalid phase transition {from} -> {to}")]
    InvalidTransition { from: InstallPhase, to: InstallPhase },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, InstallError>;

impl InstallError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Render the actionable report shown to the operator.
    pub fn report(&self) -> String {
        let builder = ErrorBuilder::new(self.to_string());
        let builder = match self {
            Self::InvalidParameter(_) => builder
                .fix("Check the values passed to --memory, --email, --mode and --distro")
                .fix("Run: wslsetup install --help"),
            Self::Config(_) => builder
                .cause("config.json is not valid JSON or has a wrong field type")
                .fix("Fix or delete the config file and re-run the installer"),
            Self::Provisioning { .. } => builder
                .cause("WSL is not enabled on this machine")
                .cause("The base image could not be downloaded or imported")
                .fix("Enable WSL: wsl --install --no-distribution (as Administrator)")
                .fix("Check network access and re-run the installer"),
            Self::WslUnavailable { .. } => builder
                .cause("The WSL service is still starting after a restart")
                .cause("WSL is not enabled on this machine")
                .fix("Run: wsl --status")
                .fix("Wait a minute, then run: wslsetup resume"),
            Self::Unreachable { name, .. } => builder
                .cause("The WSL subsystem is still starting after a restart")
                .cause("The distribution is broken or stopped")
                .fix(format!("Check it manually: wsl -d {} -- echo ok", name))
                .fix("Run: wsl --shutdown, then re-run the installer"),
            Self::Download { .. } => builder
                .cause("No network connection or a proxy is blocking the download")
                .cause("The package server is temporarily unavailable")
                .fix("Check connectivity from inside WSL: curl -I https://example.com")
                .fix("Re-run the installer; no restart was scheduled"),
            Self::PackageInstall { log_tail, .. } => {
                let mut b = builder
                    .cause("A dependency could not be resolved")
                    .cause("The package manager lock is held by another process");
                for line in log_tail {
                    b = b.cause(format!("log: {}", line));
                }
                b.fix("Inspect /var/log/apt/term.log inside the environment")
                    .fix("Re-run the installer; it is safe to repeat")
            }
            Self::Continuation(_) => builder
                .cause("The per-user application data directory is not writable")
                .fix("Check permissions on %LOCALAPPDATA%\\wslsetup")
                .fix("Run: wslsetup status"),
            Self::Restart(_) => builder
                .cause("A group policy or another program blocked the restart")
                .fix("Restart Windows manually; installation resumes at next logon")
                .fix("Or resume without restarting: wslsetup resume"),
            Self::InvalidTransition { .. } => builder.fix(format!("Please report this at {}", SUPPORT_URL)),
            Self::Spawn { program, .. } => builder
                .cause(format!("{} is not installed or not on PATH", program))
                .fix("Make sure you are running on Windows 10 2004+ or Windows 11"),
            Self::Io { path, .. } => builder
                .cause("Disk full or permission denied")
                .fix(format!("Check that {} is writable", path.display())),
        };
        builder.build()
    }
}

/// Formats an error message with title, causes, fixes, and help link.
pub fn format_error(title: &str, causes: &[&str], fixes: &[&str]) -> String {
    let mut output = String::new();

    output.push_str(&format!("[✗] {}\n\n", title));

    if !causes.is_empty() {
        output.push_str("Possible causes:\n");
        for cause in causes {
            output.push_str(&format!("  - {}\n", cause));
        }
        output.push('\n');
    }

    if !fixes.is_empty() {
        output.push_str("Try these fixes:\n");
        for (i, fix) in fixes.iter().enumerate() {
            output.push_str(&format!("  {}. {}\n", i + 1, fix));
        }
        output.push('\n');
    }

    output.push_str(&format!("Need help? {}", SUPPORT_URL));

    output
}

/// Builder for constructing formatted error messages.
///
/// # Example
///
/// ```
/// use wslsetup::error::ErrorBuilder;
///
/// let error = ErrorBuilder::new("Failed to reach the environment")
///     .cause("WSL is still starting")
///     .fix("Run: wsl --shutdown")
///     .build();
/// assert!(error.contains("Possible causes:"));
/// ```
#[derive(Debug, Clone)]
pub struct ErrorBuilder {
    title: String,
    causes: Vec<String>,
    fixes: Vec<String>,
}

impl ErrorBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            causes: Vec::new(),
            fixes: Vec::new(),
        }
    }

    pub fn cause(mut self, cause: impl Into<String>) -> Self {
        self.causes.push(cause.into());
        self
    }

    pub fn fix(mut self, fix: impl Into<String>) -> Self {
        self.fixes.push(fix.into());
        self
    }

    pub fn build(self) -> String {
        let causes: Vec<&str> = self.causes.iter().map(|s| s.as_str()).collect();
        let fixes: Vec<&str> = self.fixes.iter().map(|s| s.as_str()).collect();
        format_error(&self.title, &causes, &fixes)
    }
}

impl fmt::Display for ErrorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.clone().build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error() {
        let error = format_error("Test Error", &["Cause 1", "Cause 2"], &["Fix 1", "Fix 2"]);

        assert!(error.contains("[✗] Test Error"));
        assert!(error.contains("  - Cause 2"));
        assert!(error.contains("  2. Fix 2"));
        assert!(error.contains(SUPPORT_URL));
    }

    #[test]
    fn test_empty_causes_and_fixes() {
        let error = format_error("Empty test", &[], &[]);
        assert!(!error.contains("Possible causes:"));
        assert!(!error.contains("Try these fixes:"));
    }

    #[test]
    fn test_package_install_report_surfaces_log_tail() {
        let err = InstallError::PackageInstall {
            code: 100,
            log_tail: vec!["E: Unable to locate package edge-engine".to_string()],
        };
        let report = err.report();
        assert!(report.contains("exited with code 100"));
        assert!(report.contains("log: E: Unable to locate package edge-engine"));
    }

    #[test]
    fn test_restart_report_mentions_manual_resume() {
        let report = InstallError::Restart("access denied".to_string()).report();
        assert!(report.contains("wslsetup resume"));
    }
}
