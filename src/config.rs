// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Installer configuration and on-disk layout.
//!
//! Configuration is an optional `config.json` in the data directory. Every
//! field has a default so a missing file, or a file naming only one field,
//! both work.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{InstallError, Result};
use crate::retry::RetryPolicy;

/// Environment variable overriding the data directory.
pub const HOME_ENV: &str = "WSLSETUP_HOME";

const DEFAULT_BASE_IMAGE_URL: &str =
    "https://cloud-images.ubuntu.com/wsl/jammy/current/ubuntu-jammy-wsl-amd64-wsl.rootfs.tar.gz";
const DEFAULT_PACKAGE_URL: &str = "https://packages.edge-engine.dev/stable/edge-engine_amd64.deb";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    /// Default environment name when `--distro` is not given
    pub environment_name: String,
    /// Root filesystem tarball: an http(s) URL or a local path
    pub base_image: String,
    /// Expected SHA-256 of the base image, hex encoded
    pub base_image_sha256: Option<String>,
    /// Packages installed right after import
    pub bootstrap_packages: Vec<String>,
    /// Debian package to install inside the environment
    pub package_url: String,
    pub package_name: String,
    /// systemd unit started after the restart
    pub service_name: String,
    /// Per-attempt timeout for artifact downloads, in seconds
    pub download_timeout_secs: u64,
    pub download_retry: RetryPolicy,
    pub liveness_poll: RetryPolicy,
    pub readiness_poll: RetryPolicy,
    /// Visible countdown before the machine restarts
    pub restart_countdown_secs: u64,
    /// Lines of the package log shown on install failure
    pub log_tail_lines: usize,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            environment_name: "edge-engine".to_string(),
            base_image: DEFAULT_BASE_IMAGE_URL.to_string(),
            base_image_sha256: None,
            bootstrap_packages: ["ca-certificates", "curl", "debconf-utils", "gnupg", "pciutils"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            package_url: DEFAULT_PACKAGE_URL.to_string(),
            package_name: "edge-engine".to_string(),
            service_name: "edge-engine".to_string(),
            download_timeout_secs: 300,
            download_retry: RetryPolicy::exponential(3, Duration::from_secs(5)),
            liveness_poll: RetryPolicy::fixed(10, Duration::from_secs(5)),
            readiness_poll: RetryPolicy::fixed(10, Duration::from_secs(5)),
            restart_countdown_secs: 10,
            log_tail_lines: 20,
        }
    }
}

impl InstallerConfig {
    /// Load `config.json` from the data directory, falling back to defaults.
    pub fn load(layout: &DataLayout) -> Result<Self> {
        Self::load_from(&layout.config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|e| InstallError::io(path, e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| InstallError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.package_name.trim().is_empty() || self.service_name.trim().is_empty() {
            return Err(InstallError::Config(
                "package_name and service_name must not be empty".to_string(),
            ));
        }
        if let Some(sum) = &self.base_image_sha256 {
            if sum.len() != 64 || !sum.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(InstallError::Config(
                    "base_image_sha256 must be 64 hex characters".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn restart_countdown(&self) -> Duration {
        Duration::from_secs(self.restart_countdown_secs)
    }
}

/// Paths under the per-user data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `%LOCALAPPDATA%\wslsetup`, or `$WSLSETUP_HOME` when set.
    pub fn from_env() -> Self {
        if let Ok(home) = std::env::var(HOME_ENV) {
            if !home.trim().is_empty() {
                return Self::new(home);
            }
        }
        let root = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wslsetup");
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn continuation_dir(&self) -> PathBuf {
        self.root.join("continuation")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn image_cache_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    /// Backing storage for an imported environment.
    pub fn environment_dir(&self, name: &str) -> PathBuf {
        self.root.join("distros").join(name)
    }
}
