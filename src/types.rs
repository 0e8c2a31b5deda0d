// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Canonical types used across wslsetup.
//!
//! Session parameters are the only state that crosses the restart boundary,
//! so they are `Serialize`/`Deserialize` and know how to turn themselves back
//! into command-line arguments for the boot-time hook.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::InstallError;

/// Installation mode selected by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InstallMode {
    /// Runtime only
    Minimal,
    /// Runtime plus bundled services
    #[default]
    Full,
    /// Full plus headers, debug symbols and tooling
    Developer,
}

impl InstallMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Full => "full",
            Self::Developer => "developer",
        }
    }
}

impl fmt::Display for InstallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstallMode {
    type Err = InstallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minimal" => Ok(Self::Minimal),
            "full" => Ok(Self::Full),
            "developer" | "dev" => Ok(Self::Developer),
            other => Err(InstallError::InvalidParameter(format!(
                "unknown installation mode '{}' (expected minimal, full or developer)",
                other
            ))),
        }
    }
}

/// Memory dedicated to the environment, stored in whole gigabytes.
///
/// Accepts `16GB`, `16G`, `16` (gigabytes) or `512MB` (rounded up to 1GB).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemorySize {
    gigabytes: u32,
}

impl MemorySize {
    pub fn from_gb(gigabytes: u32) -> Result<Self, InstallError> {
        if gigabytes == 0 {
            return Err(InstallError::InvalidParameter(
                "memory size must be at least 1GB".to_string(),
            ));
        }
        Ok(Self { gigabytes })
    }

    pub fn gigabytes(&self) -> u32 {
        self.gigabytes
    }
}

impl fmt::Display for MemorySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}GB", self.gigabytes)
    }
}

impl FromStr for MemorySize {
    type Err = InstallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let invalid = || InstallError::InvalidParameter(format!("invalid memory size '{}'", s));

        let (digits, megabytes) = if let Some(n) = upper.strip_suffix("MB") {
            (n, true)
        } else if let Some(n) = upper.strip_suffix("GB").or_else(|| upper.strip_suffix('G')) {
            (n, false)
        } else {
            (upper.as_str(), false)
        };

        let value: u32 = digits.trim().parse().map_err(|_| invalid())?;
        if megabytes {
            Self::from_gb(value.div_ceil(1024))
        } else {
            Self::from_gb(value)
        }
    }
}

/// Immutable input set for one installation attempt.
///
/// Created once at invocation and never mutated. After a restart it is
/// rebuilt from the continuation descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionParameters {
    pub memory: MemorySize,
    pub email: String,
    pub license_key: String,
    pub usage_reporting: bool,
    pub mode: InstallMode,
    pub environment_name: String,
    #[serde(default)]
    pub debug: bool,
}

impl SessionParameters {
    /// Validate the fields that would otherwise fail deep inside the run.
    pub fn validate(&self) -> Result<(), InstallError> {
        let email = self.email.trim();
        let at = email.find('@');
        let valid_email = matches!(at, Some(i) if i > 0 && i + 1 < email.len())
            && !email.contains(char::is_whitespace);
        if !valid_email {
            return Err(InstallError::InvalidParameter(format!(
                "'{}' is not a valid email address",
                self.email
            )));
        }

        let name = &self.environment_name;
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(InstallError::InvalidParameter(format!(
                "environment name '{}' may only contain letters, digits, '-', '_' and '.'",
                name
            )));
        }
        Ok(())
    }

    /// Serialize to the `install` arguments that reproduce this session.
    ///
    /// Values are attached with `=` so one starting with `-` is not read as a flag.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "install".to_string(),
            format!("--memory={}", self.memory),
            format!("--email={}", self.email),
            format!("--license-key={}", self.license_key),
            format!("--mode={}", self.mode),
            format!("--distro={}", self.environment_name),
        ];
        if self.usage_reporting {
            args.push("--usage-reporting".to_string());
        }
        if self.debug {
            args.push("--debug".to_string());
        }
        args
    }
}

/// Orchestrator progress. Declaration order is execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum InstallPhase {
    Detecting,
    Provisioning,
    RunningHardwareSetup,
    InstallingPackage,
    PersistingContinuation,
    AwaitingRestart,
    Resumed,
    Complete,
}

impl InstallPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detecting => "detecting",
            Self::Provisioning => "provisioning",
            Self::RunningHardwareSetup => "running-hardware-setup",
            Self::InstallingPackage => "installing-package",
            Self::PersistingContinuation => "persisting-continuation",
            Self::AwaitingRestart => "awaiting-restart",
            Self::Resumed => "resumed",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for InstallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Holds the single current phase and refuses backward transitions.
///
/// Retries inside a phase never call [`PhaseTracker::advance`].
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    current: InstallPhase,
    history: Vec<InstallPhase>,
}

impl PhaseTracker {
    /// Tracker for a fresh run.
    pub fn fresh() -> Self {
        Self::starting_at(InstallPhase::Detecting)
    }

    /// Tracker for a process started by the boot-time hook.
    pub fn resumed() -> Self {
        Self::starting_at(InstallPhase::Resumed)
    }

    fn starting_at(phase: InstallPhase) -> Self {
        Self {
            current: phase,
            history: vec![phase],
        }
    }

    pub fn current(&self) -> InstallPhase {
        self.current
    }

    pub fn history(&self) -> &[InstallPhase] {
        &self.history
    }

    pub fn advance(&mut self, next: InstallPhase) -> Result<(), InstallError> {
        if next <= self.current {
            return Err(InstallError::InvalidTransition {
                from: self.current,
                to: next,
            });
        }
        tracing::info!(from = %self.current, to = %next, "phase transition");
        self.current = next;
        self.history.push(next);
        Ok(())
    }
}

/// Lifecycle of the provisioned environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvironmentState {
    Absent,
    Provisioning,
    Ready,
    Unreachable,
}

/// The provisioned environment as seen by this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentInstance {
    pub name: String,
    pub state: EnvironmentState,
    pub storage_path: PathBuf,
}

impl EnvironmentInstance {
    pub fn is_ready(&self) -> bool {
        self.state == EnvironmentState::Ready
    }
}
