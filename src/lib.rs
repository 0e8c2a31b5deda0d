// Copyright (c) 2024-2025 Jesse Morgan
// Licensed under the MIT License. See LICENSE file for details.

//! wslsetup - GPU-aware WSL installer library
//!
//! Provisions a WSL distribution, configures graphics acceleration for the
//! detected hardware, installs a Debian package inside it, and carries the
//! installation across the full Windows restart the driver needs.
//!
//! **Detect** -> **Provision** -> **Hardware setup** -> **Install** ->
//! **Arm continuation** -> **Restart** -> **Resume** -> **Complete**
//!
//! # Core Modules
//!
//! - [`orchestrator`] - Phase sequencing across the restart
//! - [`detect`] - Display adapter enumeration and hardware profiles
//! - [`environment`] - WSL distribution provisioning and `.wslconfig`
//! - [`setup`] - Per-profile setup scripts inside the distribution
//! - [`install`] - Package download, debconf preseed, apt install, service start
//! - [`continuation`] - Descriptor persistence and the logon hook
//! - [`restart`] - Full-machine restart with countdown
//! - [`report`] - Console progress and the installation log
//! - [`error`] - Error taxonomy and operator-facing reports

pub mod config;
pub mod continuation;
pub mod detect;
pub mod environment;
pub mod error;
pub mod exec;
pub mod install;
pub mod orchestrator;
pub mod report;
pub mod restart;
pub mod retry;
pub mod setup;
pub mod types;
pub mod utils;
pub mod wsl;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use types::{
    EnvironmentInstance, EnvironmentState, InstallMode, InstallPhase, MemorySize, PhaseTracker,
    SessionParameters,
};

pub use config::{DataLayout, InstallerConfig};
pub use continuation::{
    AutostartHook, ContinuationCoordinator, ContinuationDescriptor, DescriptorStore, ResumeCommand,
    RunOnceHook, StoredDescriptor,
};
pub use detect::{classify, detect_profile, Detection, HardwareProfile};
pub use environment::EnvironmentProvisioner;
pub use error::{format_error, ErrorBuilder, InstallError, Result, SUPPORT_URL};
pub use exec::{CommandOutput, CommandRunner, SystemRunner};
pub use install::{PackageInstaller, Preseed};
pub use orchestrator::{Orchestrator, RunOptions, RunOutcome};
pub use report::{init_logging, Reporter};
pub use restart::{RestartOutcome, RestartTrigger};
pub use retry::{poll_until, retry, RetryPolicy};
pub use setup::{SetupOutcome, SetupRunner};
pub use utils::mask_sensitive;
