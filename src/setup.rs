// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-environment hardware setup.
//!
//! Copies the profile's script into the distribution (LF line endings,
//! mode 0755) and runs it, streaming its output to the reporter. A failing
//! script never aborts the run: acceleration is an enhancement.

use crate::detect::{HardwareProfile, SetupProcedure};
use crate::error::{InstallError, Result};
use crate::report::Reporter;
use crate::types::EnvironmentInstance;
use crate::utils::normalize_line_endings;
use crate::wsl::Wsl;

/// Directory inside the distribution that receives setup scripts.
pub const SCRIPT_DIR: &str = "/opt/wslsetup";

/// What happened to the hardware setup step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupOutcome {
    /// Script ran and exited 0
    Configured,
    /// Script could not be copied into the environment
    CopyFailed(String),
    /// Script ran and exited nonzero
    Failed { exit_code: i32 },
}

impl SetupOutcome {
    pub fn is_configured(&self) -> bool {
        matches!(self, Self::Configured)
    }
}

pub struct SetupRunner<'a> {
    wsl: Wsl<'a>,
    reporter: &'a Reporter,
}

impl<'a> SetupRunner<'a> {
    pub fn new(wsl: Wsl<'a>, reporter: &'a Reporter) -> Self {
        Self { wsl, reporter }
    }

    /// Copy and run the setup procedure for `profile`.
    ///
    /// Only a non-ready environment is an error; script problems are
    /// reported in the outcome.
    pub fn run(&self, env: &EnvironmentInstance, profile: HardwareProfile) -> Result<SetupOutcome> {
        if !env.is_ready() {
            return Err(InstallError::Provisioning {
                name: env.name.clone(),
                reason: "environment has not passed its liveness probe".to_string(),
            });
        }

        let procedure = profile.setup_procedure();
        let target = format!("{}/{}", SCRIPT_DIR, procedure.file_name);

        if let Err(reason) = self.copy(env, procedure, &target) {
            tracing::warn!(script = procedure.file_name, %reason, "setup script copy failed");
            self.reporter
                .warn(&format!("Could not copy {} into the environment: {}", procedure.file_name, reason));
            return Ok(SetupOutcome::CopyFailed(reason));
        }

        self.reporter.info(&format!("Running {} ({})", procedure.file_name, procedure.description));
        let command = format!("WSLSETUP_PROFILE={} {} 2>&1", profile.class_id(), target);
        let exit_code = self
            .wsl
            .stream(&env.name, &command, &mut |line| self.reporter.output_line("setup", line))?;

        if exit_code == 0 {
            tracing::info!(profile = profile.class_id(), "hardware setup completed");
            Ok(SetupOutcome::Configured)
        } else {
            tracing::warn!(profile = profile.class_id(), exit_code, "hardware setup failed, continuing without acceleration");
            self.reporter.warn(&format!(
                "{} setup exited with code {}. Continuing without GPU acceleration.",
                profile, exit_code
            ));
            Ok(SetupOutcome::Failed { exit_code })
        }
    }

    fn copy(&self, env: &EnvironmentInstance, procedure: &SetupProcedure, target: &str) -> std::result::Result<(), String> {
        let body = normalize_line_endings(procedure.script);
        let write = self
            .wsl
            .exec_with_stdin(&env.name, &format!("mkdir -p {} && cat > {}", SCRIPT_DIR, target), body.as_bytes())
            .map_err(|e| e.to_string())?;
        if !write.success() {
            return Err(format!("write exited with {}", write.status));
        }

        let chmod = self
            .wsl
            .exec(&env.name, &format!("chmod 0755 {}", target))
            .map_err(|e| e.to_string())?;
        if !chmod.success() {
            return Err(format!("chmod exited with {}", chmod.status));
        }
        Ok(())
    }
}
