// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Typed access to `wsl.exe`.
//!
//! Commands inside a distribution always run as root through
//! `--exec bash -c`, so the script is parsed exactly once, by bash.

use std::path::Path;

use crate::error::{InstallError, Result};
use crate::exec::{CommandOutput, CommandRunner};
use crate::utils::decode_wsl_output;

pub const WSL_EXE: &str = "wsl.exe";

/// Marker echoed by the liveness probe.
pub const ALIVE_MARKER: &str = "wslsetup-alive";

/// Printed by `wsl --list` on a machine with nothing registered.
const NO_DISTRIBUTIONS: &str = "has no installed distributions";

#[derive(Clone, Copy)]
pub struct Wsl<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> Wsl<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Names of all registered distributions.
    pub fn list(&self) -> Result<Vec<String>> {
        let output = self.runner.run(WSL_EXE, &["--list", "--quiet"], None)?;
        let text = decode_wsl_output(&output.stdout);

        if !output.success() {
            // wsl.exe exits nonzero when nothing is registered yet
            if text.contains(NO_DISTRIBUTIONS) {
                tracing::debug!(status = output.status, "no distributions registered");
                return Ok(Vec::new());
            }
            let mut detail = text;
            detail.push_str(&decode_wsl_output(&output.stderr));
            return Err(InstallError::WslUnavailable {
                status: output.status,
                detail: detail.trim().to_string(),
            });
        }

        Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        Ok(self
            .list()?
            .iter()
            .any(|d| d.eq_ignore_ascii_case(name)))
    }

    pub fn import(&self, name: &str, install_dir: &Path, tarball: &Path) -> Result<()> {
        let install_dir = install_dir.to_string_lossy();
        let tarball = tarball.to_string_lossy();
        let output = self.runner.run(
            WSL_EXE,
            &["--import", name, &install_dir, &tarball, "--version", "2"],
            None,
        )?;

        if !output.success() {
            let mut detail = decode_wsl_output(&output.stdout);
            detail.push_str(&decode_wsl_output(&output.stderr));
            return Err(InstallError::Provisioning {
                name: name.to_string(),
                reason: format!("wsl --import exited with {}: {}", output.status, detail.trim()),
            });
        }
        Ok(())
    }

    /// Stop one distribution. This is not a machine restart.
    pub fn terminate(&self, name: &str) -> Result<()> {
        let output = self.runner.run(WSL_EXE, &["--terminate", name], None)?;
        if !output.success() {
            tracing::warn!(name, status = output.status, "wsl --terminate failed");
        }
        Ok(())
    }

    pub fn exec(&self, name: &str, script: &str) -> Result<CommandOutput> {
        self.runner.run(WSL_EXE, &Self::exec_args(name, script), None)
    }

    pub fn exec_with_stdin(&self, name: &str, script: &str, stdin: &[u8]) -> Result<CommandOutput> {
        self.runner.run(WSL_EXE, &Self::exec_args(name, script), Some(stdin))
    }

    pub fn stream(&self, name: &str, script: &str, on_line: &mut dyn FnMut(&str)) -> Result<i32> {
        self.runner.stream(WSL_EXE, &Self::exec_args(name, script), on_line)
    }

    /// One liveness probe. Any failure, including a spawn error, is "not alive".
    pub fn is_responsive(&self, name: &str) -> bool {
        match self.exec(name, &format!("echo {}", ALIVE_MARKER)) {
            Ok(out) => out.success() && decode_wsl_output(&out.stdout).contains(ALIVE_MARKER),
            Err(e) => {
                tracing::debug!(name, error = %e, "liveness probe failed to run");
                false
            }
        }
    }

    fn exec_args<'s>(name: &'s str, script: &'s str) -> [&'s str; 8] {
        ["-d", name, "-u", "root", "--exec", "bash", "-c", script]
    }
}
