// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-user boot-time hook.
//!
//! The production hook is a value under the current user's `RunOnce` key,
//! which Windows runs once at the next interactive logon. It is managed
//! through `reg.exe` so everything stays behind [`CommandRunner`].

use crate::error::{InstallError, Result};
use crate::exec::CommandRunner;

/// Registry key whose values run once at the next logon.
pub const RUN_ONCE_KEY: &str = r"HKCU\Software\Microsoft\Windows\CurrentVersion\RunOnce";
/// Value name the installer owns under [`RUN_ONCE_KEY`].
pub const RUN_ONCE_VALUE: &str = "WslSetupResume";

const REG_EXE: &str = "reg.exe";

/// Something that launches a command line once at the next boot/logon.
pub trait AutostartHook {
    fn register(&self, command_line: &str) -> Result<()>;

    /// Remove the hook. Succeeds when no hook is registered.
    fn unregister(&self) -> Result<()>;

    fn is_registered(&self) -> Result<bool>;
}

pub struct RunOnceHook<'a> {
    runner: &'a dyn CommandRunner,
    value_name: String,
}

impl<'a> RunOnceHook<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self::with_value_name(runner, RUN_ONCE_VALUE)
    }

    pub fn with_value_name(runner: &'a dyn CommandRunner, value_name: &str) -> Self {
        Self {
            runner,
            value_name: value_name.to_string(),
        }
    }
}

impl AutostartHook for RunOnceHook<'_> {
    fn register(&self, command_line: &str) -> Result<()> {
        let args = [
            "add",
            RUN_ONCE_KEY,
            "/v",
            self.value_name.as_str(),
            "/t",
            "REG_SZ",
            "/d",
            command_line,
            "/f",
        ];
        let output = self.runner.run(REG_EXE, &args, None)?;
        if !output.success() {
            return Err(InstallError::Continuation(format!(
                "could not register logon hook: {}",
                output.stderr_lossy().trim()
            )));
        }
        tracing::info!(key = RUN_ONCE_KEY, value = %self.value_name, "logon hook registered");
        Ok(())
    }

    fn unregister(&self) -> Result<()> {
        let args = ["delete", RUN_ONCE_KEY, "/v", self.value_name.as_str(), "/f"];
        let output = self.runner.run(REG_EXE, &args, None)?;
        if output.success() {
            tracing::info!(value = %self.value_name, "logon hook removed");
            return Ok(());
        }
        // reg.exe exits 1 both for "not found" and real failures
        if self.is_registered()? {
            return Err(InstallError::Continuation(format!(
                "could not remove logon hook {}\\{}: {}",
                RUN_ONCE_KEY,
                self.value_name,
                output.stderr_lossy().trim()
            )));
        }
        Ok(())
    }

    fn is_registered(&self) -> Result<bool> {
        let args = ["query", RUN_ONCE_KEY, "/v", self.value_name.as_str()];
        Ok(self.runner.run(REG_EXE, &args, None)?.success())
    }
}
