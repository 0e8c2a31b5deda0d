// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Host process execution.
//!
//! Every external program the installer touches (`wsl.exe`, `powershell.exe`,
//! `reg.exe`, `shutdown.exe`) goes through [`CommandRunner`], so the phases
//! can be driven against a scripted host in tests.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Command, Stdio};

use crate::error::{InstallError, Result};

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Runs host programs.
pub trait CommandRunner {
    /// Run to completion, capturing output. `stdin` is written then closed.
    fn run(&self, program: &str, args: &[&str], stdin: Option<&[u8]>) -> Result<CommandOutput>;

    /// Run to completion, handing each stdout line to `on_line` as it arrives.
    /// Returns the exit code.
    fn stream(&self, program: &str, args: &[&str], on_line: &mut dyn FnMut(&str)) -> Result<i32>;
}

/// [`CommandRunner`] backed by `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    fn spawn_error(program: &str, source: std::io::Error) -> InstallError {
        InstallError::Spawn {
            program: program.to_string(),
            source,
        }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str], stdin: Option<&[u8]>) -> Result<CommandOutput> {
        tracing::debug!(program, ?args, "run");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() });

        let mut child = cmd.spawn().map_err(|e| Self::spawn_error(program, e))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).map_err(|e| Self::spawn_error(program, e))?;
            // pipe dropped here so the child sees EOF
        }

        let output = child
            .wait_with_output()
            .map_err(|e| Self::spawn_error(program, e))?;

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn stream(&self, program: &str, args: &[&str], on_line: &mut dyn FnMut(&str)) -> Result<i32> {
        tracing::debug!(program, ?args, "stream");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Self::spawn_error(program, e))?;

        // stderr is drained on a helper thread so a chatty child cannot
        // deadlock on a full pipe while we read stdout.
        let stderr_handle = child.stderr.take().map(|mut err| {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = err.read_to_end(&mut buf);
                buf
            })
        });

        if let Some(stdout) = child.stdout.take() {
            let reader = BufReader::new(stdout);
            for line in reader.split(b'\n') {
                let line = line.map_err(|e| Self::spawn_error(program, e))?;
                let text = String::from_utf8_lossy(&line);
                on_line(text.trim_end_matches('\r'));
            }
        }

        let status = child.wait().map_err(|e| Self::spawn_error(program, e))?;

        if let Some(handle) = stderr_handle {
            if let Ok(buf) = handle.join() {
                for line in String::from_utf8_lossy(&buf).lines() {
                    on_line(line);
                }
            }
        }

        Ok(status.code().unwrap_or(-1))
    }
}
